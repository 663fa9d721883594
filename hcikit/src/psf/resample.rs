//! Sub-pixel shift and crop of a stamp in a single Lanczos-3 pass.
//!
//! The shift is the same for every output pixel, so the separable kernel
//! weights are computed once per axis and normalized to sum to one; a
//! constant image stays constant and flux is preserved away from the edges.

use std::f64::consts::PI;

use common::Buffer2;
use glam::DVec2;

use crate::cube::geometry::frame_center;

/// Lanczos kernel support (taps on each side of the sample point).
const LANCZOS_A: usize = 3;
const TAPS: usize = 2 * LANCZOS_A;

/// Lanczos kernel: `sinc(x) * sinc(x / a)` for `|x| < a`, zero outside.
#[inline]
fn lanczos_kernel(x: f64, a: f64) -> f64 {
    if x.abs() < 1e-12 {
        return 1.0;
    }
    if x.abs() >= a {
        return 0.0;
    }
    let pi_x = PI * x;
    let pi_x_a = pi_x / a;
    (pi_x.sin() / pi_x) * (pi_x_a.sin() / pi_x_a)
}

/// Normalized weights for sampling at `floor + frac`, covering pixels
/// `floor - 2 ..= floor + 3`.
fn axis_weights(frac: f64) -> [f64; TAPS] {
    let mut weights = [0.0f64; TAPS];
    for (i, w) in weights.iter_mut().enumerate() {
        let offset = i as f64 - (LANCZOS_A as f64 - 1.0);
        *w = lanczos_kernel(offset - frac, LANCZOS_A as f64);
    }
    let sum: f64 = weights.iter().sum();
    for w in weights.iter_mut() {
        *w /= sum;
    }
    weights
}

#[inline]
fn sample_pixel(data: &Buffer2<f32>, x: i64, y: i64) -> f64 {
    if x < 0 || y < 0 || x >= data.width() as i64 || y >= data.height() as i64 {
        0.0
    } else {
        data[(x as usize, y as usize)] as f64
    }
}

/// Produce a `size x size` stamp whose centre pixel holds the input value at
/// `center` (sub-pixel). Output `(x, y)` samples the input at
/// `(x - c, y - c) + center` with `c = size / 2`; pixels outside the input
/// read as zero.
pub fn recenter_crop(input: &Buffer2<f32>, center: DVec2, size: usize) -> Buffer2<f32> {
    let c = frame_center(size) as f64;
    let origin = center - DVec2::splat(c);
    let base = origin.floor();
    let frac = origin - base;

    let wx = axis_weights(frac.x);
    let wy = axis_weights(frac.y);
    let bx = base.x as i64 - (LANCZOS_A as i64 - 1);
    let by = base.y as i64 - (LANCZOS_A as i64 - 1);

    Buffer2::from_fn(size, size, |x, y| {
        let x0 = bx + x as i64;
        let y0 = by + y as i64;
        let mut acc = 0.0f64;
        for (j, &wyj) in wy.iter().enumerate() {
            if wyj == 0.0 {
                continue;
            }
            let mut row = 0.0f64;
            for (i, &wxi) in wx.iter().enumerate() {
                if wxi != 0.0 {
                    row += wxi * sample_pixel(input, x0 + i as i64, y0 + j as i64);
                }
            }
            acc += wyj * row;
        }
        acc as f32
    })
}
