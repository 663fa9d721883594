//! Sub-pixel centre of a PSF stamp.
//!
//! Two estimators share the same fitting window (a square of half-width
//! `fit_radius` around the brightest pixel of the 3x3 median image, clamped
//! to the stamp):
//!
//! - [`CentroidMethod::GaussianFit`]: Levenberg-Marquardt fit of
//!   `f(x,y) = A × exp(-((x-x₀)²/2σx² + (y-y₀)²/2σy²)) + B`.
//! - [`CentroidMethod::Moments`]: iterative Gaussian-weighted first moments.

use common::Buffer2;
use glam::DVec2;

use super::hot_pixel::median_filter_3x3;
use super::lm_optimizer::{LMConfig, LMModel, Sample, optimize};
use crate::config::CentroidMethod;
use crate::error::{HciError, Result};

/// FWHM of a Gaussian in units of its sigma: `2·sqrt(2·ln 2)`.
pub const FWHM_PER_SIGMA: f64 = 2.354_82;

/// Width of the Gaussian weight used by the moment centroid.
const MOMENTS_WEIGHT_SIGMA: f64 = 2.0;

/// Shift (pixels) below which the moment iteration stops.
const MOMENTS_TOLERANCE: f64 = 1e-4;

/// Located PSF centre with the profile width measured around it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CentroidFit {
    /// Centre in stamp pixel coordinates.
    pub pos: DVec2,
    /// Gaussian sigma along x and y.
    pub sigma: DVec2,
    pub amplitude: f64,
    pub background: f64,
    pub iterations: usize,
}

impl CentroidFit {
    /// Mean FWHM of both axes, in pixels.
    pub fn fwhm(&self) -> f64 {
        FWHM_PER_SIGMA * 0.5 * (self.sigma.x + self.sigma.y)
    }
}

/// Locate the centre of `stamp` with the requested method.
pub fn locate(
    stamp: &Buffer2<f32>,
    method: CentroidMethod,
    fit_radius: usize,
    max_iterations: usize,
) -> Result<CentroidFit> {
    let window = FitWindow::around_peak(stamp, fit_radius)?;
    match method {
        CentroidMethod::GaussianFit => fit_gaussian(stamp, &window, max_iterations),
        CentroidMethod::Moments => weighted_moments(stamp, &window, max_iterations),
    }
}

// ============================================================================
// Fitting window
// ============================================================================

/// Inclusive pixel bounds of the fitting region plus its initial estimates.
#[derive(Debug, Clone)]
struct FitWindow {
    x_lo: usize,
    x_hi: usize,
    y_lo: usize,
    y_hi: usize,
    peak: (usize, usize),
    peak_value: f64,
    background: f64,
}

impl FitWindow {
    /// Centre the window on the peak of the median image, so a lone hot
    /// pixel cannot pull it away from the PSF core.
    fn around_peak(stamp: &Buffer2<f32>, radius: usize) -> Result<Self> {
        let Some((_, px, py)) = median_filter_3x3(stamp).max_with_position() else {
            return Err(HciError::Fit("stamp has no finite pixel".into()));
        };
        let peak_value = stamp[(px, py)];
        let x_lo = px.saturating_sub(radius);
        let y_lo = py.saturating_sub(radius);
        let x_hi = (px + radius).min(stamp.width() - 1);
        let y_hi = (py + radius).min(stamp.height() - 1);
        let count = (x_hi - x_lo + 1) * (y_hi - y_lo + 1);
        if count < 7 {
            return Err(HciError::Fit(format!(
                "fitting window holds {} pixels, need at least 7",
                count
            )));
        }

        let mut window = Self {
            x_lo,
            x_hi,
            y_lo,
            y_hi,
            peak: (px, py),
            peak_value: peak_value as f64,
            background: 0.0,
        };
        window.background = window.border_median(stamp);
        Ok(window)
    }

    /// Median of the window's outermost ring.
    fn border_median(&self, stamp: &Buffer2<f32>) -> f64 {
        let mut ring: Vec<f64> = self
            .pixels()
            .filter(|&(x, y)| x == self.x_lo || x == self.x_hi || y == self.y_lo || y == self.y_hi)
            .map(|(x, y)| stamp[(x, y)] as f64)
            .collect();
        ring.sort_unstable_by(|a, b| a.total_cmp(b));
        let n = ring.len();
        if n % 2 == 1 {
            ring[n / 2]
        } else {
            0.5 * (ring[n / 2 - 1] + ring[n / 2])
        }
    }

    fn pixels(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (self.y_lo..=self.y_hi).flat_map(move |y| (self.x_lo..=self.x_hi).map(move |x| (x, y)))
    }

    fn half_width(&self) -> f64 {
        0.5 * ((self.x_hi - self.x_lo).max(self.y_hi - self.y_lo) as f64)
    }

    fn contains(&self, pos: DVec2) -> bool {
        pos.x >= self.x_lo as f64
            && pos.x <= self.x_hi as f64
            && pos.y >= self.y_lo as f64
            && pos.y <= self.y_hi as f64
    }

    /// Sigma from background-subtracted second moments about `center`.
    fn sigma_from_moments(&self, stamp: &Buffer2<f32>, center: DVec2) -> f64 {
        let mut sum_w = 0.0f64;
        let mut sum_r2 = 0.0f64;
        for (x, y) in self.pixels() {
            let w = (stamp[(x, y)] as f64 - self.background).max(0.0);
            let d = DVec2::new(x as f64, y as f64) - center;
            sum_w += w;
            sum_r2 += w * d.length_squared();
        }
        let upper = self.half_width().max(0.5);
        if sum_w <= f64::EPSILON {
            return 1.0f64.min(upper);
        }
        (sum_r2 / (2.0 * sum_w)).sqrt().clamp(0.5, upper)
    }
}

// ============================================================================
// Gaussian profile fit
// ============================================================================

/// 2D elliptical Gaussian, parameters `[x0, y0, amplitude, sigma_x, sigma_y, background]`.
#[derive(Debug)]
struct Gaussian2D {
    min_amplitude: f64,
    max_sigma: f64,
}

impl LMModel<6> for Gaussian2D {
    #[inline]
    fn evaluate(&self, x: f64, y: f64, params: &[f64; 6]) -> f64 {
        let [x0, y0, amp, sigma_x, sigma_y, bg] = *params;
        let dx = x - x0;
        let dy = y - y0;
        let exponent = -0.5 * (dx * dx / (sigma_x * sigma_x) + dy * dy / (sigma_y * sigma_y));
        amp * exponent.exp() + bg
    }

    #[inline]
    fn jacobian_row(&self, x: f64, y: f64, params: &[f64; 6]) -> [f64; 6] {
        let [x0, y0, amp, sigma_x, sigma_y, _bg] = *params;
        let sigma_x2 = sigma_x * sigma_x;
        let sigma_y2 = sigma_y * sigma_y;
        let dx = x - x0;
        let dy = y - y0;
        let exp_val = (-0.5 * (dx * dx / sigma_x2 + dy * dy / sigma_y2)).exp();
        let amp_exp = amp * exp_val;

        [
            amp_exp * dx / sigma_x2,
            amp_exp * dy / sigma_y2,
            exp_val,
            amp_exp * dx * dx / (sigma_x2 * sigma_x),
            amp_exp * dy * dy / (sigma_y2 * sigma_y),
            1.0,
        ]
    }

    #[inline]
    fn constrain(&self, params: &mut [f64; 6]) {
        params[2] = params[2].max(self.min_amplitude);
        params[3] = params[3].clamp(0.3, self.max_sigma);
        params[4] = params[4].clamp(0.3, self.max_sigma);
    }
}

fn fit_gaussian(
    stamp: &Buffer2<f32>,
    window: &FitWindow,
    max_iterations: usize,
) -> Result<CentroidFit> {
    let (px, py) = window.peak;
    let start = DVec2::new(px as f64, py as f64);

    let samples: Vec<Sample> = window
        .pixels()
        .map(|(x, y)| Sample {
            x: x as f64,
            y: y as f64,
            z: stamp[(x, y)] as f64,
        })
        .collect();

    let amplitude = (window.peak_value - window.background).max(window.peak_value * 1e-3);
    let sigma = window.sigma_from_moments(stamp, start);
    let initial = [
        start.x,
        start.y,
        amplitude,
        sigma,
        sigma,
        window.background,
    ];
    let model = Gaussian2D {
        min_amplitude: window.peak_value.abs() * 1e-9,
        max_sigma: 2.0 * window.half_width().max(1.0),
    };
    let config = LMConfig {
        max_iterations,
        ..LMConfig::default()
    };

    let result = optimize(&model, &samples, initial, &config).map_err(|err| match err {
        HciError::Fit(msg) => HciError::Fit(format!("Gaussian fit: {}", msg)),
        other => other,
    })?;

    let [x0, y0, amp, sigma_x, sigma_y, bg] = result.params;
    let pos = DVec2::new(x0, y0);
    if !pos.is_finite() || !window.contains(pos) {
        return Err(HciError::Fit(format!(
            "fitted centre ({:.2}, {:.2}) left the fitting window",
            x0, y0
        )));
    }

    Ok(CentroidFit {
        pos,
        sigma: DVec2::new(sigma_x, sigma_y),
        amplitude: amp,
        background: bg,
        iterations: result.iterations,
    })
}

// ============================================================================
// Weighted moments
// ============================================================================

fn weighted_moments(
    stamp: &Buffer2<f32>,
    window: &FitWindow,
    max_iterations: usize,
) -> Result<CentroidFit> {
    let (px, py) = window.peak;
    let start = DVec2::new(px as f64, py as f64);
    let two_sigma_sq = 2.0 * MOMENTS_WEIGHT_SIGMA * MOMENTS_WEIGHT_SIGMA;
    let max_move = (2.0 * window.half_width() + 1.0) / 4.0;

    let mut center = start;
    for iter in 0..max_iterations {
        let mut sum = DVec2::ZERO;
        let mut sum_w = 0.0f64;
        for (x, y) in window.pixels() {
            let value = (stamp[(x, y)] as f64 - window.background).max(0.0);
            let p = DVec2::new(x as f64, y as f64);
            let weight = value * (-(p - center).length_squared() / two_sigma_sq).exp();
            sum += p * weight;
            sum_w += weight;
        }
        if sum_w < f64::EPSILON {
            return Err(HciError::Fit(
                "no flux above background in the fitting window".into(),
            ));
        }

        let next = sum / sum_w;
        if (next - start).abs().max_element() > max_move {
            return Err(HciError::Fit(format!(
                "moment centroid drifted to ({:.2}, {:.2}), too far from the peak",
                next.x, next.y
            )));
        }
        let shift = (next - center).length();
        center = next;
        if shift < MOMENTS_TOLERANCE {
            let sigma = window.sigma_from_moments(stamp, center);
            return Ok(CentroidFit {
                pos: center,
                sigma: DVec2::splat(sigma),
                amplitude: window.peak_value - window.background,
                background: window.background,
                iterations: iter + 1,
            });
        }
    }

    Err(HciError::Fit(format!(
        "moment centroid did not converge within {} iterations",
        max_iterations
    )))
}
