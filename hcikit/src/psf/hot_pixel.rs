//! Isolated hot-pixel and cosmic-ray suppression for PSF stamps.
//!
//! A single saturated or cosmic-ray pixel is far sharper than any sampled
//! PSF core. The 3x3 median removes it while keeping the core, so the
//! median image seeds peak finding and flags pixels to repair.

use common::Buffer2;

/// A pixel is repaired when it exceeds its 3x3 median by more than this
/// multiple of the median image's peak.
const HOT_PIXEL_RATIO: f32 = 5.0;

/// 3x3 median of every pixel; edge pixels use the neighbours that exist.
pub fn median_filter_3x3(stamp: &Buffer2<f32>) -> Buffer2<f32> {
    let (width, height) = stamp.dim();
    Buffer2::from_fn(width, height, |x, y| {
        let mut neighbors = [0.0f32; 9];
        let mut count = 0;
        for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
            for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                neighbors[count] = stamp[(nx, ny)];
                count += 1;
            }
        }
        let values = &mut neighbors[..count];
        values.sort_unstable_by(|a, b| a.total_cmp(b));
        values[count / 2]
    })
}

/// Replace isolated outliers by their local median.
///
/// Returns the repaired stamp and the number of pixels replaced. A stamp
/// whose median image holds no positive value is returned unchanged.
pub fn repair(stamp: &Buffer2<f32>) -> (Buffer2<f32>, usize) {
    let median = median_filter_3x3(stamp);
    let Some((smooth_peak, _, _)) = median.max_with_position() else {
        return (stamp.clone(), 0);
    };
    if smooth_peak <= 0.0 {
        return (stamp.clone(), 0);
    }

    let limit = HOT_PIXEL_RATIO * smooth_peak;
    let mut repaired = stamp.clone();
    let mut count = 0;
    for (value, &local) in repaired.iter_mut().zip(median.iter()) {
        if *value - local > limit {
            *value = local;
            count += 1;
        }
    }
    (repaired, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::gaussian_stamp;

    #[test]
    fn test_median_removes_single_spike() {
        let mut stamp = Buffer2::new_filled(7, 7, 1.0f32);
        stamp[(3, 3)] = 100.0;
        stamp[(0, 6)] = 50.0;
        let median = median_filter_3x3(&stamp);
        assert!(median.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_median_keeps_sampled_core_on_top() {
        let stamp = gaussian_stamp(9, 9, 4.0, 4.0, 0.8, 1.0);
        let (_, px, py) = median_filter_3x3(&stamp).max_with_position().unwrap();
        assert_eq!((px, py), (4, 4));
    }

    #[test]
    fn test_repair_replaces_hot_pixel_only() {
        let mut stamp = gaussian_stamp(21, 21, 10.0, 10.0, 2.0, 1.0);
        let clean = stamp.clone();
        stamp[(1, 19)] = 500.0;
        let (repaired, count) = repair(&stamp);
        assert_eq!(count, 1);
        assert!(repaired[(1, 19)] < 1e-3);
        assert_eq!(repaired[(10, 10)], clean[(10, 10)]);
        assert_eq!(repaired[(12, 9)], clean[(12, 9)]);
    }

    #[test]
    fn test_repair_leaves_clean_psf_untouched() {
        let stamp = gaussian_stamp(15, 15, 7.3, 6.8, 1.2, 40.0);
        let (repaired, count) = repair(&stamp);
        assert_eq!(count, 0);
        assert_eq!(repaired, stamp);
    }

    #[test]
    fn test_repair_skips_stamp_without_positive_median() {
        let mut stamp = Buffer2::new_filled(5, 5, 0.0f32);
        stamp[(2, 2)] = 1.0;
        let (repaired, count) = repair(&stamp);
        assert_eq!(count, 0);
        assert_eq!(repaired, stamp);
    }
}
