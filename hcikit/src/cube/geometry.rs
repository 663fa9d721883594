use serde::{Deserialize, Serialize};

use crate::error::{HciError, Result};

/// Shape of a cube: `wavelengths x frames x height x width`.
///
/// `wavelengths == 1` is ADI mode (3-D cube). Geometry is derived from the
/// pixel data and recomputed after every crop; it is never edited in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CubeGeometry {
    pub wavelengths: usize,
    pub frames: usize,
    pub height: usize,
    pub width: usize,
}

impl CubeGeometry {
    /// Describe an array shape in `[frames, y, x]` or
    /// `[wavelengths, frames, y, x]` order.
    pub fn from_shape(shape: &[usize]) -> Result<Self> {
        let geometry = match *shape {
            [frames, height, width] => Self {
                wavelengths: 1,
                frames,
                height,
                width,
            },
            [wavelengths, frames, height, width] => Self {
                wavelengths,
                frames,
                height,
                width,
            },
            _ => {
                return Err(HciError::Shape(format!(
                    "cube must have 3 (ADI) or 4 (IFS) axes, got shape {:?}",
                    shape
                )));
            }
        };
        if shape.contains(&0) {
            return Err(HciError::Shape(format!(
                "cube axes must be non-empty, got shape {:?}",
                shape
            )));
        }
        Ok(geometry)
    }

    /// Shape in array order, with the wavelength axis only when `ifs` is set.
    pub fn shape(&self, ifs: bool) -> Vec<usize> {
        if ifs {
            vec![self.wavelengths, self.frames, self.height, self.width]
        } else {
            vec![self.frames, self.height, self.width]
        }
    }

    /// Fails unless frames are square.
    pub fn require_square(&self) -> Result<()> {
        if self.height != self.width {
            return Err(HciError::Shape(format!(
                "frames must be square, got {}x{} (height x width)",
                self.height, self.width
            )));
        }
        Ok(())
    }

    /// Integer centre pixel `(x, y)`: the middle pixel for odd sizes, the
    /// pixel just past the middle for even sizes.
    pub fn frame_center(&self) -> (usize, usize) {
        (frame_center(self.width), frame_center(self.height))
    }
}

/// Centre index of an axis of length `n`.
#[inline]
pub fn frame_center(n: usize) -> usize {
    n / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_shape_adi() {
        let g = CubeGeometry::from_shape(&[61, 200, 200]).unwrap();
        assert_eq!(g.wavelengths, 1);
        assert_eq!(g.frames, 61);
        assert_eq!((g.height, g.width), (200, 200));
        assert_eq!(g.shape(false), vec![61, 200, 200]);
    }

    #[test]
    fn test_from_shape_ifs() {
        let g = CubeGeometry::from_shape(&[4, 50, 100, 100]).unwrap();
        assert_eq!(g.wavelengths, 4);
        assert_eq!(g.frames, 50);
        assert_eq!(g.shape(true), vec![4, 50, 100, 100]);
    }

    #[test]
    fn test_from_shape_rejects_other_ranks() {
        for shape in [&[10, 10][..], &[1, 2, 3, 4, 5][..], &[][..]] {
            let err = CubeGeometry::from_shape(shape).unwrap_err();
            assert!(matches!(err, HciError::Shape(_)), "shape {:?}", shape);
        }
    }

    #[test]
    fn test_from_shape_rejects_empty_axis() {
        assert!(CubeGeometry::from_shape(&[10, 0, 32]).is_err());
        assert!(CubeGeometry::from_shape(&[0, 10, 32, 32]).is_err());
    }

    #[test]
    fn test_require_square() {
        CubeGeometry::from_shape(&[5, 32, 32])
            .unwrap()
            .require_square()
            .unwrap();
        let err = CubeGeometry::from_shape(&[5, 32, 40])
            .unwrap()
            .require_square()
            .unwrap_err();
        assert!(matches!(err, HciError::Shape(_)));
    }

    #[test]
    fn test_frame_center_parity() {
        assert_eq!(frame_center(21), 10);
        assert_eq!(frame_center(20), 10);
        assert_eq!(frame_center(1), 0);
        let g = CubeGeometry::from_shape(&[1, 9, 12]).unwrap();
        assert_eq!(g.frame_center(), (6, 4));
    }
}
