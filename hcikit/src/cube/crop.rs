//! Square frame cropping shared by ADI and IFS cubes.

use tracing::debug;

use super::{Cube, CubeGeometry};
use crate::error::{HciError, Result};

/// Square window in frame coordinates; `x0..x0 + size`, `y0..y0 + size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub x0: usize,
    pub y0: usize,
    pub size: usize,
}

impl CropWindow {
    /// Window of side `size` whose centre pixel is `center`.
    ///
    /// Fails with [`HciError::Shape`] if the window leaves a `width x height`
    /// frame.
    pub fn around(center: (usize, usize), size: usize, width: usize, height: usize) -> Result<Self> {
        let half = size / 2;
        let (cx, cy) = center;
        let start = |c: usize, extent: usize| {
            c.checked_sub(half)
                .filter(|s| s.checked_add(size).is_some_and(|end| end <= extent))
        };
        match (start(cx, width), start(cy, height)) {
            (Some(x0), Some(y0)) => Ok(Self { x0, y0, size }),
            _ => Err(HciError::Shape(format!(
                "crop window of size {} around ({}, {}) leaves the {}x{} frame",
                size, cx, cy, height, width
            ))),
        }
    }

    pub fn covers(&self, width: usize, height: usize) -> bool {
        self.x0 == 0 && self.y0 == 0 && self.size == width && self.size == height
    }
}

/// Crops every frame of every channel to the same square window.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCropper {
    /// Minimum half-size a non-forced crop must keep.
    pub guard_radius: Option<usize>,
}

impl FrameCropper {
    pub fn new(guard_radius: Option<usize>) -> Self {
        Self { guard_radius }
    }

    /// Crop around the frame centre.
    pub fn crop(&self, cube: &Cube, size: usize, force: bool) -> Result<Cube> {
        let geometry = cube.geometry();
        let window = self.window(&geometry, size, geometry.frame_center(), force)?;
        apply(cube, window)
    }

    /// Crop around an explicit centre pixel `(x, y)`.
    pub fn crop_at(
        &self,
        cube: &Cube,
        size: usize,
        center: (usize, usize),
        force: bool,
    ) -> Result<Cube> {
        let geometry = cube.geometry();
        let window = self.window(&geometry, size, center, force)?;
        apply(cube, window)
    }

    /// Validate a crop request and resolve its window.
    pub fn window(
        &self,
        geometry: &CubeGeometry,
        size: usize,
        center: (usize, usize),
        force: bool,
    ) -> Result<CropWindow> {
        geometry.require_square()?;
        let extent = geometry.height;
        if size == 0 || size > extent {
            return Err(HciError::Shape(format!(
                "crop size {} must be in 1..={}",
                size, extent
            )));
        }

        if !force {
            if size % 2 != extent % 2 {
                return Err(HciError::UnsafeCrop(format!(
                    "crop size {} and frame size {} differ in parity; the star centre would \
                     shift by half a pixel (pass force to crop anyway)",
                    size, extent
                )));
            }
            if let Some(radius) = self.guard_radius {
                if size / 2 < radius {
                    return Err(HciError::UnsafeCrop(format!(
                        "crop size {} keeps only {} px around the centre, guard radius is {}",
                        size,
                        size / 2,
                        radius
                    )));
                }
            }
        }

        CropWindow::around(center, size, geometry.width, geometry.height)
    }
}

fn apply(cube: &Cube, window: CropWindow) -> Result<Cube> {
    let geometry = cube.geometry();
    if window.covers(geometry.width, geometry.height) {
        debug!(size = window.size, "crop covers the full frame, nothing to do");
        return Ok(cube.clone());
    }
    debug!(
        x0 = window.x0,
        y0 = window.y0,
        size = window.size,
        frames = geometry.frames,
        channels = geometry.wavelengths,
        "cropping frames"
    );
    cube.map_stacks(|stack| {
        stack.map_frames(|frame| frame.window(window.x0, window.y0, window.size, window.size))
    })
}
