//! Science cubes: ADI frame sequences and IFS multi-wavelength cubes.
//!
//! Both layouts reduce to a list of [`FrameStack`]s (one for ADI, one per
//! wavelength channel for IFS). Geometry operations are written once
//! against that list through [`Cube::stacks`] and [`Cube::map_stacks`].

pub mod crop;
pub mod geometry;


use common::Buffer2;
use serde::{Deserialize, Serialize};

pub use crop::{CropWindow, FrameCropper};
pub use geometry::CubeGeometry;

use crate::array::NdArray;
use crate::error::{HciError, Result};

/// Temporal sequence of equally sized frames.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameStack {
    frames: Vec<Buffer2<f32>>,
    width: usize,
    height: usize,
}

impl FrameStack {
    /// Build a stack, checking that every frame has the same size and that
    /// there is at least one non-empty frame.
    pub fn new(frames: Vec<Buffer2<f32>>) -> Result<Self> {
        let Some(first) = frames.first() else {
            return Err(HciError::Shape("frame stack must hold at least one frame".into()));
        };
        let (width, height) = first.dim();
        if width == 0 || height == 0 {
            return Err(HciError::Shape(format!(
                "frames must be non-empty, got {}x{}",
                height, width
            )));
        }
        if let Some((idx, frame)) = frames
            .iter()
            .enumerate()
            .find(|(_, f)| f.dim() != (width, height))
        {
            return Err(HciError::Shape(format!(
                "frame {} is {}x{}, expected {}x{}",
                idx,
                frame.height(),
                frame.width(),
                height,
                width
            )));
        }
        Ok(Self {
            frames,
            width,
            height,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn frame(&self, index: usize) -> &Buffer2<f32> {
        &self.frames[index]
    }

    pub fn frames(&self) -> &[Buffer2<f32>] {
        &self.frames
    }

    /// Apply `f` to every frame, producing a new stack.
    pub fn map_frames(&self, f: impl FnMut(&Buffer2<f32>) -> Buffer2<f32>) -> Result<Self> {
        Self::new(self.frames.iter().map(f).collect())
    }

    /// Keep the inclusive frame range `first..=last`.
    pub fn select(&self, first: usize, last: usize) -> Result<Self> {
        if first > last || last >= self.frames.len() {
            return Err(HciError::Shape(format!(
                "frame range {}..={} is invalid for {} frames",
                first,
                last,
                self.frames.len()
            )));
        }
        Self::new(self.frames[first..=last].to_vec())
    }

    /// Combine all frames pixel by pixel.
    pub fn collapse(&self, mode: CollapseMode) -> Buffer2<f32> {
        let n = self.frames.len();
        let mut column = vec![0.0f32; n];
        Buffer2::from_fn(self.width, self.height, |x, y| {
            for (slot, frame) in column.iter_mut().zip(&self.frames) {
                *slot = frame[(x, y)];
            }
            match mode {
                CollapseMode::Sum => column.iter().map(|&v| v as f64).sum::<f64>() as f32,
                CollapseMode::Mean => {
                    (column.iter().map(|&v| v as f64).sum::<f64>() / n as f64) as f32
                }
                CollapseMode::Median => median_f32_mut(&mut column),
            }
        })
    }
}

/// Frame-axis reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollapseMode {
    #[default]
    Median,
    Mean,
    Sum,
}

/// Median of a slice, reordering it in place. NaNs sort last.
fn median_f32_mut(values: &mut [f32]) -> f32 {
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) * 0.5
    }
}

/// Science cube in one of the two supported layouts.
#[derive(Debug, Clone, PartialEq)]
pub enum Cube {
    /// Single-wavelength sequence: `frames x y x x`.
    Adi(FrameStack),
    /// One frame sequence per wavelength: `wavelengths x frames x y x x`.
    Ifs {
        channels: Vec<FrameStack>,
        wavelengths: Vec<f64>,
    },
}

impl Cube {
    /// Build an IFS cube, checking channel/wavelength alignment and that all
    /// channels share the same frame count and size.
    pub fn ifs(channels: Vec<FrameStack>, wavelengths: Vec<f64>) -> Result<Self> {
        if channels.is_empty() {
            return Err(HciError::Shape("IFS cube must hold at least one channel".into()));
        }
        if wavelengths.len() != channels.len() {
            return Err(HciError::mismatch(
                "wavelengths vs cube channels",
                channels.len(),
                wavelengths.len(),
            ));
        }
        if let Some(bad) = wavelengths.iter().find(|w| !(w.is_finite() && **w > 0.0)) {
            return Err(HciError::Config(format!(
                "wavelengths must be positive and finite, got {}",
                bad
            )));
        }
        let first = &channels[0];
        for (idx, ch) in channels.iter().enumerate().skip(1) {
            if ch.len() != first.len() {
                return Err(HciError::mismatch(
                    "frames per IFS channel",
                    first.len(),
                    ch.len(),
                ));
            }
            if (ch.width(), ch.height()) != (first.width(), first.height()) {
                return Err(HciError::Shape(format!(
                    "channel {} frames are {}x{}, expected {}x{}",
                    idx,
                    ch.height(),
                    ch.width(),
                    first.height(),
                    first.width()
                )));
            }
        }
        Ok(Cube::Ifs {
            channels,
            wavelengths,
        })
    }

    /// Reshape a raw array into a cube.
    ///
    /// A 3-D array must come without wavelengths; a 4-D array requires one
    /// wavelength per outer slice.
    pub fn from_array(array: NdArray, wavelengths: Option<Vec<f64>>) -> Result<Self> {
        let geometry = CubeGeometry::from_shape(array.shape())?;
        let is_4d = array.rank() == 4;
        let wavelengths = wavelengths.filter(|w| !w.is_empty());
        match (is_4d, wavelengths) {
            (false, None) => Ok(Cube::Adi(FrameStack::new(array.into_planes()?)?)),
            (false, Some(w)) => Err(HciError::mismatch(
                "wavelengths given for a 3-D cube (expected none)",
                0,
                w.len(),
            )),
            (true, None) => Err(HciError::mismatch(
                "wavelengths required for a 4-D cube",
                geometry.wavelengths,
                0,
            )),
            (true, Some(w)) => {
                if w.len() != geometry.wavelengths {
                    return Err(HciError::mismatch(
                        "wavelengths vs cube channels",
                        geometry.wavelengths,
                        w.len(),
                    ));
                }
                let mut planes = array.into_planes()?.into_iter();
                let channels = (0..geometry.wavelengths)
                    .map(|_| FrameStack::new(planes.by_ref().take(geometry.frames).collect()))
                    .collect::<Result<Vec<_>>>()?;
                Cube::ifs(channels, w)
            }
        }
    }

    pub fn is_ifs(&self) -> bool {
        matches!(self, Cube::Ifs { .. })
    }

    /// The frame stacks of this cube, outermost axis first.
    pub fn stacks(&self) -> &[FrameStack] {
        match self {
            Cube::Adi(stack) => std::slice::from_ref(stack),
            Cube::Ifs { channels, .. } => channels,
        }
    }

    /// Rebuild the cube with every stack transformed by `f`, keeping the
    /// layout and the wavelength axis.
    pub fn map_stacks(&self, mut f: impl FnMut(&FrameStack) -> Result<FrameStack>) -> Result<Self> {
        match self {
            Cube::Adi(stack) => Ok(Cube::Adi(f(stack)?)),
            Cube::Ifs {
                channels,
                wavelengths,
            } => Cube::ifs(
                channels.iter().map(f).collect::<Result<Vec<_>>>()?,
                wavelengths.clone(),
            ),
        }
    }

    pub fn wavelengths(&self) -> Option<&[f64]> {
        match self {
            Cube::Adi(_) => None,
            Cube::Ifs { wavelengths, .. } => Some(wavelengths),
        }
    }

    pub fn geometry(&self) -> CubeGeometry {
        let stacks = self.stacks();
        let first = &stacks[0];
        CubeGeometry {
            wavelengths: stacks.len(),
            frames: first.len(),
            height: first.height(),
            width: first.width(),
        }
    }

    /// Shape in array order (3 axes for ADI, 4 for IFS).
    pub fn shape(&self) -> Vec<usize> {
        self.geometry().shape(self.is_ifs())
    }

    pub fn frame_count(&self) -> usize {
        self.stacks()[0].len()
    }

    /// Collapse the frame axis of every stack.
    pub fn collapse(&self, mode: CollapseMode) -> Vec<Buffer2<f32>> {
        self.stacks().iter().map(|s| s.collapse(mode)).collect()
    }

    /// Flatten back to a raw array.
    pub fn to_array(&self) -> Result<NdArray> {
        let data = self
            .stacks()
            .iter()
            .flat_map(|s| s.frames())
            .flat_map(|f| f.iter().copied())
            .collect();
        NdArray::new(self.shape(), data)
    }
}
