//! Raw n-dimensional arrays as handed over by file loaders.
//!
//! The dataset never reads files itself. An [`ArrayLoader`] (FITS reader,
//! NumPy reader, in-memory fixture, ...) turns a path into an [`NdArray`] and
//! the dataset validates and reshapes it.

use std::path::Path;

use common::Buffer2;

use crate::error::{HciError, Result};

/// Row-major numeric array with an explicit shape (slowest axis first, as in
/// FITS/NumPy order: `[frames, y, x]` or `[wavelengths, frames, y, x]`).
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl NdArray {
    /// Wrap `data` with the given shape.
    ///
    /// Fails with [`HciError::Shape`] if the element count does not match the
    /// product of the shape.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let Some(expected) = shape.iter().try_fold(1usize, |acc, &n| acc.checked_mul(n)) else {
            return Err(HciError::Shape(format!(
                "array shape {:?} overflows the element count",
                shape
            )));
        };
        if shape.is_empty() || expected != data.len() {
            return Err(HciError::Shape(format!(
                "array shape {:?} holds {} elements but {} were given",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// One-dimensional array, e.g. a list of angles.
    pub fn from_vec(data: Vec<f32>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Flatten to a list of f64, whatever the rank (a `(61, 1)` angle table
    /// becomes 61 values).
    pub fn flatten_f64(&self) -> Vec<f64> {
        self.data.iter().map(|&v| v as f64).collect()
    }

    /// Split the array into its trailing 2-D planes.
    ///
    /// Rank 2 yields one plane, rank 3 yields `shape[0]` planes, rank 4 yields
    /// `shape[0] * shape[1]` planes in row-major order.
    pub(crate) fn into_planes(self) -> Result<Vec<Buffer2<f32>>> {
        let rank = self.rank();
        if rank < 2 {
            return Err(HciError::Shape(format!(
                "expected at least 2 axes, got shape {:?}",
                self.shape
            )));
        }
        let height = self.shape[rank - 2];
        let width = self.shape[rank - 1];
        if width == 0 || height == 0 {
            return Err(HciError::Shape(format!(
                "spatial axes must be non-empty, got shape {:?}",
                self.shape
            )));
        }
        let plane = width * height;
        Ok(self
            .data
            .chunks_exact(plane)
            .map(|chunk| Buffer2::new(width, height, chunk.to_vec()))
            .collect())
    }
}

impl From<Buffer2<f32>> for NdArray {
    fn from(buffer: Buffer2<f32>) -> Self {
        let (width, height) = buffer.dim();
        Self {
            shape: vec![height, width],
            data: buffer.into_vec(),
        }
    }
}

/// Source of numeric arrays (typically a FITS reader).
///
/// Errors are opaque to the dataset and surface as [`HciError::Load`].
pub trait ArrayLoader {
    fn load_array(&self, path: &Path) -> anyhow::Result<NdArray>;
}

pub(crate) fn load(loader: &dyn ArrayLoader, path: &Path) -> Result<NdArray> {
    loader.load_array(path).map_err(|source| HciError::Load {
        path: path.to_path_buf(),
        source,
    })
}
