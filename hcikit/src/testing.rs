//! Synthetic data generators for unit tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use common::Buffer2;

use crate::array::{ArrayLoader, NdArray};
use crate::cube::FrameStack;

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
/// Respects RUST_LOG env var, defaults to "info".
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Circular Gaussian of the given amplitude centred at `(cx, cy)`.
pub fn gaussian_stamp(
    width: usize,
    height: usize,
    cx: f64,
    cy: f64,
    sigma: f64,
    amplitude: f64,
) -> Buffer2<f32> {
    let two_sigma_sq = 2.0 * sigma * sigma;
    Buffer2::from_fn(width, height, |x, y| {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        (amplitude * (-(dx * dx + dy * dy) / two_sigma_sq).exp()) as f32
    })
}

/// Frame whose pixel values encode their position: `offset + x + 1000 * y`.
pub fn ramp_frame(width: usize, height: usize, offset: f32) -> Buffer2<f32> {
    Buffer2::from_fn(width, height, |x, y| offset + x as f32 + 1000.0 * y as f32)
}

/// `frames` identical constant frames.
pub fn constant_stack(frames: usize, width: usize, height: usize, value: f32) -> FrameStack {
    FrameStack::new(vec![Buffer2::new_filled(width, height, value); frames])
        .expect("valid frame stack")
}

/// Loader backed by a path -> array map.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    arrays: HashMap<PathBuf, NdArray>,
}

impl MemoryLoader {
    pub fn with(mut self, path: impl Into<PathBuf>, array: NdArray) -> Self {
        self.arrays.insert(path.into(), array);
        self
    }
}

impl ArrayLoader for MemoryLoader {
    fn load_array(&self, path: &Path) -> anyhow::Result<NdArray> {
        self.arrays
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("no such array: {}", path.display()))
    }
}
