//! hcikit - high-contrast imaging dataset preparation.
//!
//! Ingests ADI (`frames x y x x`) and IFS (`wavelengths x frames x y x x`)
//! science cubes together with their parallactic angles and an off-axis
//! reference PSF, validates them against each other, and prepares them for
//! post-processing:
//! - frame cropping with centre-preserving parity rules
//! - PSF recentering, odd-sizing and flux normalization
//! - frame selection and collapse
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use hcikit::{HciDataset, InstrumentPresets};
//!
//! let scale = InstrumentPresets::builtin().pixel_scale("VLT_NACO")?;
//! let mut dataset = HciDataset::construct(cube, angles, psf, scale, None)?;
//! dataset.crop_frames(100, false)?;
//! dataset.normalize_psf(Some(21), true)?;
//! println!("FWHM = {:?} px", dataset.fwhm());
//! ```

pub mod array;
pub mod config;
pub mod cube;
mod dataset;
pub mod error;
pub mod psf;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Errors and raw input
// ============================================================================

pub use array::{ArrayLoader, NdArray};
pub use error::{HciError, Result};

// ============================================================================
// Configuration
// ============================================================================

pub use config::{
    CentroidMethod, DatasetConfig, InstrumentPreset, InstrumentPresets, PsfNormalization,
    PsfNormalizeConfig,
};

// ============================================================================
// Cubes and PSF
// ============================================================================

pub use cube::{CollapseMode, CropWindow, Cube, CubeGeometry, FrameCropper, FrameStack};
pub use psf::{CentroidFit, NormalizedPsf, Psf, PsfModel, PsfNormalizer};

// ============================================================================
// Dataset
// ============================================================================

pub use dataset::{DatasetPaths, HciDataset};
