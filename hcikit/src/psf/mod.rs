//! Reference PSF storage and normalization.
//!
//! [`PsfNormalizer`] turns a raw off-axis stamp into an analysis-ready model:
//! repair isolated hot pixels, locate the sub-pixel centre, shift it onto the centre pixel of the output
//! stamp while cropping to the requested size, then scale the flux.

pub mod centroid;
pub mod hot_pixel;
pub mod lm_optimizer;
pub mod linear_solver;
pub mod resample;


use common::Buffer2;
use glam::DVec2;
use tracing::debug;

use crate::array::NdArray;
use crate::config::{PsfNormalization, PsfNormalizeConfig};
use crate::cube::geometry::frame_center;
use crate::error::{HciError, Result};

pub use centroid::{CentroidFit, FWHM_PER_SIGMA};

// ============================================================================
// Raw PSF
// ============================================================================

/// Reference PSF as supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Psf {
    /// One stamp for every channel.
    Single(Buffer2<f32>),
    /// One stamp per wavelength channel (IFS only).
    PerChannel(Vec<Buffer2<f32>>),
}

impl Psf {
    /// Rank 2 becomes a single stamp, rank 3 one stamp per outer slice.
    pub fn from_array(array: NdArray) -> Result<Self> {
        match array.rank() {
            2 => {
                let mut planes = array.into_planes()?;
                Ok(Psf::Single(planes.remove(0)))
            }
            3 => Ok(Psf::PerChannel(array.into_planes()?)),
            _ => Err(HciError::Shape(format!(
                "PSF must have 2 or 3 axes, got shape {:?}",
                array.shape()
            ))),
        }
    }

    pub fn stamps(&self) -> &[Buffer2<f32>] {
        match self {
            Psf::Single(stamp) => std::slice::from_ref(stamp),
            Psf::PerChannel(stamps) => stamps,
        }
    }

    pub fn is_per_channel(&self) -> bool {
        matches!(self, Psf::PerChannel(_))
    }

    /// Stamp used for wavelength channel `channel`.
    pub fn for_channel(&self, channel: usize) -> &Buffer2<f32> {
        match self {
            Psf::Single(stamp) => stamp,
            Psf::PerChannel(stamps) => &stamps[channel],
        }
    }

    /// Check stamp sizes: non-empty, all equal, odd unless `allow_even`.
    pub(crate) fn validate_shape(&self, allow_even: bool) -> Result<()> {
        let stamps = self.stamps();
        let Some(first) = stamps.first() else {
            return Err(HciError::Shape("PSF holds no stamp".into()));
        };
        let (width, height) = first.dim();
        if width == 0 || height == 0 {
            return Err(HciError::Shape("PSF stamp is empty".into()));
        }
        if stamps.iter().any(|s| s.dim() != (width, height)) {
            return Err(HciError::Shape(
                "PSF channel stamps differ in size".into(),
            ));
        }
        if !allow_even && (width % 2 == 0 || height % 2 == 0) {
            return Err(HciError::Shape(format!(
                "PSF stamp is {}x{}; both sides must be odd (set allow_even_psf to accept even sizes)",
                height, width
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Normalized PSF
// ============================================================================

/// One normalized stamp with the measurements taken while producing it.
#[derive(Debug, Clone, PartialEq)]
pub struct PsfModel {
    pub stamp: Buffer2<f32>,
    /// Fitted centre in input stamp coordinates.
    pub centroid: DVec2,
    /// FWHM in pixels.
    pub fwhm: f64,
    /// Factor applied to the recentered stamp.
    pub scale: f64,
}

/// Result of normalizing a [`Psf`]; mirrors its single/per-channel layout.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPsf {
    models: Vec<PsfModel>,
    per_channel: bool,
    config: PsfNormalizeConfig,
}

impl NormalizedPsf {
    pub fn models(&self) -> &[PsfModel] {
        &self.models
    }

    /// The normalized stamp (first channel for per-channel PSFs).
    pub fn stamp(&self) -> &Buffer2<f32> {
        &self.models[0].stamp
    }

    pub fn for_channel(&self, channel: usize) -> &PsfModel {
        if self.per_channel {
            &self.models[channel]
        } else {
            &self.models[0]
        }
    }

    pub fn is_per_channel(&self) -> bool {
        self.per_channel
    }

    /// Side length of the normalized stamps.
    pub fn size(&self) -> usize {
        self.models[0].stamp.width()
    }

    /// FWHM per stamp, in pixels.
    pub fn fwhm(&self) -> Vec<f64> {
        self.models.iter().map(|m| m.fwhm).collect()
    }

    /// Options the stamps were produced with.
    pub fn config(&self) -> &PsfNormalizeConfig {
        &self.config
    }
}

// ============================================================================
// Normalizer
// ============================================================================

/// Recenters, crops and flux-normalizes PSF stamps.
#[derive(Debug, Clone, Default)]
pub struct PsfNormalizer {
    config: PsfNormalizeConfig,
}

impl PsfNormalizer {
    pub fn new(config: PsfNormalizeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PsfNormalizeConfig {
        &self.config
    }

    /// Normalize every stamp of `psf`; fails as a whole if any stamp fails.
    pub fn normalize_psf(&self, psf: &Psf) -> Result<NormalizedPsf> {
        let models = psf
            .stamps()
            .iter()
            .enumerate()
            .map(|(channel, stamp)| {
                self.normalize(stamp).map_err(|err| match err {
                    HciError::Fit(msg) if psf.is_per_channel() => {
                        HciError::Fit(format!("channel {}: {}", channel, msg))
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(NormalizedPsf {
            models,
            per_channel: psf.is_per_channel(),
            config: self.config.clone(),
        })
    }

    /// Normalize a single stamp. The input is never modified.
    pub fn normalize(&self, stamp: &Buffer2<f32>) -> Result<PsfModel> {
        validate_stamp(stamp)?;
        let size = self.output_size(stamp)?;

        let (stamp, repaired) = hot_pixel::repair(stamp);
        if repaired > 0 {
            debug!(repaired, "replaced hot pixels in PSF stamp");
        }

        let fit = centroid::locate(
            &stamp,
            self.config.centroid,
            self.config.fit_radius,
            self.config.max_iterations,
        )?;
        let fwhm = fit.fwhm();

        let mut output = resample::recenter_crop(&stamp, fit.pos, size);
        let denominator = flux_reference(&output, self.config.normalization, fwhm);
        if !(denominator.is_finite() && denominator > 0.0) {
            return Err(HciError::Fit(format!(
                "normalization reference is {} after recentering",
                denominator
            )));
        }
        let scale = 1.0 / denominator;
        output.scale(scale as f32);

        debug!(
            x = fit.pos.x,
            y = fit.pos.y,
            fwhm,
            size,
            iterations = fit.iterations,
            "normalized PSF stamp"
        );

        Ok(PsfModel {
            stamp: output,
            centroid: fit.pos,
            fwhm,
            scale,
        })
    }

    /// Resolve the output side length and enforce the parity policy.
    fn output_size(&self, stamp: &Buffer2<f32>) -> Result<usize> {
        self.config.validate()?;
        let extent = stamp.width().min(stamp.height());
        let size = self.config.size.unwrap_or(extent);
        if size == 0 || size > extent {
            return Err(HciError::Config(format!(
                "PSF size {} must be in 1..={}",
                size, extent
            )));
        }
        if self.config.force_odd && size % 2 == 0 {
            return Err(HciError::Config(format!(
                "PSF size {} is even but force_odd is set",
                size
            )));
        }
        Ok(size)
    }
}

fn validate_stamp(stamp: &Buffer2<f32>) -> Result<()> {
    if stamp.is_empty() {
        return Err(HciError::Fit("PSF stamp is empty".into()));
    }
    if !stamp.all_finite() {
        return Err(HciError::Fit("PSF stamp contains non-finite values".into()));
    }
    let peak = stamp.max_with_position().map_or(0.0, |(v, _, _)| v);
    if peak <= 0.0 || stamp.sum() <= 0.0 {
        return Err(HciError::Fit(
            "PSF stamp has no positive flux".into(),
        ));
    }
    Ok(())
}

/// Value that must become 1.0 after scaling.
fn flux_reference(stamp: &Buffer2<f32>, normalization: PsfNormalization, fwhm: f64) -> f64 {
    match normalization {
        PsfNormalization::Peak => stamp.max_with_position().map_or(0.0, |(v, _, _)| v as f64),
        PsfNormalization::TotalFlux => stamp.sum(),
        PsfNormalization::ApertureFlux { fwhm_factor } => {
            let radius = 0.5 * fwhm_factor as f64 * fwhm;
            aperture_flux(stamp, radius)
        }
    }
}

/// Sum of pixels whose centres lie within `radius` of the stamp centre.
pub fn aperture_flux(stamp: &Buffer2<f32>, radius: f64) -> f64 {
    let cx = frame_center(stamp.width()) as f64;
    let cy = frame_center(stamp.height()) as f64;
    let r2 = radius * radius;
    let mut flux = 0.0f64;
    for y in 0..stamp.height() {
        let dy = y as f64 - cy;
        for x in 0..stamp.width() {
            let dx = x as f64 - cx;
            if dx * dx + dy * dy <= r2 {
                flux += stamp[(x, y)] as f64;
            }
        }
    }
    flux
}
