//! The HCI dataset aggregate: science cube, parallactic angles, reference PSF
//! and (for IFS) the wavelength axis, plus the preprocessing steps applied to
//! them.

use std::path::PathBuf;

use common::Buffer2;
use tracing::{debug, info};

use crate::array::{self, ArrayLoader, NdArray};
use crate::config::{DatasetConfig, PsfNormalizeConfig, validate_pixel_scale};
use crate::cube::{CollapseMode, Cube, CubeGeometry, FrameCropper};
use crate::error::{HciError, Result};
use crate::psf::{NormalizedPsf, Psf, PsfNormalizer};


/// Where [`HciDataset::load`] finds each array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetPaths {
    pub cube: PathBuf,
    pub angles: PathBuf,
    pub psf: PathBuf,
    /// Required for 4-D (IFS) cubes, absent for ADI.
    pub wavelengths: Option<PathBuf>,
}

/// Analysis-ready high-contrast imaging dataset.
///
/// Invariants, established at construction and kept by every operation:
/// - one angle per frame;
/// - wavelengths present exactly when the cube is IFS, one per channel;
/// - PSF stamps odd-sized unless [`DatasetConfig::allow_even_psf`];
/// - finite, positive pixel scale.
///
/// Operations are all-or-nothing: on error the dataset is unchanged.
#[derive(Debug, Clone)]
pub struct HciDataset {
    cube: Cube,
    angles: Vec<f64>,
    psf: Psf,
    normalized_psf: Option<NormalizedPsf>,
    pixel_scale: f64,
    config: DatasetConfig,
}

impl HciDataset {
    /// Build a dataset from raw arrays with the default configuration.
    ///
    /// `cube` is `[frames, y, x]` (ADI) or `[wavelengths, frames, y, x]` (IFS);
    /// `psf` is `[y, x]` or, for IFS, `[wavelengths, y, x]`.
    pub fn construct(
        cube: NdArray,
        angles: Vec<f64>,
        psf: NdArray,
        pixel_scale: f64,
        wavelengths: Option<Vec<f64>>,
    ) -> Result<Self> {
        Self::construct_with_config(
            cube,
            angles,
            psf,
            pixel_scale,
            wavelengths,
            DatasetConfig::default(),
        )
    }

    pub fn construct_with_config(
        cube: NdArray,
        angles: Vec<f64>,
        psf: NdArray,
        pixel_scale: f64,
        wavelengths: Option<Vec<f64>>,
        config: DatasetConfig,
    ) -> Result<Self> {
        let cube = Cube::from_array(cube, wavelengths)?;
        let psf = Psf::from_array(psf)?;
        Self::new(cube, angles, psf, pixel_scale, config)
    }

    /// Build a dataset from already typed parts.
    pub fn new(
        cube: Cube,
        angles: Vec<f64>,
        psf: Psf,
        pixel_scale: f64,
        config: DatasetConfig,
    ) -> Result<Self> {
        config.validate()?;
        validate_pixel_scale(pixel_scale)?;

        let geometry = cube.geometry();
        if angles.len() != geometry.frames {
            return Err(HciError::mismatch(
                "angles vs cube frames",
                geometry.frames,
                angles.len(),
            ));
        }
        if let Some(bad) = angles.iter().find(|a| !a.is_finite()) {
            return Err(HciError::Config(format!("angles must be finite, got {}", bad)));
        }

        psf.validate_shape(config.allow_even_psf)?;
        if let Psf::PerChannel(stamps) = &psf {
            if stamps.len() != geometry.wavelengths {
                return Err(HciError::mismatch(
                    "PSF stamps vs wavelength channels",
                    geometry.wavelengths,
                    stamps.len(),
                ));
            }
        }

        info!(
            mode = if cube.is_ifs() { "IFS" } else { "ADI" },
            shape = ?cube.shape(),
            psf_stamps = psf.stamps().len(),
            pixel_scale,
            "constructed HCI dataset"
        );

        Ok(Self {
            cube,
            angles,
            psf,
            normalized_psf: None,
            pixel_scale,
            config,
        })
    }

    /// Load every array through `loader` and construct the dataset.
    ///
    /// Angle and wavelength arrays may have any rank; they are flattened.
    pub fn load(
        loader: &dyn ArrayLoader,
        paths: &DatasetPaths,
        pixel_scale: f64,
        config: DatasetConfig,
    ) -> Result<Self> {
        debug!(cube = %paths.cube.display(), "loading HCI dataset");
        let cube = array::load(loader, &paths.cube)?;
        let angles = array::load(loader, &paths.angles)?.flatten_f64();
        let psf = array::load(loader, &paths.psf)?;
        let wavelengths = paths
            .wavelengths
            .as_deref()
            .map(|path| array::load(loader, path).map(|a| a.flatten_f64()))
            .transpose()?;
        Self::construct_with_config(cube, angles, psf, pixel_scale, wavelengths, config)
    }

    // ------------------------------------------------------------------------
    // Preprocessing
    // ------------------------------------------------------------------------

    /// Crop every frame to `size x size` around the frame centre.
    ///
    /// Without `force`, crops that would shift the star centre by half a pixel
    /// or cut inside the guard radius are refused with
    /// [`HciError::UnsafeCrop`].
    pub fn crop_frames(&mut self, size: usize, force: bool) -> Result<()> {
        let cropped = self.cropper().crop(&self.cube, size, force)?;
        self.replace_cube(cropped);
        Ok(())
    }

    /// Crop every frame to `size x size` around the pixel `center = (x, y)`.
    pub fn crop_frames_at(&mut self, size: usize, center: (usize, usize), force: bool) -> Result<()> {
        let cropped = self.cropper().crop_at(&self.cube, size, center, force)?;
        self.replace_cube(cropped);
        Ok(())
    }

    /// Normalize the PSF with the dataset's configured options, overriding the
    /// output size and parity policy.
    pub fn normalize_psf(&mut self, size: Option<usize>, force_odd: bool) -> Result<&NormalizedPsf> {
        let config = self.config.psf.with_size(size, force_odd);
        self.normalize_psf_with(&config)
    }

    /// Normalize the PSF with explicit options. The raw PSF is left untouched;
    /// on failure the previous normalized PSF is kept.
    pub fn normalize_psf_with(&mut self, config: &PsfNormalizeConfig) -> Result<&NormalizedPsf> {
        let normalized = PsfNormalizer::new(config.clone()).normalize_psf(&self.psf)?;
        info!(
            size = normalized.size(),
            fwhm = ?normalized.fwhm(),
            normalization = ?config.normalization,
            "normalized PSF"
        );
        Ok(self.normalized_psf.insert(normalized))
    }

    /// Keep frames `first..=last` on every channel, with their angles.
    pub fn keep_frames(&mut self, first: usize, last: usize) -> Result<()> {
        let cube = self.cube.map_stacks(|stack| stack.select(first, last))?;
        self.angles = self.angles[first..=last].to_vec();
        info!(first, last, frames = cube.frame_count(), "selected frames");
        self.cube = cube;
        Ok(())
    }

    /// Combine the frames of each channel into one image per channel.
    pub fn collapse(&self, mode: CollapseMode) -> Vec<Buffer2<f32>> {
        self.cube.collapse(mode)
    }

    fn cropper(&self) -> FrameCropper {
        FrameCropper::new(self.config.crop_guard_radius)
    }

    fn replace_cube(&mut self, cube: Cube) {
        info!(shape = ?cube.shape(), "cropped frames");
        self.cube = cube;
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn cube(&self) -> &Cube {
        &self.cube
    }

    pub fn geometry(&self) -> CubeGeometry {
        self.cube.geometry()
    }

    pub fn is_ifs(&self) -> bool {
        self.cube.is_ifs()
    }

    /// Parallactic angles in degrees, one per frame.
    pub fn angles(&self) -> &[f64] {
        &self.angles
    }

    pub fn psf(&self) -> &Psf {
        &self.psf
    }

    pub fn normalized_psf(&self) -> Option<&NormalizedPsf> {
        self.normalized_psf.as_ref()
    }

    /// FWHM (pixels) per PSF stamp from the last normalization.
    pub fn fwhm(&self) -> Option<Vec<f64>> {
        self.normalized_psf.as_ref().map(NormalizedPsf::fwhm)
    }

    pub fn wavelengths(&self) -> Option<&[f64]> {
        self.cube.wavelengths()
    }

    /// Arcseconds per pixel.
    pub fn pixel_scale(&self) -> f64 {
        self.pixel_scale
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }
}
