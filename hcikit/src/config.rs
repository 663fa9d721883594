//! Configuration types for dataset construction and PSF normalization.
//!
//! All options are plain data with sensible defaults. Instrument pixel scales
//! live in an explicit [`InstrumentPresets`] table that callers pass around;
//! nothing here is process-global.

use serde::{Deserialize, Serialize};

use crate::error::{HciError, Result};

// ============================================================================
// Enums
// ============================================================================

/// How the recentered PSF is scaled.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PsfNormalization {
    /// Brightest pixel equals 1.0.
    #[default]
    Peak,
    /// Sum over the whole stamp equals 1.0.
    TotalFlux,
    /// Flux inside a circular aperture of diameter `fwhm_factor * FWHM`,
    /// centred on the stamp centre, equals 1.0.
    ApertureFlux { fwhm_factor: f32 },
}

/// Method used to locate the PSF centre before recentering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CentroidMethod {
    /// 2D Gaussian profile fit (Levenberg-Marquardt). Robust to asymmetric
    /// and noisy AO cores.
    #[default]
    GaussianFit,
    /// Iterative Gaussian-weighted first moments. Faster, slightly less
    /// accurate on asymmetric profiles.
    Moments,
}

// ============================================================================
// PSF normalization
// ============================================================================

/// Options for [`PsfNormalizer`](crate::PsfNormalizer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PsfNormalizeConfig {
    /// Output side length. `None` keeps the input extent.
    pub size: Option<usize>,
    /// Reject even output sizes with a configuration error.
    pub force_odd: bool,
    pub normalization: PsfNormalization,
    pub centroid: CentroidMethod,
    /// Half-width of the window around the brightest pixel used for the
    /// centroid fit. Clamped to the stamp.
    pub fit_radius: usize,
    /// Iteration cap for the centroid search.
    pub max_iterations: usize,
}

impl Default for PsfNormalizeConfig {
    fn default() -> Self {
        Self {
            size: None,
            force_odd: true,
            normalization: PsfNormalization::default(),
            centroid: CentroidMethod::default(),
            fit_radius: 10,
            max_iterations: 100,
        }
    }
}

impl PsfNormalizeConfig {
    /// Copy of this config with a different output size and parity policy.
    pub fn with_size(&self, size: Option<usize>, force_odd: bool) -> Self {
        Self {
            size,
            force_odd,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(size) = self.size {
            if size == 0 {
                return Err(HciError::Config("PSF size must be positive".into()));
            }
            if self.force_odd && size % 2 == 0 {
                return Err(HciError::Config(format!(
                    "PSF size {} is even but force_odd is set",
                    size
                )));
            }
        }
        if let PsfNormalization::ApertureFlux { fwhm_factor } = self.normalization {
            if !(fwhm_factor.is_finite() && fwhm_factor > 0.0) {
                return Err(HciError::Config(format!(
                    "aperture fwhm_factor must be positive, got {}",
                    fwhm_factor
                )));
            }
        }
        if self.fit_radius < 2 {
            return Err(HciError::Config(format!(
                "fit_radius must be at least 2, got {}",
                self.fit_radius
            )));
        }
        if self.max_iterations == 0 {
            return Err(HciError::Config("max_iterations must be positive".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Dataset
// ============================================================================

/// Options fixed at dataset construction.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Accept PSF stamps with an even height or width.
    pub allow_even_psf: bool,
    /// Radius (pixels) around the frame centre that a non-forced crop must
    /// keep. `None` disables the check.
    pub crop_guard_radius: Option<usize>,
    /// Defaults used by [`HciDataset::normalize_psf`](crate::HciDataset::normalize_psf).
    pub psf: PsfNormalizeConfig,
}

impl DatasetConfig {
    pub fn validate(&self) -> Result<()> {
        self.psf.validate()
    }
}

// ============================================================================
// Instrument presets
// ============================================================================

/// Named instrument mode with its detector plate scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentPreset {
    pub name: String,
    /// Arcseconds per pixel.
    pub pixel_scale: f64,
}

/// Table of instrument presets.
///
/// ```yaml
/// presets:
///   - name: VLT_NACO
///     pixel_scale: 0.02719
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentPresets {
    pub presets: Vec<InstrumentPreset>,
}

impl Default for InstrumentPresets {
    fn default() -> Self {
        Self::builtin()
    }
}

impl InstrumentPresets {
    /// Plate scales of the instruments the reference datasets come from.
    pub fn builtin() -> Self {
        let preset = |name: &str, pixel_scale: f64| InstrumentPreset {
            name: name.to_string(),
            pixel_scale,
        };
        Self {
            presets: vec![
                preset("VLT_NACO", 0.02719),
                preset("VLT_SPHERE_IFS", 0.00746),
                preset("VLT_SPHERE_IRDIS", 0.01225),
            ],
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let presets: Self = serde_yml::from_str(yaml)?;
        for p in &presets.presets {
            validate_pixel_scale(p.pixel_scale)?;
        }
        Ok(presets)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yml::to_string(self)?)
    }

    /// Look up a preset by name (case-insensitive).
    pub fn get(&self, name: &str) -> Result<&InstrumentPreset> {
        self.presets
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| HciError::Config(format!("unknown instrument preset '{}'", name)))
    }

    pub fn pixel_scale(&self, name: &str) -> Result<f64> {
        self.get(name).map(|p| p.pixel_scale)
    }
}

pub(crate) fn validate_pixel_scale(pixel_scale: f64) -> Result<()> {
    if pixel_scale.is_finite() && pixel_scale > 0.0 {
        Ok(())
    } else {
        Err(HciError::Config(format!(
            "pixel scale must be positive and finite, got {}",
            pixel_scale
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_psf_config_is_valid() {
        PsfNormalizeConfig::default().validate().unwrap();
        DatasetConfig::default().validate().unwrap();
    }

    #[test]
    fn test_even_size_with_force_odd_rejected() {
        let config = PsfNormalizeConfig::default().with_size(Some(20), true);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, HciError::Config(ref msg) if msg.contains("20")));
    }

    #[test]
    fn test_even_size_without_force_odd_accepted() {
        PsfNormalizeConfig::default()
            .with_size(Some(20), false)
            .validate()
            .unwrap();
    }

    #[test]
    fn test_zero_size_rejected() {
        let config = PsfNormalizeConfig::default().with_size(Some(0), false);
        assert!(matches!(config.validate(), Err(HciError::Config(_))));
    }

    #[test]
    fn test_aperture_factor_must_be_positive() {
        let config = PsfNormalizeConfig {
            normalization: PsfNormalization::ApertureFlux { fwhm_factor: 0.0 },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(HciError::Config(_))));
    }

    #[test]
    fn test_fit_radius_lower_bound() {
        let config = PsfNormalizeConfig {
            fit_radius: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builtin_presets() {
        let presets = InstrumentPresets::builtin();
        assert_eq!(presets.pixel_scale("VLT_NACO").unwrap(), 0.02719);
        assert_eq!(presets.pixel_scale("vlt_sphere_ifs").unwrap(), 0.00746);
        assert!(matches!(
            presets.get("KECK_NIRC2"),
            Err(HciError::Config(_))
        ));
    }

    #[test]
    fn test_presets_from_yaml() {
        let yaml = "presets:\n  - name: LBT_LMIRCAM\n    pixel_scale: 0.0107\n";
        let presets = InstrumentPresets::from_yaml_str(yaml).unwrap();
        assert_eq!(presets.presets.len(), 1);
        assert_eq!(presets.pixel_scale("LBT_LMIRCAM").unwrap(), 0.0107);
    }

    #[test]
    fn test_presets_yaml_rejects_bad_scale() {
        let yaml = "presets:\n  - name: BROKEN\n    pixel_scale: -1.0\n";
        assert!(matches!(
            InstrumentPresets::from_yaml_str(yaml),
            Err(HciError::Config(_))
        ));
    }

    #[test]
    fn test_presets_yaml_parse_error() {
        assert!(matches!(
            InstrumentPresets::from_yaml_str("presets: 12"),
            Err(HciError::Preset(_))
        ));
    }

    #[test]
    fn test_presets_round_trip_through_yaml() {
        let presets = InstrumentPresets::builtin();
        let yaml = presets.to_yaml_string().unwrap();
        assert_eq!(InstrumentPresets::from_yaml_str(&yaml).unwrap(), presets);
    }

    #[test]
    fn test_dataset_config_from_yaml_uses_defaults() {
        let config: DatasetConfig =
            serde_yml::from_str("allow_even_psf: true\npsf:\n  normalization: total_flux\n")
                .unwrap();
        assert!(config.allow_even_psf);
        assert_eq!(config.crop_guard_radius, None);
        assert_eq!(config.psf.normalization, PsfNormalization::TotalFlux);
        assert!(config.psf.force_odd);
        assert_eq!(config.psf.fit_radius, 10);
    }
}
