use thiserror::Error;

/// Errors raised by dataset construction and preprocessing.
///
/// Every failure is scoped to the operation that raised it: the dataset is
/// left exactly as it was before the call.
#[derive(Debug, Error)]
pub enum HciError {
    /// Rank or dimension violation (wrong number of axes, zero-sized axis,
    /// non-square frames, window outside the frame).
    #[error("shape error: {0}")]
    Shape(String),

    /// Two entities that must align 1:1 disagree in length.
    #[error("dimension mismatch: {what} (expected {expected}, got {actual})")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Invalid caller-supplied option.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Centroid fitting or flux normalization failed.
    #[error("PSF fit failed: {0}")]
    Fit(String),

    /// The crop would discard signal and `force` was not set.
    #[error("unsafe crop: {0}")]
    UnsafeCrop(String),

    /// The array loader failed; the source error is passed through untouched.
    #[error("failed to load '{path}': {source}")]
    Load {
        path: std::path::PathBuf,
        source: anyhow::Error,
    },

    #[error("failed to parse instrument presets: {0}")]
    Preset(#[from] serde_yml::Error),
}

pub type Result<T> = std::result::Result<T, HciError>;

impl HciError {
    pub(crate) fn mismatch(what: &'static str, expected: usize, actual: usize) -> Self {
        HciError::DimensionMismatch {
            what,
            expected,
            actual,
        }
    }
}
