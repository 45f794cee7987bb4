use thiserror::Error;

/// Errors returned by feature extraction.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FeatureError {
    #[error("features: audio is empty")]
    Empty,

    #[error("features: sample {index} is not a finite number")]
    NonFinite { index: usize },

    #[error("features: audio too short: need more than {min} samples, got {got}")]
    TooShort { min: usize, got: usize },

    #[error("features: invalid config: {0}")]
    InvalidConfig(String),
}
