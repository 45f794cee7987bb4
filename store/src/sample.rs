use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two interchangeable classifier backends.
///
/// Wire names are the human-readable strings clients send in
/// `ml_model_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelType {
    #[serde(rename = "Logistic Regression")]
    LogisticRegression,
    #[serde(rename = "Spectrogram CNN")]
    SpectrogramCnn,
}

impl ModelType {
    /// Every model type, in wire-name order.
    pub const ALL: [ModelType; 2] = [ModelType::LogisticRegression, ModelType::SpectrogramCnn];

    /// Wire name (e.g. `"Spectrogram CNN"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LogisticRegression => "Logistic Regression",
            Self::SpectrogramCnn => "Spectrogram CNN",
        }
    }

    /// File-system friendly name (e.g. `"spectrogram_cnn"`).
    pub fn slug(&self) -> &'static str {
        match self {
            Self::LogisticRegression => "logistic_regression",
            Self::SpectrogramCnn => "spectrogram_cnn",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a wire string names no known model type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownModelType(pub String);

impl fmt::Display for UnknownModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown model type: {}", self.0)
    }
}

impl std::error::Error for UnknownModelType {}

impl FromStr for ModelType {
    type Err = UnknownModelType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownModelType(s.to_string()))
    }
}

/// A labeled audio recording destined for one model type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledSample {
    pub raw_audio: Vec<f32>,
    #[serde(rename = "audio_label")]
    pub label: String,
    pub model_type: ModelType,
}

impl LabeledSample {
    pub fn new(raw_audio: Vec<f32>, label: impl Into<String>, model_type: ModelType) -> Self {
        Self { raw_audio, label: label.into(), model_type }
    }
}

/// A sample as persisted, with its store-assigned identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSample {
    /// Monotonically increasing, never reused, even after a clear.
    pub id: u64,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub sample: LabeledSample,
}

impl fmt::Display for StoredSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{id: {}, created_at: {}, model_type: {}, audio_label: {}, raw_audio: {} samples}}",
            self.id,
            self.created_at.to_rfc3339(),
            self.sample.model_type,
            self.sample.label,
            self.sample.raw_audio.len(),
        )
    }
}

/// Number of stored samples for one `(model_type, label)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelCount {
    pub model_type: ModelType,
    pub label: String,
    pub count: usize,
}

impl fmt::Display for LabelCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Model Type: {}, Audio Label: {}, Count: {}",
            self.model_type, self.label, self.count
        )
    }
}
