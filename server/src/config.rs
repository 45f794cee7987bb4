//! Server configuration.
//!
//! Loaded from a YAML file; every field has a default, so an empty file (or
//! no file at all) yields a working setup:
//!
//! ```yaml
//! listen: ":8000"
//! data_dir: data
//! model_dir: ml_models
//! store: redb
//! labels: [Chris, Reece]
//! enabled_models: ["Logistic Regression", "Spectrogram CNN"]
//! mel:
//!   sample_rate: 44100
//!   n_fft: 2048
//!   hop_length: 512
//!   n_mels: 128
//! logistic:
//!   max_iter: 100
//!   learning_rate: 0.1
//!   c: 1.0
//! cnn:
//!   n_frames: 44
//!   epochs: 5
//!   batch_size: 32
//!   learning_rate: 0.001
//! write_through:
//!   logistic_regression: true
//!   spectrogram_cnn: false
//! slow_retrain_warn_secs: 30
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use voxclass_classifier::{CnnConfig, CnnTrainConfig, LogisticConfig, ModelDefaults, TrainConfig};
use voxclass_features::MelConfig;
use voxclass_store::ModelType;

/// Default listen address.
pub const DEFAULT_LISTEN: &str = ":8000";
/// File name of the redb sample database inside `data_dir`.
pub const SAMPLES_DB_FILE: &str = "samples.redb";

/// Which sample store backs the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Redb,
    Memory,
}

/// CNN architecture and optimizer settings. `n_mels` is taken from the
/// `mel` section and ignored here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CnnSection {
    #[serde(flatten)]
    pub architecture: CnnConfig,
    #[serde(flatten)]
    pub train: CnnTrainConfig,
}

/// Whether a retrain persists the new model immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteThrough {
    pub logistic_regression: bool,
    pub spectrogram_cnn: bool,
}

impl Default for WriteThrough {
    fn default() -> Self {
        Self { logistic_regression: true, spectrogram_cnn: false }
    }
}

impl WriteThrough {
    pub fn enabled(&self, model_type: ModelType) -> bool {
        match model_type {
            ModelType::LogisticRegression => self.logistic_regression,
            ModelType::SpectrogramCnn => self.spectrogram_cnn,
        }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address; `:8000` binds every interface.
    pub listen: String,
    pub data_dir: PathBuf,
    pub model_dir: PathBuf,
    pub store: StoreKind,
    /// Closed set of speaker labels.
    pub labels: Vec<String>,
    pub enabled_models: Vec<ModelType>,
    pub mel: MelConfig,
    pub logistic: LogisticConfig,
    pub cnn: CnnSection,
    pub write_through: WriteThrough,
    /// Retrains slower than this are logged at warn level.
    pub slow_retrain_warn_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            data_dir: PathBuf::from("data"),
            model_dir: PathBuf::from("ml_models"),
            store: StoreKind::default(),
            labels: vec!["Chris".to_string(), "Reece".to_string()],
            enabled_models: ModelType::ALL.to_vec(),
            mel: MelConfig::default(),
            logistic: LogisticConfig::default(),
            cnn: CnnSection::default(),
            write_through: WriteThrough::default(),
            slow_retrain_warn_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Reads a YAML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Path of the redb sample database.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(SAMPLES_DB_FILE)
    }

    /// CNN architecture with `n_mels` taken from the feature settings.
    pub fn cnn_config(&self) -> CnnConfig {
        CnnConfig { n_mels: self.mel.n_mels, ..self.cnn.architecture.clone() }
    }

    pub fn train_config(&self) -> TrainConfig {
        TrainConfig { logistic: self.logistic.clone(), cnn: self.cnn.train.clone() }
    }

    pub fn model_defaults(&self, n_classes: usize) -> ModelDefaults {
        ModelDefaults { n_classes, cnn: self.cnn_config() }
    }

    pub fn slow_retrain(&self) -> Duration {
        Duration::from_secs(self.slow_retrain_warn_secs)
    }
}

/// Parses a listen address. A leading `:` means every interface.
pub fn parse_addr(addr: &str) -> Result<SocketAddr> {
    let addr = if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    };
    addr.parse().with_context(|| format!("invalid listen address {addr}"))
}
