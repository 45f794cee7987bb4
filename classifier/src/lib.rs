//! Speaker classifiers with online retraining.
//!
//! # Models
//!
//! Two interchangeable backends sit behind one [`ModelHandle`]:
//!
//! | Model type | Features | Retrain |
//! |---|---|---|
//! | Logistic Regression | DFT real part | refit from zero weights |
//! | Spectrogram CNN | mel spectrogram | further epochs on current weights |
//!
//! # Flow
//!
//! ```text
//! samples ──► Trainer::retrain ──► (ModelHandle, Accuracy) ──► ModelRegistry
//!                                                          └─► CheckpointStore
//! ```
//!
//! The [`ModelRegistry`] keeps one `tokio::sync::Mutex` per model type.
//! Training and inference are synchronous and CPU-bound; async callers are
//! expected to run them on the blocking pool while holding the entry's
//! owned guard.

mod accuracy;
pub mod backend;
pub mod checkpoint;
pub mod cnn;
pub mod data;
mod codec;
mod error;
pub mod logistic;
pub mod registry;
pub mod trainer;

pub use accuracy::Accuracy;
pub use checkpoint::CheckpointStore;
pub use cnn::{CnnConfig, CnnTrainConfig, SpectrogramCnn};
pub use codec::LabelCodec;
pub use error::ClassifierError;
pub use logistic::{LogisticConfig, LogisticRegression};
pub use registry::{ModelDefaults, ModelHandle, ModelRegistry, ModelState, SharedHandle};
pub use trainer::{TrainConfig, Trainer};
pub use voxclass_store::{LabeledSample, ModelType};
