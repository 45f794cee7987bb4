//! Live model handles, one per model type.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use voxclass_features::{FeatureKind, Features};
use voxclass_store::ModelType;

use crate::checkpoint::CheckpointStore;
use crate::cnn::{CnnConfig, SpectrogramCnn};
use crate::logistic::LogisticRegression;
use crate::ClassifierError;

/// The model behind a handle.
#[derive(Debug, Clone)]
pub enum ModelState {
    LogisticRegression(LogisticRegression),
    SpectrogramCnn(SpectrogramCnn),
}

/// A model plus whether it has ever been trained. Replaced as a whole on
/// retrain.
#[derive(Debug, Clone)]
pub struct ModelHandle {
    state: ModelState,
    trained: bool,
}

/// Shapes used when a model has to be built from scratch.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDefaults {
    pub n_classes: usize,
    pub cnn: CnnConfig,
}

impl ModelHandle {
    /// An untrained model. The CNN starts with random weights.
    pub fn fresh(model_type: ModelType, defaults: &ModelDefaults) -> Result<Self, ClassifierError> {
        let state = match model_type {
            ModelType::LogisticRegression => ModelState::LogisticRegression(LogisticRegression::new()),
            ModelType::SpectrogramCnn => {
                ModelState::SpectrogramCnn(SpectrogramCnn::new(defaults.cnn.clone(), defaults.n_classes)?)
            }
        };
        Ok(Self { state, trained: false })
    }

    pub fn new(state: ModelState, trained: bool) -> Self {
        Self { state, trained }
    }

    pub fn model_type(&self) -> ModelType {
        match self.state {
            ModelState::LogisticRegression(_) => ModelType::LogisticRegression,
            ModelState::SpectrogramCnn(_) => ModelType::SpectrogramCnn,
        }
    }

    pub fn trained(&self) -> bool {
        self.trained
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    /// Representation this model consumes.
    pub fn feature_kind(&self) -> FeatureKind {
        match self.state {
            ModelState::LogisticRegression(_) => FeatureKind::Spectrum,
            ModelState::SpectrogramCnn(_) => FeatureKind::MelSpectrogram,
        }
    }

    /// Checks `features` against the input shape the model was built or
    /// fitted for. An unfitted logistic model accepts any vector length.
    pub fn check_features(&self, features: &Features) -> Result<(), ClassifierError> {
        let mismatch = |expected: String, got: String| ClassifierError::FeatureMismatch {
            model_type: self.model_type(),
            expected,
            got,
        };
        match (&self.state, features) {
            (ModelState::LogisticRegression(model), Features::Vector(v)) => match model.n_features() {
                Some(n) if n != v.len() => Err(mismatch(format!("{n} values"), format!("{} values", v.len()))),
                _ => Ok(()),
            },
            (ModelState::SpectrogramCnn(model), Features::Map(m)) => {
                let cfg = model.config();
                if (m.n_mels(), m.n_frames()) != (cfg.n_mels, cfg.n_frames) {
                    return Err(mismatch(
                        format!("{}x{} map", cfg.n_mels, cfg.n_frames),
                        format!("{}x{} map", m.n_mels(), m.n_frames()),
                    ));
                }
                Ok(())
            }
            (_, Features::Vector(_)) => Err(mismatch(format!("{:?} features", self.feature_kind()), "vector features".into())),
            (_, Features::Map(_)) => Err(mismatch(format!("{:?} features", self.feature_kind()), "map features".into())),
        }
    }

    /// Class index for each feature set. `batch_size` only bounds CNN
    /// inference memory.
    pub fn classify(&self, features: Vec<Features>, batch_size: usize) -> Result<Vec<usize>, ClassifierError> {
        let model_type = self.model_type();
        let mismatch = |got: &Features| ClassifierError::FeatureMismatch {
            model_type,
            expected: format!("{:?} features", self.feature_kind()),
            got: match got {
                Features::Vector(_) => "vector features".into(),
                Features::Map(_) => "map features".into(),
            },
        };

        match &self.state {
            ModelState::LogisticRegression(model) => {
                let rows = features
                    .into_iter()
                    .map(|f| match f {
                        Features::Vector(v) => Ok(v),
                        other => Err(mismatch(&other)),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                model.predict(&rows)
            }
            ModelState::SpectrogramCnn(model) => {
                let maps = features
                    .into_iter()
                    .map(|f| match f {
                        Features::Map(m) => Ok(m),
                        other => Err(mismatch(&other)),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                model.predict(&maps, batch_size)
            }
        }
    }
}

pub type SharedHandle = Arc<Mutex<ModelHandle>>;

/// Maps each enabled model type to its guarded handle.
///
/// Entries are created once at startup and never removed; retrains swap the
/// handle inside the entry's mutex, so different model types never contend.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    entries: HashMap<ModelType, SharedHandle>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every enabled model from its checkpoint, or builds and saves a
    /// fresh one when none exists.
    pub fn load(
        checkpoints: &CheckpointStore,
        model_types: &[ModelType],
        defaults: &ModelDefaults,
    ) -> Result<Self, ClassifierError> {
        let mut registry = Self::new();
        for &model_type in model_types {
            let handle = match checkpoints.load(model_type, defaults)? {
                Some(handle) => {
                    tracing::info!(%model_type, trained = handle.trained(), "loaded model checkpoint");
                    handle
                }
                None => {
                    let handle = ModelHandle::fresh(model_type, defaults)?;
                    checkpoints.save(&handle)?;
                    tracing::info!(%model_type, "no checkpoint found, created fresh model");
                    handle
                }
            };
            registry.insert(handle);
        }
        Ok(registry)
    }

    /// Registers `handle`, replacing any entry for its model type.
    pub fn insert(&mut self, handle: ModelHandle) {
        self.entries.insert(handle.model_type(), Arc::new(Mutex::new(handle)));
    }

    pub fn get(&self, model_type: ModelType) -> Result<SharedHandle, ClassifierError> {
        self.entries
            .get(&model_type)
            .cloned()
            .ok_or_else(|| ClassifierError::ModelNotFound(model_type.to_string()))
    }

    /// Replaces the live handle of an existing entry.
    pub async fn set(&self, handle: ModelHandle) -> Result<(), ClassifierError> {
        let entry = self.get(handle.model_type())?;
        *entry.lock().await = handle;
        Ok(())
    }

    /// Registered model types in their canonical order.
    pub fn model_types(&self) -> Vec<ModelType> {
        ModelType::ALL.into_iter().filter(|t| self.entries.contains_key(t)).collect()
    }
}
