use thiserror::Error;
use voxclass_features::FeatureError;
use voxclass_store::ModelType;

/// Errors returned by classifier operations.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier: invalid input: {0}")]
    InvalidInput(#[from] FeatureError),

    #[error("classifier: unknown label: {0}")]
    UnknownLabel(String),

    #[error("classifier: unknown class index: {0}")]
    UnknownCode(usize),

    #[error("classifier: unknown model type: {0}")]
    UnknownModelType(String),

    #[error("classifier: could not load model for {0}")]
    ModelNotFound(String),

    #[error("classifier: model not trained yet: {0}")]
    ModelNotTrained(ModelType),

    #[error("classifier: no training data for {0}")]
    NoTrainingData(ModelType),

    #[error("classifier: feature shape mismatch for {model_type}: expected {expected}, got {got}")]
    FeatureMismatch {
        model_type: ModelType,
        expected: String,
        got: String,
    },

    #[error("classifier: checkpoint error: {0}")]
    Checkpoint(String),

    #[error("classifier: invalid config: {0}")]
    Config(String),
}
