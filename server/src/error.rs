use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;
use voxclass_classifier::ClassifierError;
use voxclass_store::StoreError;

/// Errors surfaced by [`ClassifierService`](crate::ClassifierService)
/// operations.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("server: background task failed: {0}")]
    Task(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Classifier(err) => match err {
                ClassifierError::InvalidInput(_)
                | ClassifierError::UnknownLabel(_)
                | ClassifierError::FeatureMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                ClassifierError::UnknownModelType(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Store(_) | Self::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message placed in the `detail` field of the response body.
    pub fn detail(&self) -> String {
        match self {
            Self::Classifier(ClassifierError::ModelNotFound(model_type)) => {
                format!("Could not load model for {model_type}")
            }
            Self::Classifier(ClassifierError::UnknownModelType(model_type)) => {
                format!("No model found for {model_type}")
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        (status, Json(json!({ "detail": self.detail() }))).into_response()
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}
