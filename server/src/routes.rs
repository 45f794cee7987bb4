//! HTTP routes.
//!
//! API endpoints:
//! - POST   /predict_one/                                  - classify one clip
//! - POST   /upload_labeled_datapoint_and_update_model/    - store a sample and retrain
//! - POST   /update_model/                                 - retrain from stored samples
//! - GET    /model_accuracies/                             - accuracy of both models
//! - GET    /print_database/                               - dump samples to stdout
//! - GET    /print_data_count/                             - dump sample counts to stdout
//! - DELETE /clear_database/                               - delete every sample
//! - GET    /print_handlers/                               - list these routes

use std::sync::Arc;

use axum::{
    extract::State,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::service::ClassifierService;

/// A registered method and path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Route {
    pub method: &'static str,
    pub path: &'static str,
}

const fn route(method: &'static str, path: &'static str) -> Route {
    Route { method, path }
}

pub const ROUTES: &[Route] = &[
    route("POST", "/predict_one/"),
    route("POST", "/upload_labeled_datapoint_and_update_model/"),
    route("POST", "/update_model/"),
    route("GET", "/model_accuracies/"),
    route("GET", "/print_database/"),
    route("DELETE", "/clear_database/"),
    route("GET", "/print_data_count/"),
    route("GET", "/print_handlers/"),
];

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub raw_audio: Vec<f32>,
    pub ml_model_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub audio_prediction: String,
}

#[derive(Debug, Deserialize)]
pub struct LabeledDatapoint {
    pub raw_audio: Vec<f32>,
    pub audio_label: String,
    pub ml_model_type: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateModelRequest {
    pub ml_model_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResubAccuracyResponse {
    pub resub_accuracy: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelAccuraciesResponse {
    pub spectrogram_cnn_accuracy: String,
    pub logistic_regression_accuracy: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Detail {
    pub detail: String,
}

impl Detail {
    fn new(detail: impl Into<String>) -> Json<Self> {
        Json(Self { detail: detail.into() })
    }
}

type AppState = Arc<ClassifierService>;

/// Builds the router over a shared service.
pub fn router(service: Arc<ClassifierService>) -> Router {
    Router::new()
        .route("/predict_one/", post(predict_one))
        .route("/upload_labeled_datapoint_and_update_model/", post(upload_and_retrain))
        .route("/update_model/", post(update_model))
        .route("/model_accuracies/", get(model_accuracies))
        .route("/print_database/", get(print_database))
        .route("/clear_database/", delete(clear_database))
        .route("/print_data_count/", get(print_data_count))
        .route("/print_handlers/", get(print_handlers))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn predict_one(
    State(service): State<AppState>,
    Json(req): Json<PredictRequest>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let audio_prediction = service.predict_one(req.raw_audio, &req.ml_model_type).await?;
    Ok(Json(PredictionResponse { audio_prediction }))
}

async fn upload_and_retrain(
    State(service): State<AppState>,
    Json(req): Json<LabeledDatapoint>,
) -> Result<Json<ResubAccuracyResponse>, ApiError> {
    let accuracy = service
        .upload_and_retrain(req.raw_audio, req.audio_label, &req.ml_model_type)
        .await?;
    Ok(Json(ResubAccuracyResponse { resub_accuracy: accuracy.to_string() }))
}

async fn update_model(
    State(service): State<AppState>,
    Json(req): Json<UpdateModelRequest>,
) -> Result<Json<ResubAccuracyResponse>, ApiError> {
    let accuracy = service.update_model(&req.ml_model_type).await?;
    Ok(Json(ResubAccuracyResponse { resub_accuracy: accuracy.to_string() }))
}

async fn model_accuracies(State(service): State<AppState>) -> Result<Json<ModelAccuraciesResponse>, ApiError> {
    let accuracies = service.get_accuracies().await?;
    Ok(Json(ModelAccuraciesResponse {
        spectrogram_cnn_accuracy: accuracies.spectrogram_cnn.to_string(),
        logistic_regression_accuracy: accuracies.logistic_regression.to_string(),
    }))
}

async fn print_database(State(service): State<AppState>) -> Result<Json<Detail>, ApiError> {
    let dump = service.debug_dump().await?;
    if !dump.is_empty() {
        println!("{dump}");
    }
    Ok(Detail::new("Printed all data to console."))
}

async fn clear_database(State(service): State<AppState>) -> Result<Json<Detail>, ApiError> {
    let deleted = service.clear_database().await?;
    Ok(Detail::new(format!("Deleted {deleted} items.")))
}

async fn print_data_count(State(service): State<AppState>) -> Result<Json<Detail>, ApiError> {
    let counts = service.debug_counts().await?;
    if !counts.is_empty() {
        println!("{counts}");
    }
    Ok(Detail::new("Printed data counts to console."))
}

async fn print_handlers(State(service): State<AppState>) -> Json<Vec<Route>> {
    let handlers = service.handlers();
    for r in &handlers {
        println!("{:<7} {}", r.method, r.path);
    }
    Json(handlers)
}
