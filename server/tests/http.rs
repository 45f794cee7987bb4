use std::sync::Arc;

use serde_json::{json, Value};
use voxclass_classifier::CnnConfig;
use voxclass_features::MelConfig;
use voxclass_server::{serve, ClassifierService, ServerConfig, StoreKind};

struct TestServer {
    base: String,
    client: reqwest::Client,
    _models: tempfile::TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let models = tempfile::tempdir().unwrap();
        let mut cfg = ServerConfig {
            store: StoreKind::Memory,
            model_dir: models.path().to_path_buf(),
            mel: MelConfig { n_fft: 64, hop_length: 32, n_mels: 8, ..MelConfig::default() },
            ..ServerConfig::default()
        };
        cfg.cnn.architecture = CnnConfig { n_mels: 8, n_frames: 5, conv1_channels: 2, conv2_channels: 2, hidden: 4 };
        cfg.cnn.train.epochs = 1;

        let service = Arc::new(ClassifierService::from_config(&cfg).unwrap());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(serve(listener, service, std::future::pending()));

        Self { base, client: reqwest::Client::new(), _models: models }
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self.client.get(format!("{}{}", self.base, path)).send().await.unwrap();
        (resp.status().as_u16(), resp.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self.client.post(format!("{}{}", self.base, path)).json(&body).send().await.unwrap();
        (resp.status().as_u16(), resp.json().await.unwrap())
    }

    async fn upload(&self, audio: Vec<f32>, label: &str, model_type: &str) -> (u16, Value) {
        self.post(
            "/upload_labeled_datapoint_and_update_model/",
            json!({ "raw_audio": audio, "audio_label": label, "ml_model_type": model_type }),
        )
        .await
    }
}

fn tone(freq: f32) -> Vec<f32> {
    (0..128).map(|i| (i as f32 * freq).sin()).collect()
}

#[tokio::test]
async fn predict_unknown_model_type_is_500() {
    let server = TestServer::start().await;
    let (status, body) = server
        .post("/predict_one/", json!({ "raw_audio": tone(0.1), "ml_model_type": "UnknownType" }))
        .await;
    assert_eq!(status, 500);
    assert!(body["detail"].as_str().unwrap().contains("UnknownType"));
}

#[tokio::test]
async fn upload_unknown_model_type_is_404() {
    let server = TestServer::start().await;
    let (status, body) = server.upload(tone(0.1), "Chris", "Random Forest").await;
    assert_eq!(status, 404);
    assert_eq!(body["detail"], "No model found for Random Forest");
}

#[tokio::test]
async fn upload_retrain_predict_and_clear() {
    let server = TestServer::start().await;
    let lr = "Logistic Regression";

    for freq in [0.10, 0.11, 0.12] {
        let (status, _) = server.upload(tone(freq), "Chris", lr).await;
        assert_eq!(status, 200);
    }
    server.upload(tone(1.2), "Reece", lr).await;
    let (status, body) = server.upload(tone(1.3), "Reece", lr).await;
    assert_eq!(status, 200);
    assert_eq!(body["resub_accuracy"], "100.0");

    let (_, body) = server
        .post("/predict_one/", json!({ "raw_audio": tone(0.1), "ml_model_type": lr }))
        .await;
    assert_eq!(body["audio_prediction"], "Chris");

    let (_, first) = server.get("/model_accuracies/").await;
    let (_, second) = server.get("/model_accuracies/").await;
    assert_eq!(first, second);
    assert_eq!(first["logistic_regression_accuracy"], "100.0");
    assert_eq!(first["spectrogram_cnn_accuracy"], "--.-");

    let (_, body) = server.get("/print_data_count/").await;
    assert_eq!(body["detail"], "Printed data counts to console.");

    let resp = server.client.delete(format!("{}/clear_database/", server.base)).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["detail"], "Deleted 5 items.");

    let (_, body) = server.get("/model_accuracies/").await;
    assert_eq!(body["logistic_regression_accuracy"], "--.-");
    assert_eq!(body["spectrogram_cnn_accuracy"], "--.-");
}

#[tokio::test]
async fn update_model_without_samples() {
    let server = TestServer::start().await;
    let (status, body) = server.post("/update_model/", json!({ "ml_model_type": "Spectrogram CNN" })).await;
    assert_eq!(status, 200);
    assert_eq!(body["resub_accuracy"], "--.-");
}

#[tokio::test]
async fn invalid_label_is_rejected() {
    let server = TestServer::start().await;
    let (status, body) = server.upload(tone(0.1), "Alice", "Spectrogram CNN").await;
    assert_eq!(status, 422);
    assert!(body["detail"].as_str().unwrap().contains("Alice"));

    let (_, body) = server.get("/print_database/").await;
    assert_eq!(body["detail"], "Printed all data to console.");
}

#[tokio::test]
async fn print_handlers_lists_routes() {
    let server = TestServer::start().await;
    let (status, body) = server.get("/print_handlers/").await;
    assert_eq!(status, 200);
    let routes = body.as_array().unwrap();
    assert_eq!(routes.len(), 8);
    assert!(routes.contains(&json!({ "method": "POST", "path": "/predict_one/" })));
}

#[tokio::test]
async fn malformed_body_is_client_error() {
    let server = TestServer::start().await;
    let resp = server
        .client
        .post(format!("{}/predict_one/", server.base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_client_error());
}
