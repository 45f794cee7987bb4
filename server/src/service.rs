//! Request handling independent of HTTP.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::sync::OwnedMutexGuard;
use voxclass_classifier::{
    Accuracy, CheckpointStore, ClassifierError, LabelCodec, LabeledSample, ModelHandle, ModelRegistry,
    ModelType, SharedHandle, Trainer,
};
use voxclass_features::Extractor;
use voxclass_store::{MemoryStore, RedbStore, SampleStore};

use crate::config::{ServerConfig, StoreKind, WriteThrough};
use crate::error::ApiError;
use crate::routes::{Route, ROUTES};

/// Accuracy of every model type against its stored samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Accuracies {
    pub logistic_regression: Accuracy,
    pub spectrogram_cnn: Accuracy,
}

/// Retrain behavior that is not part of the model itself.
#[derive(Debug, Clone)]
pub struct RetrainPolicy {
    pub write_through: WriteThrough,
    /// Retrains slower than this are logged at warn level.
    pub slow_threshold: Duration,
}

impl Default for RetrainPolicy {
    fn default() -> Self {
        Self { write_through: WriteThrough::default(), slow_threshold: Duration::from_secs(30) }
    }
}

/// Ties the sample store, the model registry and the trainer together.
///
/// Every operation that reads or replaces a model takes that model type's
/// entry lock as an owned guard and moves it onto the blocking pool with
/// the CPU-bound work, so inference and training never run on the reactor
/// and never overlap for the same model type.
#[derive(Debug)]
pub struct ClassifierService {
    store: Arc<dyn SampleStore>,
    registry: ModelRegistry,
    trainer: Arc<Trainer>,
    checkpoints: CheckpointStore,
    policy: RetrainPolicy,
}

impl ClassifierService {
    pub fn new(
        store: Arc<dyn SampleStore>,
        registry: ModelRegistry,
        trainer: Trainer,
        checkpoints: CheckpointStore,
        policy: RetrainPolicy,
    ) -> Self {
        Self { store, registry, trainer: Arc::new(trainer), checkpoints, policy }
    }

    /// Opens the store and loads (or creates) every enabled model.
    pub fn from_config(cfg: &ServerConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn SampleStore> = match cfg.store {
            StoreKind::Redb => {
                std::fs::create_dir_all(&cfg.data_dir)
                    .with_context(|| format!("failed to create data dir {}", cfg.data_dir.display()))?;
                let path = cfg.store_path();
                let store = RedbStore::open(&path)
                    .with_context(|| format!("failed to open sample store {}", path.display()))?;
                Arc::new(store)
            }
            StoreKind::Memory => Arc::new(MemoryStore::new()),
        };

        let codec = LabelCodec::fit(&cfg.labels).context("invalid label set")?;
        let extractor = Extractor::new(cfg.mel.clone()).context("invalid mel config")?;
        let defaults = cfg.model_defaults(codec.len());
        let checkpoints = CheckpointStore::new(&cfg.model_dir);
        let registry = ModelRegistry::load(&checkpoints, &cfg.enabled_models, &defaults)
            .with_context(|| format!("failed to load models from {}", cfg.model_dir.display()))?;

        tracing::info!(
            store = ?cfg.store,
            labels = ?codec.labels(),
            models = ?registry.model_types(),
            "classifier service ready"
        );

        let trainer = Trainer::new(extractor, codec, cfg.train_config());
        let policy = RetrainPolicy { write_through: cfg.write_through.clone(), slow_threshold: cfg.slow_retrain() };
        Ok(Self::new(store, registry, trainer, checkpoints, policy))
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Classifies one clip with the named model.
    pub async fn predict_one(&self, raw_audio: Vec<f32>, model_type: &str) -> Result<String, ApiError> {
        let model_type: ModelType = model_type
            .parse()
            .map_err(|_| ClassifierError::ModelNotFound(model_type.to_string()))?;
        let guard = self.registry.get(model_type)?.lock_owned().await;

        let trainer = self.trainer.clone();
        let label = tokio::task::spawn_blocking(move || trainer.predict(&guard, &raw_audio)).await??;
        tracing::debug!(%model_type, %label, "predicted");
        Ok(label)
    }

    /// Stores a labeled sample and retrains its model on the full history.
    ///
    /// The entry lock is held from validation until the retrained model is
    /// in place, so uploads of one model type are validated against the
    /// history they will be trained with. A rejected request leaves the
    /// store unchanged.
    pub async fn upload_and_retrain(
        &self,
        raw_audio: Vec<f32>,
        label: String,
        model_type: &str,
    ) -> Result<Accuracy, ApiError> {
        let (model_type, entry) = self.training_entry(model_type)?;
        let guard = entry.lock_owned().await;
        let history = self.history(model_type).await?;

        let sample = LabeledSample::new(raw_audio, label, model_type);
        let trainer = self.trainer.clone();
        let (guard, sample, mut history) = tokio::task::spawn_blocking(move || {
            trainer.validate(&guard, &sample, history.first())?;
            Ok::<_, ClassifierError>((guard, sample, history))
        })
        .await??;

        let stored = self.store.append(sample).await?;
        tracing::info!(id = stored.id, %model_type, label = %stored.sample.label, "stored sample");
        history.push(stored.sample);

        self.retrain(model_type, guard, history).await
    }

    /// Retrains a model on its stored samples without adding one.
    pub async fn update_model(&self, model_type: &str) -> Result<Accuracy, ApiError> {
        let (model_type, entry) = self.training_entry(model_type)?;
        let guard = entry.lock_owned().await;
        let samples = self.history(model_type).await?;
        self.retrain(model_type, guard, samples).await
    }

    /// Resubstitution accuracy of every model type. Leaves models untouched.
    pub async fn get_accuracies(&self) -> Result<Accuracies, ApiError> {
        Ok(Accuracies {
            logistic_regression: self.accuracy(ModelType::LogisticRegression).await?,
            spectrogram_cnn: self.accuracy(ModelType::SpectrogramCnn).await?,
        })
    }

    /// Deletes every stored sample. Models keep their current weights.
    pub async fn clear_database(&self) -> Result<u64, ApiError> {
        let deleted = self.store.clear().await?;
        tracing::info!(deleted, "cleared sample store");
        Ok(deleted)
    }

    /// One line per stored sample.
    pub async fn debug_dump(&self) -> Result<String, ApiError> {
        let samples = self.store.all().await?;
        Ok(samples.iter().map(|s| s.to_string()).collect::<Vec<_>>().join("\n"))
    }

    /// One line per `(model_type, label)` group, sorted by that key.
    pub async fn debug_counts(&self) -> Result<String, ApiError> {
        let counts = self.store.count_by_model_type_and_label().await?;
        Ok(counts.iter().map(|c| c.to_string()).collect::<Vec<_>>().join("\n"))
    }

    /// Writes the current model of `model_type` to its checkpoint.
    pub async fn save_model(&self, model_type: ModelType) -> Result<(), ApiError> {
        let guard = self.registry.get(model_type)?.lock_owned().await;
        let checkpoints = self.checkpoints.clone();
        tokio::task::spawn_blocking(move || checkpoints.save(&guard)).await??;
        Ok(())
    }

    /// Registered HTTP routes.
    pub fn handlers(&self) -> Vec<Route> {
        ROUTES.to_vec()
    }

    fn training_entry(&self, model_type: &str) -> Result<(ModelType, SharedHandle), ApiError> {
        let unknown = || ClassifierError::UnknownModelType(model_type.to_string());
        let parsed: ModelType = model_type.parse().map_err(|_| unknown())?;
        let entry = self.registry.get(parsed).map_err(|_| unknown())?;
        Ok((parsed, entry))
    }

    /// Stored samples of `model_type`, oldest first. Callers hold the
    /// entry's guard so the history cannot grow underneath them.
    async fn history(&self, model_type: ModelType) -> Result<Vec<LabeledSample>, ApiError> {
        Ok(self
            .store
            .find_by_model_type(model_type)
            .await?
            .into_iter()
            .map(|s| s.sample)
            .collect())
    }

    async fn retrain(
        &self,
        model_type: ModelType,
        mut guard: OwnedMutexGuard<ModelHandle>,
        samples: Vec<LabeledSample>,
    ) -> Result<Accuracy, ApiError> {
        let trainer = self.trainer.clone();
        let checkpoints = self.checkpoints.clone();
        let write_through = self.policy.write_through.enabled(model_type);
        let started = Instant::now();
        let n_samples = samples.len();

        let result = tokio::task::spawn_blocking(move || {
            let (handle, accuracy) = trainer.retrain(&guard, &samples)?;
            *guard = handle;
            if write_through {
                if let Err(err) = checkpoints.save(&guard) {
                    tracing::warn!(%model_type, error = %err, "failed to persist retrained model");
                }
            }
            Ok::<_, ClassifierError>(accuracy)
        })
        .await?;

        let elapsed = started.elapsed();
        if elapsed > self.policy.slow_threshold {
            tracing::warn!(%model_type, samples = n_samples, elapsed_secs = elapsed.as_secs_f64(), "slow retrain");
        }

        match result {
            Ok(accuracy) => Ok(accuracy),
            Err(ClassifierError::NoTrainingData(_)) => Ok(Accuracy::Unavailable),
            Err(err) => Err(err.into()),
        }
    }

    async fn accuracy(&self, model_type: ModelType) -> Result<Accuracy, ApiError> {
        let Ok(entry) = self.registry.get(model_type) else {
            return Ok(Accuracy::Unavailable);
        };
        let guard = entry.lock_owned().await;
        let samples = self.history(model_type).await?;

        let trainer = self.trainer.clone();
        let result = tokio::task::spawn_blocking(move || trainer.evaluate(&guard, &samples)).await?;
        match result {
            Ok(accuracy) => Ok(accuracy),
            Err(
                err @ (ClassifierError::FeatureMismatch { .. }
                | ClassifierError::ModelNotTrained(_)
                | ClassifierError::InvalidInput(_)
                | ClassifierError::UnknownLabel(_)),
            ) => {
                tracing::warn!(%model_type, error = %err, "stored samples do not fit model");
                Ok(Accuracy::Unavailable)
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use voxclass_classifier::{CnnConfig, CnnTrainConfig, LogisticConfig, ModelDefaults, TrainConfig};
    use voxclass_features::MelConfig;

    const LR: &str = "Logistic Regression";
    const CNN: &str = "Spectrogram CNN";

    fn defaults() -> ModelDefaults {
        ModelDefaults {
            n_classes: 2,
            cnn: CnnConfig { n_mels: 8, n_frames: 5, conv1_channels: 2, conv2_channels: 2, hidden: 4 },
        }
    }

    fn build(registry: ModelRegistry, checkpoints: CheckpointStore, write_through: WriteThrough) -> ClassifierService {
        let trainer = Trainer::new(
            Extractor::new(MelConfig { n_fft: 64, hop_length: 32, n_mels: 8, ..MelConfig::default() }).unwrap(),
            LabelCodec::fit(["Chris", "Reece"]).unwrap(),
            TrainConfig {
                logistic: LogisticConfig::default(),
                cnn: CnnTrainConfig { epochs: 1, batch_size: 4, learning_rate: 0.001 },
            },
        );
        let policy = RetrainPolicy { write_through, ..RetrainPolicy::default() };
        ClassifierService::new(Arc::new(MemoryStore::new()), registry, trainer, checkpoints, policy)
    }

    fn service() -> ClassifierService {
        let mut registry = ModelRegistry::new();
        for model_type in ModelType::ALL {
            registry.insert(ModelHandle::fresh(model_type, &defaults()).unwrap());
        }
        let dir = std::env::temp_dir().join("voxclass-service-tests-unused");
        let off = WriteThrough { logistic_regression: false, spectrogram_cnn: false };
        build(registry, CheckpointStore::new(dir), off)
    }

    /// A service whose models load from and persist to `dir`.
    fn persisted(dir: &Path, write_through: WriteThrough) -> ClassifierService {
        let checkpoints = CheckpointStore::new(dir);
        let registry = ModelRegistry::load(&checkpoints, &ModelType::ALL, &defaults()).unwrap();
        build(registry, checkpoints, write_through)
    }

    fn clip(len: usize, freq: f32) -> Vec<f32> {
        (0..len).map(|i| (i as f32 * freq).sin()).collect()
    }

    fn tone(freq: f32) -> Vec<f32> {
        clip(128, freq)
    }

    #[tokio::test]
    async fn upload_three_and_two() {
        let service = service();
        let lr = LR;
        for freq in [0.10, 0.11, 0.12] {
            service.upload_and_retrain(tone(freq), "Chris".into(), lr).await.unwrap();
        }
        service.upload_and_retrain(tone(1.2), "Reece".into(), lr).await.unwrap();
        let accuracy = service.upload_and_retrain(tone(1.3), "Reece".into(), lr).await.unwrap();
        assert_eq!(accuracy.to_string(), "100.0");

        assert_eq!(service.predict_one(tone(0.1), lr).await.unwrap(), "Chris");
        let counts = service.debug_counts().await.unwrap();
        assert_eq!(
            counts,
            "Model Type: Logistic Regression, Audio Label: Chris, Count: 3\n\
             Model Type: Logistic Regression, Audio Label: Reece, Count: 2"
        );
    }

    #[tokio::test]
    async fn rejected_uploads_store_nothing() {
        let service = service();
        let err = service.upload_and_retrain(tone(0.1), "Chris".into(), "Random Forest").await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);

        let err = service.upload_and_retrain(tone(0.1), "Alice".into(), "Spectrogram CNN").await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);

        let err = service.upload_and_retrain(Vec::new(), "Chris".into(), "Spectrogram CNN").await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);

        assert_eq!(service.debug_dump().await.unwrap(), "");
    }

    #[tokio::test]
    async fn predict_unknown_type() {
        let service = service();
        let err = service.predict_one(tone(0.1), "UnknownType").await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.detail().contains("UnknownType"));
    }

    #[tokio::test]
    async fn update_without_samples_is_sentinel() {
        let service = service();
        let accuracy = service.update_model("Spectrogram CNN").await.unwrap();
        assert_eq!(accuracy.to_string(), Accuracy::SENTINEL);
    }

    #[tokio::test]
    async fn accuracies_are_stable_and_cleared() {
        let service = service();
        service.upload_and_retrain(tone(0.1), "Chris".into(), "Spectrogram CNN").await.unwrap();
        service.upload_and_retrain(tone(1.2), "Reece".into(), "Spectrogram CNN").await.unwrap();

        let first = service.get_accuracies().await.unwrap();
        let second = service.get_accuracies().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.logistic_regression, Accuracy::Unavailable);
        assert!(first.spectrogram_cnn.percent().is_some());

        assert_eq!(service.clear_database().await.unwrap(), 2);
        let cleared = service.get_accuracies().await.unwrap();
        assert_eq!(cleared.logistic_regression, Accuracy::Unavailable);
        assert_eq!(cleared.spectrogram_cnn, Accuracy::Unavailable);
    }

    #[tokio::test]
    async fn concurrent_uploads_see_all_samples() {
        let service = Arc::new(service());
        let lr = LR;
        service.upload_and_retrain(tone(0.1), "Chris".into(), lr).await.unwrap();

        let a = {
            let service = service.clone();
            tokio::spawn(async move { service.upload_and_retrain(tone(0.11), "Chris".into(), lr).await })
        };
        let b = {
            let service = service.clone();
            tokio::spawn(async move { service.upload_and_retrain(tone(1.2), "Reece".into(), lr).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        // The later retrain covered all three samples.
        let accuracies = service.get_accuracies().await.unwrap();
        let percent = accuracies.logistic_regression.percent().unwrap();
        assert!((0.0..=100.0).contains(&percent));
        let entry = service.registry().get(ModelType::LogisticRegression).unwrap();
        assert!(entry.lock().await.trained());
        assert_eq!(service.debug_dump().await.unwrap().lines().count(), 3);
    }

    #[tokio::test]
    async fn cleared_history_accepts_new_length() {
        let service = service();
        service.upload_and_retrain(tone(0.1), "Chris".into(), LR).await.unwrap();
        service.upload_and_retrain(tone(1.2), "Reece".into(), LR).await.unwrap();

        let err = service.upload_and_retrain(clip(256, 0.1), "Chris".into(), LR).await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);

        assert_eq!(service.clear_database().await.unwrap(), 2);
        service.upload_and_retrain(clip(256, 0.1), "Chris".into(), LR).await.unwrap();
        let accuracy = service.upload_and_retrain(clip(256, 1.2), "Reece".into(), LR).await.unwrap();
        assert!(accuracy.percent().is_some());
        assert_eq!(service.predict_one(clip(256, 0.1), LR).await.unwrap(), "Chris");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_uploads_agree_on_length() {
        for _ in 0..10 {
            let service = Arc::new(service());
            let upload = |audio: Vec<f32>, label: &'static str| {
                let service = service.clone();
                tokio::spawn(async move { service.upload_and_retrain(audio, label.into(), LR).await })
            };
            let a = upload(clip(128, 0.1), "Chris");
            let b = upload(clip(64, 1.2), "Reece");
            let (a, b) = (a.await.unwrap(), b.await.unwrap());

            assert!(a.is_ok() ^ b.is_ok(), "a={a:?} b={b:?}");
            let rejected = if a.is_ok() { &b } else { &a };
            assert_eq!(
                rejected.as_ref().unwrap_err().status(),
                axum::http::StatusCode::UNPROCESSABLE_ENTITY
            );
            assert_eq!(service.debug_dump().await.unwrap().lines().count(), 1);

            let len = if a.is_ok() { 128 } else { 64 };
            service.upload_and_retrain(clip(len, 0.11), "Chris".into(), LR).await.unwrap();
        }
    }

    #[tokio::test]
    async fn write_through_defaults_persist_logistic_only() {
        let dir = tempfile::tempdir().unwrap();
        let service = persisted(dir.path(), WriteThrough::default());
        for (audio, label) in [(tone(0.1), "Chris"), (tone(1.2), "Reece")] {
            service.upload_and_retrain(audio.clone(), label.into(), LR).await.unwrap();
            service.upload_and_retrain(audio, label.into(), CNN).await.unwrap();
        }

        let checkpoints = CheckpointStore::new(dir.path());
        let lr = checkpoints.load(ModelType::LogisticRegression, &defaults()).unwrap().unwrap();
        assert!(lr.trained());
        let cnn = checkpoints.load(ModelType::SpectrogramCnn, &defaults()).unwrap().unwrap();
        assert!(!cnn.trained());

        let both = WriteThrough { logistic_regression: true, spectrogram_cnn: true };
        let service = persisted(dir.path(), both);
        service.upload_and_retrain(tone(0.1), "Chris".into(), CNN).await.unwrap();
        let cnn = checkpoints.load(ModelType::SpectrogramCnn, &defaults()).unwrap().unwrap();
        assert!(cnn.trained());
    }
}
