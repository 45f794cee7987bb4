//! On-disk model checkpoints.
//!
//! Each model type owns a directory under the model root:
//!
//! ```text
//! {model_dir}/
//!   logistic_regression/
//!     meta.json                  <- kind, trained flag, class count, scaler
//!     weights-{generation}.mpk.gz <- burn record, absent while unfitted
//!   spectrogram_cnn/
//!     meta.json                  <- kind, trained flag, class count, architecture
//!     weights-{generation}.mpk.gz
//! ```
//!
//! Every save writes its weights under a new generation, then replaces
//! `meta.json` by renaming a temporary file over it. The meta file names
//! the weights it was written with, so a save interrupted at any point
//! leaves the previous checkpoint loadable. Weights of older generations
//! are removed once the new meta file is in place.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use burn::record::CompactRecorder;
use burn::module::Module;
use serde::{Deserialize, Serialize};
use voxclass_store::ModelType;

use crate::backend::{self, InferBackend, TrainBackend};
use crate::cnn::{CnnConfig, SpectrogramCnn};
use crate::logistic::{Fitted, LogisticModel, LogisticRegression, Scaler};
use crate::registry::{ModelDefaults, ModelHandle, ModelState};
use crate::ClassifierError;

const META_FILE: &str = "meta.json";
const META_TMP_FILE: &str = "meta.json.tmp";
const WEIGHTS_PREFIX: &str = "weights-";

#[derive(Debug, Serialize, Deserialize)]
struct MetaFile {
    /// File stem of the weights record; `None` for an unfitted logistic model.
    weights: Option<String>,
    #[serde(flatten)]
    model: CheckpointMeta,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum CheckpointMeta {
    LogisticRegression {
        trained: bool,
        n_classes: usize,
        scaler: Option<Scaler>,
    },
    SpectrogramCnn {
        trained: bool,
        n_classes: usize,
        config: CnnConfig,
    },
}

/// Reads and writes model checkpoints below one root directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, model_type: ModelType) -> PathBuf {
        self.root.join(model_type.slug())
    }

    /// Writes the handle's weights and metadata, replacing any previous
    /// checkpoint of the same model type.
    pub fn save(&self, handle: &ModelHandle) -> Result<(), ClassifierError> {
        let dir = self.dir(handle.model_type());
        fs::create_dir_all(&dir).map_err(|e| checkpoint_err(&dir, e))?;
        let stem = format!("{WEIGHTS_PREFIX}{}", generation());
        let weights = dir.join(&stem);
        let recorder = CompactRecorder::new();

        let (stem, meta) = match handle.state() {
            ModelState::LogisticRegression(lr) => {
                let stem = match &lr.fitted {
                    Some(fitted) => {
                        fitted
                            .model
                            .clone()
                            .save_file(weights.clone(), &recorder)
                            .map_err(|e| checkpoint_err(&weights, e))?;
                        Some(stem)
                    }
                    None => None,
                };
                let meta =                 CheckpointMeta::LogisticRegression {
                    trained: handle.trained(),
                    n_classes: lr.fitted.as_ref().map_or(0, |f| f.model.linear.weight.val().dims()[1]),
                    scaler: lr.fitted.as_ref().map(|f| f.scaler.clone()),
                };
                (stem, meta)
            }
            ModelState::SpectrogramCnn(cnn) => {
                cnn.model
                    .clone()
                    .save_file(weights.clone(), &recorder)
                    .map_err(|e| checkpoint_err(&weights, e))?;
                let meta = CheckpointMeta::SpectrogramCnn {
                    trained: handle.trained(),
                    n_classes: cnn.n_classes(),
                    config: cnn.config().clone(),
                };
                (Some(stem), meta)
            }
        };

        let tmp = dir.join(META_TMP_FILE);
        let path = dir.join(META_FILE);
        let file = MetaFile { weights: stem, model: meta };
        let json = serde_json::to_vec_pretty(&file).map_err(|e| checkpoint_err(&tmp, e))?;
        fs::write(&tmp, json).map_err(|e| checkpoint_err(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| checkpoint_err(&path, e))?;
        remove_stale_weights(&dir, file.weights.as_deref());
        tracing::debug!(model_type = %handle.model_type(), path = %dir.display(), "saved checkpoint");
        Ok(())
    }

    /// Loads the checkpoint for `model_type`. Returns `None` when no
    /// checkpoint has been written yet.
    ///
    /// A checkpoint built for a different class count, or a CNN built for a
    /// different number of mel bands, is an error rather than a silent
    /// reset.
    pub fn load(
        &self,
        model_type: ModelType,
        defaults: &ModelDefaults,
    ) -> Result<Option<ModelHandle>, ClassifierError> {
        let dir = self.dir(model_type);
        let path = dir.join(META_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read(&path).map_err(|e| checkpoint_err(&path, e))?;
        let MetaFile { weights, model: meta } =
            serde_json::from_slice(&json).map_err(|e| checkpoint_err(&path, e))?;

        let weights = weights.map(|stem| dir.join(stem));
        let weights_for = |model_type: ModelType| {
            weights.clone().ok_or_else(|| {
                ClassifierError::Checkpoint(format!("{} names no weights for a fitted {model_type}", path.display()))
            })
        };
        let recorder = CompactRecorder::new();
        let device = backend::device();

        let handle = match meta {
            CheckpointMeta::LogisticRegression { trained, n_classes, scaler } => {
                ensure_kind(model_type, ModelType::LogisticRegression)?;
                let fitted = match scaler {
                    Some(scaler) => {
                        ensure_classes(model_type, n_classes, defaults.n_classes)?;
                        let weights = weights_for(model_type)?;
                        let model = LogisticModel::<InferBackend>::new(scaler.n_features(), n_classes, &device)
                            .load_file(weights.clone(), &recorder, &device)
                            .map_err(|e| checkpoint_err(&weights, e))?;
                        Some(Fitted { model, scaler })
                    }
                    None => None,
                };
                ModelHandle::new(ModelState::LogisticRegression(LogisticRegression { fitted }), trained)
            }
            CheckpointMeta::SpectrogramCnn { trained, n_classes, config } => {
                ensure_kind(model_type, ModelType::SpectrogramCnn)?;
                ensure_classes(model_type, n_classes, defaults.n_classes)?;
                if config.n_mels != defaults.cnn.n_mels {
                    return Err(ClassifierError::Checkpoint(format!(
                        "{model_type} checkpoint expects {} mel bands, extractor produces {}",
                        config.n_mels, defaults.cnn.n_mels
                    )));
                }
                config.validate()?;
                let weights = weights_for(model_type)?;
                let model = config
                    .init::<TrainBackend>(n_classes, &device)
                    .load_file(weights.clone(), &recorder, &device)
                    .map_err(|e| checkpoint_err(&weights, e))?;
                ModelHandle::new(
                    ModelState::SpectrogramCnn(SpectrogramCnn::from_parts(config, n_classes, model)),
                    trained,
                )
            }
        };
        Ok(Some(handle))
    }
}

fn ensure_kind(wanted: ModelType, found: ModelType) -> Result<(), ClassifierError> {
    if wanted != found {
        return Err(ClassifierError::Checkpoint(format!(
            "checkpoint for {wanted} holds a {found} model"
        )));
    }
    Ok(())
}

fn ensure_classes(model_type: ModelType, stored: usize, expected: usize) -> Result<(), ClassifierError> {
    if stored != expected {
        return Err(ClassifierError::Checkpoint(format!(
            "{model_type} checkpoint has {stored} classes, label set has {expected}"
        )));
    }
    Ok(())
}

/// Nanoseconds since the epoch; saves of one model type are serialized by
/// its registry entry, so consecutive generations differ.
fn generation() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_nanos())
}

/// Deletes weights records other than `keep`. Failures only leave an unused
/// file behind.
fn remove_stale_weights(dir: &Path, keep: Option<&str>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(path = %dir.display(), error = %err, "failed to list checkpoint dir");
            return;
        }
    };
    let keep = keep.map(|stem| format!("{stem}."));
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let current = keep.as_deref().is_some_and(|k| name.starts_with(k));
        if name.starts_with(WEIGHTS_PREFIX) && !current {
            if let Err(err) = fs::remove_file(entry.path()) {
                tracing::warn!(path = %entry.path().display(), error = %err, "failed to remove stale weights");
            }
        }
    }
}

fn checkpoint_err(path: &Path, err: impl std::fmt::Display) -> ClassifierError {
    ClassifierError::Checkpoint(format!("{}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logistic::LogisticConfig;

    fn defaults() -> ModelDefaults {
        ModelDefaults {
            n_classes: 2,
            cnn: CnnConfig { n_mels: 8, n_frames: 4, conv1_channels: 2, conv2_channels: 2, hidden: 4 },
        }
    }

    fn fitted_logistic() -> (ModelHandle, Vec<Vec<f32>>) {
        let rows = vec![vec![1.0, 0.0], vec![0.9, 0.1], vec![-1.0, 0.2], vec![-0.9, 0.0]];
        let lr = LogisticRegression::fit(&LogisticConfig::default(), &rows, &[0, 0, 1, 1], 2).unwrap();
        (ModelHandle::new(ModelState::LogisticRegression(lr), true), rows)
    }

    #[test]
    fn missing_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        assert!(store.load(ModelType::SpectrogramCnn, &defaults()).unwrap().is_none());
    }

    #[test]
    fn logistic_roundtrip_predicts_same_labels() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let (handle, rows) = fitted_logistic();
        store.save(&handle).unwrap();

        let loaded = store.load(ModelType::LogisticRegression, &defaults()).unwrap().unwrap();
        assert!(loaded.trained());
        let features = |rows: &[Vec<f32>]| rows.iter().cloned().map(voxclass_features::Features::Vector).collect();
        assert_eq!(
            loaded.classify(features(&rows), 1).unwrap(),
            handle.classify(features(&rows), 1).unwrap()
        );
    }

    #[test]
    fn unfitted_logistic_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.save(&ModelHandle::fresh(ModelType::LogisticRegression, &defaults()).unwrap()).unwrap();

        let loaded = store.load(ModelType::LogisticRegression, &defaults()).unwrap().unwrap();
        assert!(!loaded.trained());
        match loaded.state() {
            ModelState::LogisticRegression(lr) => assert!(!lr.is_fitted()),
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn cnn_roundtrip_and_mel_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let handle = ModelHandle::fresh(ModelType::SpectrogramCnn, &defaults()).unwrap();
        store.save(&handle).unwrap();

        let loaded = store.load(ModelType::SpectrogramCnn, &defaults()).unwrap().unwrap();
        match loaded.state() {
            ModelState::SpectrogramCnn(cnn) => assert_eq!(cnn.config(), &defaults().cnn),
            other => panic!("unexpected state: {other:?}"),
        }

        let mut other = defaults();
        other.cnn.n_mels = 16;
        assert!(matches!(
            store.load(ModelType::SpectrogramCnn, &other),
            Err(ClassifierError::Checkpoint(_))
        ));
    }

    fn weight_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(WEIGHTS_PREFIX))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn overwrite_keeps_one_generation() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let model_dir = dir.path().join(ModelType::SpectrogramCnn.slug());
        let handle = ModelHandle::fresh(ModelType::SpectrogramCnn, &defaults()).unwrap();

        store.save(&handle).unwrap();
        let first = weight_files(&model_dir);
        assert_eq!(first.len(), 1);

        // Weights left by a save that never reached its meta rename.
        fs::write(model_dir.join("weights-1.mpk.gz"), b"partial").unwrap();
        assert!(store.load(ModelType::SpectrogramCnn, &defaults()).unwrap().is_some());

        store.save(&ModelHandle::new(handle.state().clone(), true)).unwrap();
        let second = weight_files(&model_dir);
        assert_eq!(second.len(), 1);
        assert_ne!(first, second);
        assert!(!model_dir.join(META_TMP_FILE).exists());
        assert!(store.load(ModelType::SpectrogramCnn, &defaults()).unwrap().unwrap().trained());
    }

    #[test]
    fn refit_to_unfitted_drops_weights() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let model_dir = dir.path().join(ModelType::LogisticRegression.slug());

        store.save(&fitted_logistic().0).unwrap();
        assert_eq!(weight_files(&model_dir).len(), 1);
        store.save(&ModelHandle::fresh(ModelType::LogisticRegression, &defaults()).unwrap()).unwrap();
        assert!(weight_files(&model_dir).is_empty());
    }

    #[test]
    fn class_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.save(&fitted_logistic().0).unwrap();

        let three = ModelDefaults { n_classes: 3, ..defaults() };
        assert!(matches!(
            store.load(ModelType::LogisticRegression, &three),
            Err(ClassifierError::Checkpoint(_))
        ));
    }
}
