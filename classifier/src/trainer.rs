//! Retraining and resubstitution accuracy.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use voxclass_features::{Extractor, Features};
use voxclass_store::LabeledSample;

use crate::accuracy::Accuracy;
use crate::cnn::CnnTrainConfig;
use crate::codec::LabelCodec;
use crate::logistic::{LogisticConfig, LogisticRegression};
use crate::registry::{ModelHandle, ModelState};
use crate::ClassifierError;

/// Optimizer settings for both model types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub logistic: LogisticConfig,
    pub cnn: CnnTrainConfig,
}

/// Turns samples into features and features into models.
///
/// Holds no model state itself; callers pass the current handle in and get
/// a replacement back, so the registry entry's lock is the only
/// synchronization point.
#[derive(Debug)]
pub struct Trainer {
    extractor: Extractor,
    codec: LabelCodec,
    config: TrainConfig,
}

impl Trainer {
    pub fn new(extractor: Extractor, codec: LabelCodec, config: TrainConfig) -> Self {
        Self { extractor, codec, config }
    }

    pub fn codec(&self) -> &LabelCodec {
        &self.codec
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Checks that `sample` can join the training history of `handle`'s
    /// model type before it is stored.
    ///
    /// The label must be known and the audio must yield features the model
    /// can train on. `first` is any sample already stored for the model
    /// type. Logistic regression refits from scratch, so its input length is
    /// set by that history and not by the current fit; with no history any
    /// length is accepted. The CNN input shape is fixed by its architecture.
    pub fn validate(
        &self,
        handle: &ModelHandle,
        sample: &LabeledSample,
        first: Option<&LabeledSample>,
    ) -> Result<(), ClassifierError> {
        self.codec.encode(&sample.label)?;
        let kind = handle.feature_kind();
        let features = self.extractor.extract(&sample.raw_audio, kind)?;
        match handle.state() {
            ModelState::LogisticRegression(_) => {
                let Some(first) = first else {
                    return Ok(());
                };
                let expected = self.extractor.extract(&first.raw_audio, kind)?.len();
                if features.len() != expected {
                    return Err(ClassifierError::FeatureMismatch {
                        model_type: handle.model_type(),
                        expected: format!("{expected} values"),
                        got: format!("{} values", features.len()),
                    });
                }
                Ok(())
            }
            ModelState::SpectrogramCnn(_) => handle.check_features(&features),
        }
    }

    /// Label predicted by `handle` for one clip.
    pub fn predict(&self, handle: &ModelHandle, raw_audio: &[f32]) -> Result<String, ClassifierError> {
        let features = self.extractor.extract(raw_audio, handle.feature_kind())?;
        handle.check_features(&features)?;
        let codes = handle.classify(vec![features], 1)?;
        let code = codes
            .first()
            .copied()
            .ok_or(ClassifierError::ModelNotTrained(handle.model_type()))?;
        Ok(self.codec.decode(code)?.to_string())
    }

    /// Features and encoded labels for `samples`, in order.
    pub fn features(
        &self,
        handle: &ModelHandle,
        samples: &[LabeledSample],
    ) -> Result<(Vec<Features>, Vec<usize>), ClassifierError> {
        let kind = handle.feature_kind();
        let mut features = Vec::with_capacity(samples.len());
        let mut labels = Vec::with_capacity(samples.len());
        for sample in samples {
            labels.push(self.codec.encode(&sample.label)?);
            features.push(self.extractor.extract(&sample.raw_audio, kind)?);
        }
        Ok((features, labels))
    }

    /// Fits a replacement for `handle` on the full sample history of its
    /// model type and measures accuracy on that same history.
    ///
    /// The logistic model is refit from scratch; the CNN continues from its
    /// current weights. `handle` itself is left untouched.
    pub fn retrain(
        &self,
        handle: &ModelHandle,
        samples: &[LabeledSample],
    ) -> Result<(ModelHandle, Accuracy), ClassifierError> {
        let model_type = handle.model_type();
        if samples.is_empty() {
            return Err(ClassifierError::NoTrainingData(model_type));
        }
        let started = Instant::now();
        let (features, labels) = self.features(handle, samples)?;

        let state = match handle.state() {
            ModelState::LogisticRegression(_) => {
                let rows: Vec<Vec<f32>> = features
                    .into_iter()
                    .filter_map(|f| match f {
                        Features::Vector(v) => Some(v),
                        Features::Map(_) => None,
                    })
                    .collect();
                let model = LogisticRegression::fit(&self.config.logistic, &rows, &labels, self.codec.len())?;
                ModelState::LogisticRegression(model)
            }
            ModelState::SpectrogramCnn(cnn) => {
                let maps: Vec<_> = features
                    .into_iter()
                    .filter_map(|f| match f {
                        Features::Map(m) => Some(m),
                        Features::Vector(_) => None,
                    })
                    .collect();
                let mut cnn = cnn.clone();
                cnn.train(&self.config.cnn, &maps, &labels)?;
                ModelState::SpectrogramCnn(cnn)
            }
        };

        let retrained = ModelHandle::new(state, true);
        let accuracy = self.score(&retrained, samples)?;
        tracing::info!(
            %model_type,
            samples = samples.len(),
            %accuracy,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "retrained model"
        );
        Ok((retrained, accuracy))
    }

    /// Accuracy of `handle` on `samples` without changing it.
    ///
    /// Unavailable when there are no samples or the logistic model has never
    /// been fitted. The CNN is scored even with its initial weights.
    pub fn evaluate(&self, handle: &ModelHandle, samples: &[LabeledSample]) -> Result<Accuracy, ClassifierError> {
        if samples.is_empty() {
            return Ok(Accuracy::Unavailable);
        }
        if let ModelState::LogisticRegression(lr) = handle.state() {
            if !lr.is_fitted() {
                return Ok(Accuracy::Unavailable);
            }
        }
        self.score(handle, samples)
    }

    fn score(&self, handle: &ModelHandle, samples: &[LabeledSample]) -> Result<Accuracy, ClassifierError> {
        let (features, labels) = self.features(handle, samples)?;
        let predicted = handle.classify(features, self.config.cnn.batch_size)?;
        let correct = predicted.iter().zip(&labels).filter(|(p, l)| p == l).count();
        Ok(Accuracy::from_counts(correct, labels.len()))
    }
}
