//! Multinomial logistic regression over DFT features.
//!
//! Every fit starts from zero weights and runs full-batch Adam on the
//! L2-regularized cross-entropy
//!
//! ```text
//! loss = CE(W·x + b, y) + ||W||² / (2·C·n)
//! ```
//!
//! which is the mean-scaled form of the usual `C`-weighted objective.
//! Columns are standardized with statistics from the training set; the
//! scaler is part of the fitted model and is applied again at prediction
//! time.

use burn::{
    module::AutodiffModule,
    nn::{loss::CrossEntropyLossConfig, Initializer, Linear, LinearConfig},
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
};
use serde::{Deserialize, Serialize};
use voxclass_store::ModelType;

use crate::backend::{self, InferBackend, TrainBackend};
use crate::ClassifierError;

/// Hyperparameters for [`LogisticRegression::fit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticConfig {
    /// Number of full-batch optimizer steps.
    pub max_iter: usize,
    pub learning_rate: f64,
    /// Inverse regularization strength.
    pub c: f64,
}

impl Default for LogisticConfig {
    fn default() -> Self {
        Self { max_iter: 100, learning_rate: 0.1, c: 1.0 }
    }
}

#[derive(Module, Debug)]
pub struct LogisticModel<B: Backend> {
    pub linear: Linear<B>,
}

impl<B: Backend> LogisticModel<B> {
    pub fn new(n_features: usize, n_classes: usize, device: &B::Device) -> Self {
        let linear = LinearConfig::new(n_features, n_classes)
            .with_initializer(Initializer::Zeros)
            .init(device);
        Self { linear }
    }

    /// `x: [batch, n_features]` → logits `[batch, n_classes]`
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.linear.forward(x)
    }
}

/// Per-column standardization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    mean: Vec<f32>,
    scale: Vec<f32>,
}

impl Scaler {
    /// Fits mean and standard deviation per column. Constant columns get a
    /// scale of 1 so they map to zero instead of dividing by zero.
    pub fn fit(rows: &[Vec<f32>]) -> Self {
        let cols = rows.first().map_or(0, Vec::len);
        let n = rows.len().max(1) as f64;

        let mut mean = vec![0.0f64; cols];
        for row in rows {
            for (m, &v) in mean.iter_mut().zip(row) {
                *m += v as f64;
            }
        }
        for m in &mut mean {
            *m /= n;
        }

        let mut var = vec![0.0f64; cols];
        for row in rows {
            for ((s, &v), &m) in var.iter_mut().zip(row).zip(&mean) {
                let d = v as f64 - m;
                *s += d * d;
            }
        }

        let scale = var
            .iter()
            .map(|&s| {
                let std = (s / n).sqrt();
                if std < 1e-12 { 1.0 } else { std as f32 }
            })
            .collect();

        Self { mean: mean.into_iter().map(|m| m as f32).collect(), scale }
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, row: &[f32]) -> Vec<f32> {
        row.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(&v, (&m, &s))| (v - m) / s)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Fitted {
    pub(crate) model: LogisticModel<InferBackend>,
    pub(crate) scaler: Scaler,
}

/// A logistic regression classifier that is either unfitted or fitted to a
/// fixed feature length.
#[derive(Debug, Clone, Default)]
pub struct LogisticRegression {
    pub(crate) fitted: Option<Fitted>,
}

impl LogisticRegression {
    /// An unfitted classifier. Predicting with it fails until [`fit`] runs.
    ///
    /// [`fit`]: LogisticRegression::fit
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Feature length the model was fitted on.
    pub fn n_features(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.scaler.n_features())
    }

    /// Fits a fresh model in one full-batch call.
    pub fn fit(
        cfg: &LogisticConfig,
        features: &[Vec<f32>],
        labels: &[usize],
        n_classes: usize,
    ) -> Result<Self, ClassifierError> {
        if features.is_empty() {
            return Err(ClassifierError::NoTrainingData(ModelType::LogisticRegression));
        }
        let n_features = features[0].len();
        check_lengths(features, n_features)?;

        let scaler = Scaler::fit(features);
        let scaled: Vec<Vec<f32>> = features.iter().map(|row| scaler.transform(row)).collect();

        let device = backend::device();
        let x = backend::matrix::<TrainBackend>(&scaled, &device);
        let y = backend::class_indices::<TrainBackend>(labels, &device);

        let mut model = LogisticModel::<TrainBackend>::new(n_features, n_classes, &device);
        let mut optim = AdamConfig::new().init();
        let ce = CrossEntropyLossConfig::new().init(&device);
        let penalty = 0.5 / (cfg.c * features.len() as f64);

        for _ in 0..cfg.max_iter {
            let logits = model.forward(x.clone());
            let weight = model.linear.weight.val();
            let loss = ce.forward(logits, y.clone()) + (weight.clone() * weight).sum() * penalty;

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(cfg.learning_rate, model, grads);
        }

        Ok(Self { fitted: Some(Fitted { model: model.valid(), scaler }) })
    }

    /// Predicted class index for each row.
    pub fn predict(&self, features: &[Vec<f32>]) -> Result<Vec<usize>, ClassifierError> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or(ClassifierError::ModelNotTrained(ModelType::LogisticRegression))?;
        if features.is_empty() {
            return Ok(Vec::new());
        }
        check_lengths(features, fitted.scaler.n_features())?;

        let scaled: Vec<Vec<f32>> = features.iter().map(|row| fitted.scaler.transform(row)).collect();
        let x = backend::matrix::<InferBackend>(&scaled, &backend::device());
        Ok(backend::argmax_rows(fitted.model.forward(x)))
    }
}

fn check_lengths(features: &[Vec<f32>], expected: usize) -> Result<(), ClassifierError> {
    match features.iter().find(|row| row.len() != expected) {
        Some(row) => Err(ClassifierError::FeatureMismatch {
            model_type: ModelType::LogisticRegression,
            expected: format!("{expected} values"),
            got: format!("{} values", row.len()),
        }),
        None => Ok(()),
    }
}
