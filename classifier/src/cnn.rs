//! Small convolutional network over mel spectrograms.
//!
//! Two `conv 3x3 → relu → maxpool 2x2` stages followed by two dense layers:
//!
//! ```text
//! [B, 1, M, T] → conv1 → pool → conv2 → pool → flatten → fc1 → relu → fc2 → [B, K]
//! ```
//!
//! Pools use a one-cell padding, so each stage maps a side of `n` to
//! `n / 2 + 1`. Unlike the logistic model the network keeps its weights
//! between retrains and trains further on the full sample history.

use burn::{
    data::dataloader::DataLoaderBuilder,
    data::dataset::InMemDataset,
    module::AutodiffModule,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, PaddingConfig2d,
    },
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::activation::relu,
};
use serde::{Deserialize, Serialize};
use voxclass_features::FeatureMap;
use voxclass_store::ModelType;

use crate::backend::{self, InferBackend, TrainBackend};
use crate::data::{SpectrogramBatch, SpectrogramBatcher, SpectrogramDataset, SpectrogramItem};
use crate::ClassifierError;

/// Network architecture. Persisted next to the weights so a checkpoint can
/// be rebuilt with the same shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CnnConfig {
    /// Mel bands of the input map. Must equal the extractor's `n_mels`.
    pub n_mels: usize,
    /// Frames of the input map. Audio of a different length is rejected.
    pub n_frames: usize,
    pub conv1_channels: usize,
    pub conv2_channels: usize,
    pub hidden: usize,
}

impl Default for CnnConfig {
    fn default() -> Self {
        // 22050 samples at hop 512.
        Self { n_mels: 128, n_frames: 44, conv1_channels: 32, conv2_channels: 64, hidden: 500 }
    }
}

impl CnnConfig {
    pub fn validate(&self) -> Result<(), ClassifierError> {
        let sizes = [self.n_mels, self.n_frames, self.conv1_channels, self.conv2_channels, self.hidden];
        if sizes.contains(&0) {
            return Err(ClassifierError::Config(format!("cnn sizes must be positive: {self:?}")));
        }
        Ok(())
    }

    /// Length of the flattened activation after the second pool.
    pub fn flat_size(&self) -> usize {
        self.conv2_channels * pooled(pooled(self.n_mels)) * pooled(pooled(self.n_frames))
    }

    pub fn init<B: Backend>(&self, n_classes: usize, device: &B::Device) -> SpectrogramCnnModel<B> {
        let conv = |input, output| {
            Conv2dConfig::new([input, output], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device)
        };
        SpectrogramCnnModel {
            conv1: conv(1, self.conv1_channels),
            conv2: conv(self.conv1_channels, self.conv2_channels),
            pool: MaxPool2dConfig::new([2, 2])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            fc1: LinearConfig::new(self.flat_size(), self.hidden).init(device),
            fc2: LinearConfig::new(self.hidden, n_classes).init(device),
        }
    }
}

fn pooled(n: usize) -> usize {
    n / 2 + 1
}

/// Optimizer settings for one retrain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CnnTrainConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
}

impl Default for CnnTrainConfig {
    fn default() -> Self {
        Self { epochs: 5, batch_size: 32, learning_rate: 0.001 }
    }
}

#[derive(Module, Debug)]
pub struct SpectrogramCnnModel<B: Backend> {
    pub conv1: Conv2d<B>,
    pub conv2: Conv2d<B>,
    pub pool: MaxPool2d,
    pub fc1: Linear<B>,
    pub fc2: Linear<B>,
}

impl<B: Backend> SpectrogramCnnModel<B> {
    /// `x: [batch, 1, n_mels, n_frames]` → logits `[batch, n_classes]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.pool.forward(relu(self.conv1.forward(x)));
        let x = self.pool.forward(relu(self.conv2.forward(x)));
        let x: Tensor<B, 2> = x.flatten(1, 3);
        let x = relu(self.fc1.forward(x));
        self.fc2.forward(x)
    }
}

/// The network together with the shapes it was built for.
#[derive(Debug, Clone)]
pub struct SpectrogramCnn {
    config: CnnConfig,
    n_classes: usize,
    pub(crate) model: SpectrogramCnnModel<TrainBackend>,
}

impl SpectrogramCnn {
    /// A freshly initialized network with random weights.
    pub fn new(config: CnnConfig, n_classes: usize) -> Result<Self, ClassifierError> {
        config.validate()?;
        let model = config.init(n_classes, &backend::device());
        Ok(Self { config, n_classes, model })
    }

    pub(crate) fn from_parts(
        config: CnnConfig,
        n_classes: usize,
        model: SpectrogramCnnModel<TrainBackend>,
    ) -> Self {
        Self { config, n_classes, model }
    }

    pub fn config(&self) -> &CnnConfig {
        &self.config
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Trains the current weights further for `cfg.epochs` passes over
    /// shuffled mini-batches. Returns the mean loss of the last epoch.
    pub fn train(
        &mut self,
        cfg: &CnnTrainConfig,
        maps: &[FeatureMap],
        labels: &[usize],
    ) -> Result<f64, ClassifierError> {
        if maps.is_empty() {
            return Err(ClassifierError::NoTrainingData(ModelType::SpectrogramCnn));
        }
        self.check_shapes(maps)?;

        let device = backend::device();
        let ce = CrossEntropyLossConfig::new().init(&device);
        let mut optim = AdamConfig::new().init();
        let mut model = self.model.clone();
        let loader = DataLoaderBuilder::<TrainBackend, SpectrogramItem, SpectrogramBatch<TrainBackend>>::new(self.batcher())
            .batch_size(cfg.batch_size.max(1))
            .shuffle(rand::random())
            .build(SpectrogramDataset::new(maps, labels));
        let mut last_loss = f64::NAN;

        for epoch in 1..=cfg.epochs {
            let mut loss_sum = 0.0;
            let mut batches = 0usize;

            for batch in loader.iter() {
                let loss = ce.forward(model.forward(batch.maps), batch.targets);
                loss_sum += loss.clone().into_scalar().elem::<f64>();
                batches += 1;

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optim.step(cfg.learning_rate, model, grads);
            }

            last_loss = loss_sum / batches as f64;
            tracing::debug!(epoch, epochs = cfg.epochs, loss = last_loss, "cnn epoch finished");
        }

        self.model = model;
        Ok(last_loss)
    }

    /// Predicted class index for each map, in evaluation mode and input
    /// order.
    pub fn predict(&self, maps: &[FeatureMap], batch_size: usize) -> Result<Vec<usize>, ClassifierError> {
        self.check_shapes(maps)?;

        let model = self.model.valid();
        let loader = DataLoaderBuilder::<InferBackend, FeatureMap, Tensor<InferBackend, 4>>::new(self.batcher())
            .batch_size(batch_size.max(1))
            .build(InMemDataset::new(maps.to_vec()));
        let mut predictions = Vec::with_capacity(maps.len());
        for x in loader.iter() {
            predictions.extend(backend::argmax_rows(model.forward(x)));
        }
        Ok(predictions)
    }

    fn check_shapes(&self, maps: &[FeatureMap]) -> Result<(), ClassifierError> {
        let expected = (self.config.n_mels, self.config.n_frames);
        match maps.iter().find(|m| (m.n_mels(), m.n_frames()) != expected) {
            Some(m) => Err(ClassifierError::FeatureMismatch {
                model_type: ModelType::SpectrogramCnn,
                expected: format!("{}x{} map", expected.0, expected.1),
                got: format!("{}x{} map", m.n_mels(), m.n_frames()),
            }),
            None => Ok(()),
        }
    }

    fn batcher(&self) -> SpectrogramBatcher {
        SpectrogramBatcher::new(self.config.n_mels, self.config.n_frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> CnnConfig {
        CnnConfig { n_mels: 8, n_frames: 6, conv1_channels: 2, conv2_channels: 4, hidden: 8 }
    }

    fn map(cfg: &CnnConfig, value: f32) -> FeatureMap {
        FeatureMap::new(cfg.n_mels, cfg.n_frames, vec![value; cfg.n_mels * cfg.n_frames]).unwrap()
    }

    #[test]
    fn default_flat_size() {
        // 128 → 65 → 33 mels, 44 → 23 → 12 frames.
        assert_eq!(CnnConfig::default().flat_size(), 64 * 33 * 12);
    }

    #[test]
    fn forward_shape() {
        let cfg = small();
        let model = cfg.init::<InferBackend>(3, &backend::device());
        let x = Tensor::<InferBackend, 4>::zeros([5, 1, cfg.n_mels, cfg.n_frames], &backend::device());
        assert_eq!(model.forward(x).dims(), [5, 3]);
    }

    #[test]
    fn zero_size_rejected() {
        let cfg = CnnConfig { hidden: 0, ..small() };
        assert!(matches!(SpectrogramCnn::new(cfg, 2), Err(ClassifierError::Config(_))));
    }

    #[test]
    fn train_and_predict() {
        let cfg = small();
        let mut cnn = SpectrogramCnn::new(cfg.clone(), 2).unwrap();
        let maps = vec![map(&cfg, 0.0), map(&cfg, 1.0), map(&cfg, 0.1), map(&cfg, 0.9)];
        let labels = [0, 1, 0, 1];

        let train = CnnTrainConfig { epochs: 2, batch_size: 3, learning_rate: 0.001 };
        let loss = cnn.train(&train, &maps, &labels).unwrap();
        assert!(loss.is_finite());

        let predictions = cnn.predict(&maps, 2).unwrap();
        assert_eq!(predictions.len(), maps.len());
        assert!(predictions.iter().all(|&p| p < 2));
        assert_eq!(cnn.predict(&maps, 1).unwrap(), predictions);
        assert_eq!(cnn.predict(&maps, 16).unwrap(), predictions);
    }

    #[test]
    fn shape_mismatch() {
        let cfg = small();
        let cnn = SpectrogramCnn::new(cfg.clone(), 2).unwrap();
        let wrong = FeatureMap::new(cfg.n_mels, cfg.n_frames + 1, vec![0.0; cfg.n_mels * (cfg.n_frames + 1)]).unwrap();
        assert!(matches!(
            cnn.predict(&[wrong], 1),
            Err(ClassifierError::FeatureMismatch { model_type: ModelType::SpectrogramCnn, .. })
        ));
    }

    #[test]
    fn empty_training_set() {
        let mut cnn = SpectrogramCnn::new(small(), 2).unwrap();
        assert!(matches!(
            cnn.train(&CnnTrainConfig::default(), &[], &[]),
            Err(ClassifierError::NoTrainingData(ModelType::SpectrogramCnn))
        ));
    }
}
