//! Dataset and batcher feeding mel spectrograms to the CNN.
//!
//! ```text
//! SpectrogramDataset ──► DataLoader ──► SpectrogramBatcher ──► [B, 1, M, T]
//! ```
//!
//! Every map in a dataset must already have the network's input shape;
//! `SpectrogramCnn` checks that before building a loader.

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use voxclass_features::FeatureMap;

use crate::backend;

/// One labeled training example.
#[derive(Debug, Clone)]
pub struct SpectrogramItem {
    pub map: FeatureMap,
    pub label: usize,
}

/// In-memory training set built from one retrain's sample history.
#[derive(Debug, Clone)]
pub struct SpectrogramDataset {
    items: Vec<SpectrogramItem>,
}

impl SpectrogramDataset {
    /// Pairs each map with its label. Extra entries on either side are
    /// dropped.
    pub fn new(maps: &[FeatureMap], labels: &[usize]) -> Self {
        let items = maps
            .iter()
            .zip(labels)
            .map(|(map, &label)| SpectrogramItem { map: map.clone(), label })
            .collect();
        Self { items }
    }
}

impl Dataset<SpectrogramItem> for SpectrogramDataset {
    fn get(&self, index: usize) -> Option<SpectrogramItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// A training mini-batch.
#[derive(Debug, Clone)]
pub struct SpectrogramBatch<B: Backend> {
    /// `[batch, 1, n_mels, n_frames]`
    pub maps: Tensor<B, 4>,
    /// `[batch]`
    pub targets: Tensor<B, 1, Int>,
}

/// Stacks maps of one fixed shape into input tensors.
#[derive(Debug, Clone)]
pub struct SpectrogramBatcher {
    n_mels: usize,
    n_frames: usize,
}

impl SpectrogramBatcher {
    pub fn new(n_mels: usize, n_frames: usize) -> Self {
        Self { n_mels, n_frames }
    }

    fn stack<'a, B: Backend>(
        &self,
        maps: impl ExactSizeIterator<Item = &'a FeatureMap>,
        device: &B::Device,
    ) -> Tensor<B, 4> {
        let len = maps.len();
        let mut flat = Vec::with_capacity(len * self.n_mels * self.n_frames);
        for map in maps {
            flat.extend_from_slice(map.as_slice());
        }
        Tensor::from_data(TensorData::new(flat, [len, 1, self.n_mels, self.n_frames]), device)
    }
}

impl<B: Backend> Batcher<B, SpectrogramItem, SpectrogramBatch<B>> for SpectrogramBatcher {
    fn batch(&self, items: Vec<SpectrogramItem>, device: &B::Device) -> SpectrogramBatch<B> {
        let labels: Vec<usize> = items.iter().map(|item| item.label).collect();
        SpectrogramBatch {
            maps: self.stack::<B>(items.iter().map(|item| &item.map), device),
            targets: backend::class_indices::<B>(&labels, device),
        }
    }
}

/// Unlabeled maps for inference.
impl<B: Backend> Batcher<B, FeatureMap, Tensor<B, 4>> for SpectrogramBatcher {
    fn batch(&self, items: Vec<FeatureMap>, device: &B::Device) -> Tensor<B, 4> {
        self.stack::<B>(items.iter(), device)
    }
}
