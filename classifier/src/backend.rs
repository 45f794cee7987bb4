//! Burn backend selection and tensor conversion helpers.
//!
//! Both models run on the CPU ndarray backend. Training wraps it in
//! `Autodiff`; `AutodiffModule::valid()` drops back to the inner backend for
//! inference and evaluation.

use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};
use burn::prelude::*;

pub type InferBackend = NdArray<f32>;
pub type TrainBackend = Autodiff<InferBackend>;

pub fn device() -> NdArrayDevice {
    NdArrayDevice::default()
}

/// Stacks equal-length rows into a `[rows, cols]` tensor.
pub(crate) fn matrix<B: Backend>(rows: &[Vec<f32>], device: &B::Device) -> Tensor<B, 2> {
    let cols = rows.first().map_or(0, Vec::len);
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    Tensor::from_data(TensorData::new(flat, [rows.len(), cols]), device)
}

/// Class indices as a `[n]` integer tensor.
pub(crate) fn class_indices<B: Backend>(labels: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let values: Vec<i64> = labels.iter().map(|&l| l as i64).collect();
    Tensor::from_data(TensorData::new(values, [labels.len()]), device)
}

/// Index of the largest logit in each row.
pub(crate) fn argmax_rows<B: Backend>(logits: Tensor<B, 2>) -> Vec<usize> {
    logits
        .argmax(1)
        .into_data()
        .iter::<i64>()
        .map(|v| v as usize)
        .collect()
}
