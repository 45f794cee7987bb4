//! Labeled sample store interface and implementations.
//!
//! Provides an append-only, async [`SampleStore`] trait with an in-memory
//! implementation for testing and a redb-based implementation for
//! persistence. Samples are documents queried by exact model type match;
//! there is no secondary index and no transaction spanning an append and a
//! later query.

pub mod memory;
pub mod redb;
mod sample;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;
pub use redb::RedbStore;
pub use sample::{LabelCount, LabeledSample, ModelType, StoredSample, UnknownModelType};

/// Errors that can occur in store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store: storage error: {0}")]
    Storage(String),

    #[error("store: serialization error: {0}")]
    Serialization(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Append-only collection of labeled samples.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Persist a sample and return it with its assigned id.
    async fn append(&self, sample: LabeledSample) -> StoreResult<StoredSample>;

    /// All samples for one model type, in insertion order.
    async fn find_by_model_type(&self, model_type: ModelType) -> StoreResult<Vec<StoredSample>>;

    /// Every stored sample, in insertion order.
    async fn all(&self) -> StoreResult<Vec<StoredSample>>;

    /// Delete every sample. Returns how many were removed.
    async fn clear(&self) -> StoreResult<u64>;

    /// Sample counts grouped by `(model_type, label)`, sorted by that key.
    async fn count_by_model_type_and_label(&self) -> StoreResult<Vec<LabelCount>> {
        let mut groups: BTreeMap<(ModelType, String), usize> = BTreeMap::new();
        for stored in self.all().await? {
            *groups.entry((stored.sample.model_type, stored.sample.label)).or_insert(0) += 1;
        }
        Ok(groups
            .into_iter()
            .map(|((model_type, label), count)| LabelCount { model_type, label, count })
            .collect())
    }
}

impl fmt::Debug for dyn SampleStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SampleStore {{ ... }}")
    }
}
