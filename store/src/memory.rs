//! In-memory sample store implementation for testing.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use crate::{LabeledSample, ModelType, SampleStore, StoreError, StoreResult, StoredSample};

#[derive(Default)]
struct Inner {
    samples: Vec<StoredSample>,
    next_id: u64,
}

/// An in-memory sample store backed by a Vec.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|e| StoreError::Storage(e.to_string()))
    }
}

#[async_trait]
impl SampleStore for MemoryStore {
    async fn append(&self, sample: LabeledSample) -> StoreResult<StoredSample> {
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let stored = StoredSample { id: inner.next_id, created_at: Utc::now(), sample };
        inner.samples.push(stored.clone());
        Ok(stored)
    }

    async fn find_by_model_type(&self, model_type: ModelType) -> StoreResult<Vec<StoredSample>> {
        let inner = self.lock()?;
        Ok(inner
            .samples
            .iter()
            .filter(|s| s.sample.model_type == model_type)
            .cloned()
            .collect())
    }

    async fn all(&self) -> StoreResult<Vec<StoredSample>> {
        Ok(self.lock()?.samples.clone())
    }

    async fn clear(&self) -> StoreResult<u64> {
        let mut inner = self.lock()?;
        let removed = inner.samples.len() as u64;
        inner.samples.clear();
        Ok(removed)
    }
}
