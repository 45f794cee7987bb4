//! Redb-based persistent sample store implementation.
//!
//! Samples are JSON documents keyed by their id, so table order is
//! insertion order. Transactions run on tokio's blocking pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use redb::{Database, ReadableTable, TableDefinition};

use crate::{LabeledSample, ModelType, SampleStore, StoreError, StoreResult, StoredSample};

const SAMPLES: TableDefinition<u64, &[u8]> = TableDefinition::new("labeled_samples");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");
const NEXT_ID: &str = "next_id";

fn storage<E: ToString>(e: E) -> StoreError {
    StoreError::Storage(e.to_string())
}

/// A persistent sample store backed by redb.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a redb store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = Database::create(path).map_err(storage)?;

        // Create the tables if they don't exist
        let tx = db.begin_write().map_err(storage)?;
        {
            let _ = tx.open_table(SAMPLES).map_err(storage)?;
            let _ = tx.open_table(META).map_err(storage)?;
        }
        tx.commit().map_err(storage)?;

        Ok(Self { db: Arc::new(db) })
    }

    async fn run<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> StoreResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db)).await.map_err(storage)?
    }
}

fn scan(db: &Database, filter: Option<ModelType>) -> StoreResult<Vec<StoredSample>> {
    let tx = db.begin_read().map_err(storage)?;
    let table = tx.open_table(SAMPLES).map_err(storage)?;

    let mut results = Vec::new();
    for item in table.iter().map_err(storage)? {
        let (_, value) = item.map_err(storage)?;
        let stored: StoredSample = serde_json::from_slice(value.value())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        if filter.is_none_or(|t| stored.sample.model_type == t) {
            results.push(stored);
        }
    }
    Ok(results)
}

#[async_trait]
impl SampleStore for RedbStore {
    async fn append(&self, sample: LabeledSample) -> StoreResult<StoredSample> {
        self.run(move |db| {
            let tx = db.begin_write().map_err(storage)?;
            let stored = {
                let mut meta = tx.open_table(META).map_err(storage)?;
                let id = meta
                    .get(NEXT_ID)
                    .map_err(storage)?
                    .map(|v| v.value())
                    .unwrap_or(1);
                meta.insert(NEXT_ID, id + 1).map_err(storage)?;

                let stored = StoredSample { id, created_at: Utc::now(), sample };
                let doc = serde_json::to_vec(&stored)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;

                let mut samples = tx.open_table(SAMPLES).map_err(storage)?;
                samples.insert(id, doc.as_slice()).map_err(storage)?;
                stored
            };
            tx.commit().map_err(storage)?;
            Ok(stored)
        })
        .await
    }

    async fn find_by_model_type(&self, model_type: ModelType) -> StoreResult<Vec<StoredSample>> {
        self.run(move |db| scan(db, Some(model_type))).await
    }

    async fn all(&self) -> StoreResult<Vec<StoredSample>> {
        self.run(|db| scan(db, None)).await
    }

    async fn clear(&self) -> StoreResult<u64> {
        self.run(|db| {
            let tx = db.begin_write().map_err(storage)?;
            let removed = {
                let mut table = tx.open_table(SAMPLES).map_err(storage)?;
                let mut keys = Vec::new();
                for item in table.iter().map_err(storage)? {
                    let (key, _) = item.map_err(storage)?;
                    keys.push(key.value());
                }
                for key in &keys {
                    table.remove(*key).map_err(storage)?;
                }
                keys.len() as u64
            };
            tx.commit().map_err(storage)?;
            Ok(removed)
        })
        .await
    }
}
