//! Trade store - durable mapping from trade id to trade record
//!
//! In-memory storage guarded by a single RwLock (in production this
//! would be a database). A missing id is always reported as a
//! dedicated `NotFound` error, never as a zeroed sentinel record, and
//! `update` gives single-record atomic read-modify-write.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::TradeError;
use crate::model::{TradeId, TradeRecord};
use crate::TradeResult;

/// Durable mapping from trade identifier to trade record
#[derive(Clone, Default)]
pub struct TradeStore {
    records: Arc<RwLock<HashMap<TradeId, TradeRecord>>>,
}

impl TradeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new record; fails with `Conflict` if the id exists and
    /// leaves the existing record untouched.
    pub async fn create(&self, record: TradeRecord) -> TradeResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(TradeError::conflict(record.id.to_hex()));
        }
        records.insert(record.id, record);
        Ok(())
    }

    /// Fetch a record by id, failing with `NotFound` for unknown ids
    pub async fn get(&self, id: &TradeId) -> TradeResult<TradeRecord> {
        self.records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| TradeError::not_found(id.to_hex()))
    }

    /// Atomically read-modify-write a single record.
    ///
    /// The mutator runs under the write lock; if it fails the record is
    /// left exactly as it was.
    pub async fn update<F, T>(&self, id: &TradeId, mutator: F) -> TradeResult<T>
    where
        F: FnOnce(&mut TradeRecord) -> TradeResult<T>,
    {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| TradeError::not_found(id.to_hex()))?;

        let mut staged = record.clone();
        let out = mutator(&mut staged)?;
        *record = staged;
        Ok(out)
    }

    /// Number of records held (terminal trades are retained as audit trail)
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}
