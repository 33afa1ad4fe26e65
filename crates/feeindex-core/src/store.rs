//! Event store: duplicate-tolerant persistence of decoded fee events.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

use crate::error::EventPersistError;
use crate::types::{ChainId, EventKey, FeeEvent};

/// Result of a bulk insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Records newly written by this call.
    pub inserted: u64,
    /// Records skipped because their `(chain, tx, log_index)` key was already stored.
    pub duplicates: u64,
}

/// Trait for persisting fee events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Bulk-persist `events`.
    ///
    /// Uniqueness violations on individual records are skipped and counted
    /// in [`InsertOutcome::duplicates`]; any other failure fails the whole
    /// call. An empty slice must not touch storage.
    async fn insert_batch(&self, events: &[FeeEvent]) -> Result<InsertOutcome, EventPersistError>;
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

#[derive(Default)]
struct MemoryEvents {
    keys: HashSet<EventKey>,
    events: Vec<FeeEvent>,
}

/// In-memory event store enforcing the uniqueness key.
#[derive(Default)]
pub struct MemoryEventStore {
    inner: Mutex<MemoryEvents>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored events for a chain, in insertion order.
    pub fn events(&self, chain_id: ChainId) -> Vec<FeeEvent> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .events
            .iter()
            .filter(|e| e.chain_id == chain_id)
            .cloned()
            .collect()
    }

    /// Total number of stored events across chains.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn insert_batch(&self, events: &[FeeEvent]) -> Result<InsertOutcome, EventPersistError> {
        if events.is_empty() {
            return Ok(InsertOutcome::default());
        }

        let mut inner = self
            .inner
            .lock()
            .map_err(|e| EventPersistError(e.to_string()))?;

        let mut outcome = InsertOutcome::default();
        for event in events {
            if inner.keys.insert(event.key()) {
                inner.events.push(event.clone());
                outcome.inserted += 1;
            } else {
                outcome.duplicates += 1;
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;
    use chrono::DateTime;

    fn ev(chain_id: ChainId, tx: &str, log_index: u64) -> FeeEvent {
        FeeEvent {
            chain_id,
            token: "0x0".into(),
            integrator: "0x1".into(),
            integrator_fee: U256::from(10u64),
            lifi_fee: U256::from(1u64),
            block_number: 100,
            transaction_hash: tx.into(),
            log_index,
            timestamp: DateTime::from_timestamp(0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn duplicates_are_skipped_and_counted() {
        let store = MemoryEventStore::new();
        let first = store
            .insert_batch(&[ev(1, "0xa", 0), ev(1, "0xa", 1)])
            .await
            .unwrap();
        assert_eq!(first, InsertOutcome { inserted: 2, duplicates: 0 });

        let second = store
            .insert_batch(&[ev(1, "0xa", 1), ev(1, "0xb", 0)])
            .await
            .unwrap();
        assert_eq!(second, InsertOutcome { inserted: 1, duplicates: 1 });
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn same_tx_on_other_chain_is_distinct() {
        let store = MemoryEventStore::new();
        store.insert_batch(&[ev(1, "0xa", 0)]).await.unwrap();
        let out = store.insert_batch(&[ev(10, "0xa", 0)]).await.unwrap();
        assert_eq!(out.inserted, 1);
        assert_eq!(store.events(10).len(), 1);
    }

    #[tokio::test]
    async fn empty_batch_is_noop() {
        let store = MemoryEventStore::new();
        assert_eq!(store.insert_batch(&[]).await.unwrap(), InsertOutcome::default());
        assert!(store.is_empty());
    }
}
