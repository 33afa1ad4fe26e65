//! In-memory storage backend.
//!
//! Stores checkpoints and fee events in RAM. Useful for testing and
//! short-lived runs that don't need persistence.

use async_trait::async_trait;

use feeindex_core::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use feeindex_core::error::{CheckpointReadError, CheckpointWriteError, EventPersistError};
use feeindex_core::store::{EventStore, InsertOutcome, MemoryEventStore};
use feeindex_core::types::{ChainCheckpoint, ChainId, FeeEvent};

use crate::EventQuery;

/// In-memory scraper storage.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    checkpoints: MemoryCheckpointStore,
    events: MemoryEventStore,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored events matching `query`, ordered by `(block, log_index)`.
    pub fn query_events(&self, query: &EventQuery) -> Vec<FeeEvent> {
        let mut events: Vec<FeeEvent> = self
            .events
            .events(query.chain_id)
            .into_iter()
            .filter(|e| query.matches(e))
            .collect();
        events.sort_by_key(|e| (e.block_number, e.log_index));
        if let Some(limit) = query.limit {
            events.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        events
    }

    /// Number of stored events for a chain.
    pub fn event_count(&self, chain_id: ChainId) -> u64 {
        self.events.events(chain_id).len() as u64
    }

    pub fn checkpoints(&self) -> Vec<ChainCheckpoint> {
        self.checkpoints.all()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStorage {
    async fn load_checkpoint(
        &self,
        chain_id: ChainId,
    ) -> Result<Option<ChainCheckpoint>, CheckpointReadError> {
        self.checkpoints.load_checkpoint(chain_id).await
    }

    async fn set_checkpoint(
        &self,
        chain_id: ChainId,
        block_number: u64,
    ) -> Result<(), CheckpointWriteError> {
        self.checkpoints.set_checkpoint(chain_id, block_number).await
    }
}

#[async_trait]
impl EventStore for InMemoryStorage {
    async fn insert_batch(&self, events: &[FeeEvent]) -> Result<InsertOutcome, EventPersistError> {
        self.events.insert_batch(events).await
    }
}
