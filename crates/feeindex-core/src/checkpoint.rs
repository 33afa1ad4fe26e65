//! Checkpoint store. Persists each chain's scraping position for crash recovery.
//!
//! A checkpoint records the last block whose events were fully persisted.
//! On restart, the scraper resumes from `last_block + 1` instead of
//! re-scraping from the oldest known block.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{CheckpointReadError, CheckpointWriteError};
use crate::types::{ChainCheckpoint, ChainId};

/// Trait for storing and loading per-chain checkpoints.
///
/// Implementations include `MemoryCheckpointStore` (below) and the
/// SQLite/Postgres backends in `feeindex-storage`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the stored checkpoint for a chain, `None` if the chain has
    /// never advanced.
    async fn load_checkpoint(
        &self,
        chain_id: ChainId,
    ) -> Result<Option<ChainCheckpoint>, CheckpointReadError>;

    /// Upsert the checkpoint for a chain.
    ///
    /// Must be atomic: readers observe either the old or the new value.
    async fn set_checkpoint(
        &self,
        chain_id: ChainId,
        block_number: u64,
    ) -> Result<(), CheckpointWriteError>;

    /// Last processed block for a chain, or `default` when no record exists.
    async fn get_checkpoint(
        &self,
        chain_id: ChainId,
        default: u64,
    ) -> Result<u64, CheckpointReadError> {
        Ok(self
            .load_checkpoint(chain_id)
            .await?
            .map(|cp| cp.last_block)
            .unwrap_or(default))
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

/// In-memory checkpoint store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<HashMap<ChainId, u64>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored checkpoints, ordered by chain id.
    pub fn all(&self) -> Vec<ChainCheckpoint> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<_> = data
            .iter()
            .map(|(&chain_id, &last_block)| ChainCheckpoint { chain_id, last_block })
            .collect();
        out.sort_by_key(|cp| cp.chain_id);
        out
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load_checkpoint(
        &self,
        chain_id: ChainId,
    ) -> Result<Option<ChainCheckpoint>, CheckpointReadError> {
        let data = self
            .data
            .lock()
            .map_err(|e| CheckpointReadError(e.to_string()))?;
        Ok(data
            .get(&chain_id)
            .map(|&last_block| ChainCheckpoint { chain_id, last_block }))
    }

    async fn set_checkpoint(
        &self,
        chain_id: ChainId,
        block_number: u64,
    ) -> Result<(), CheckpointWriteError> {
        self.data
            .lock()
            .map_err(|e| CheckpointWriteError(e.to_string()))?
            .insert(chain_id, block_number);
        Ok(())
    }
}
