//! Error types for the scraping pipeline.

use thiserror::Error;

use crate::types::{BlockRange, ChainId};

/// Failure while reading the chain head or loading events.
#[derive(Debug, Error)]
pub enum ChainQueryError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("block {0} not found")]
    MissingBlock(u64),

    #[error("invalid block range {from}-{to}")]
    InvalidRange { from: u64, to: u64 },

    #[error("event at block {block} outside requested range {range}")]
    OutOfRange { block: u64, range: BlockRange },
}

/// Storage failure while bulk-inserting events (duplicates excluded).
#[derive(Debug, Error)]
#[error("event persistence failed: {0}")]
pub struct EventPersistError(pub String);

/// Storage failure while reading a checkpoint.
#[derive(Debug, Error)]
#[error("checkpoint read failed: {0}")]
pub struct CheckpointReadError(pub String);

/// The checkpoint upsert did not succeed.
#[derive(Debug, Error)]
#[error("checkpoint write failed: {0}")]
pub struct CheckpointWriteError(pub String);

/// Errors surfaced by [`BatchScraper`](crate::scraper::BatchScraper).
///
/// Every variant carries the chain and, where one was computed, the block
/// range of the failed cycle.
#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("invalid scraper config: {0}")]
    InvalidConfig(String),

    #[error("chain {chain_id}: {source}")]
    CheckpointRead {
        chain_id: ChainId,
        #[source]
        source: CheckpointReadError,
    },

    #[error("chain {chain_id}: reading chain head: {source}")]
    ChainHead {
        chain_id: ChainId,
        #[source]
        source: ChainQueryError,
    },

    #[error("chain {chain_id}: loading events for blocks {range}: {source}")]
    LoadEvents {
        chain_id: ChainId,
        range: BlockRange,
        #[source]
        source: ChainQueryError,
    },

    #[error("chain {chain_id}: persisting events for blocks {range}: {source}")]
    PersistEvents {
        chain_id: ChainId,
        range: BlockRange,
        #[source]
        source: EventPersistError,
    },

    #[error("chain {chain_id}: advancing checkpoint to block {} after blocks {range}: {source}", range.to)]
    CheckpointWrite {
        chain_id: ChainId,
        range: BlockRange,
        #[source]
        source: CheckpointWriteError,
    },
}

impl ScraperError {
    /// The chain the failed cycle belonged to, if any.
    pub fn chain_id(&self) -> Option<ChainId> {
        match self {
            Self::InvalidConfig(_) => None,
            Self::CheckpointRead { chain_id, .. }
            | Self::ChainHead { chain_id, .. }
            | Self::LoadEvents { chain_id, .. }
            | Self::PersistEvents { chain_id, .. }
            | Self::CheckpointWrite { chain_id, .. } => Some(*chain_id),
        }
    }

    /// Returns `true` if the chunk's events are durably stored but the
    /// checkpoint was not advanced. Retrying the same range is safe.
    pub fn is_unrecorded_progress(&self) -> bool {
        matches!(self, Self::CheckpointWrite { .. })
    }
}
