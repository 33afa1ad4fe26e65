//! Chain event source, the scraper's view of a single chain.

use async_trait::async_trait;

use crate::error::ChainQueryError;
use crate::types::FeeEvent;

/// Queries chain height and loads decoded fee events for one chain.
///
/// Implementations own transport and decoding details; the scraper only
/// sees typed [`FeeEvent`]s.
#[async_trait]
pub trait ChainEventSource: Send + Sync {
    /// Current best-known block height reported by the network.
    async fn chain_head(&self) -> Result<u64, ChainQueryError>;

    /// Fee events in the inclusive range `[from, to]`, ordered by
    /// `(block_number, log_index)`, with block timestamps resolved.
    ///
    /// Either every event in the range is returned or the call fails.
    async fn events(&self, from: u64, to: u64) -> Result<Vec<FeeEvent>, ChainQueryError>;
}
