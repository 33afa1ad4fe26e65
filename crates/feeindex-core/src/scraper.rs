//! The batch scraper: one checkpointed advance per call.
//!
//! ```text
//! READ_CHECKPOINT → READ_HEAD (head - confirmation_lag)
//!   → up to date?  done, nothing touched
//!   → to = min(last + chunk_size, effective_head)
//!   → LOAD_EVENTS [last + 1, to] → PERSIST_EVENTS → ADVANCE_CHECKPOINT(to)
//! ```
//!
//! The checkpoint only moves after the whole chunk is persisted. A crash
//! between persisting and advancing repeats at most one chunk on the next
//! call, and the event store's uniqueness key absorbs the re-delivery.
//!
//! No state is kept between calls. At most one `advance` may be in flight
//! per chain; callers enforce that.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::error::{ChainQueryError, ScraperError};
use crate::source::ChainEventSource;
use crate::store::EventStore;
use crate::types::{BlockRange, ChainId};

/// Per-chain parameters of the advance operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScraperConfig {
    pub chain_id: ChainId,
    /// Maximum number of blocks processed per call.
    pub chunk_size: u64,
    /// Blocks withheld from the reported head to stay clear of shallow reorgs.
    pub confirmation_lag: u64,
    /// Starting point when the chain has no checkpoint yet. Scraping
    /// begins at `oldest_block + 1`.
    pub oldest_block: u64,
}

impl ScraperConfig {
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            chunk_size: 1000,
            confirmation_lag: 5,
            oldest_block: 0,
        }
    }

    pub fn validate(&self) -> Result<(), ScraperError> {
        if self.chunk_size == 0 {
            return Err(ScraperError::InvalidConfig(format!(
                "chain {}: chunk_size must be at least 1",
                self.chain_id
            )));
        }
        Ok(())
    }
}

/// What a single [`BatchScraper::advance`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Nothing confirmed beyond the checkpoint; no fetch, no writes.
    UpToDate { last_block: u64, effective_head: u64 },
    /// `range` was scraped and the checkpoint now equals `range.to`.
    Advanced {
        range: BlockRange,
        fetched: usize,
        inserted: u64,
        duplicates: u64,
    },
}

impl Advance {
    /// Returns `true` if the checkpoint moved.
    pub fn made_progress(&self) -> bool {
        matches!(self, Self::Advanced { .. })
    }
}

/// Computes the next range to scrape, or `None` when up to date.
///
/// `effective_head = chain_head - confirmation_lag` (saturating);
/// `to = min(last_block + chunk_size, effective_head)`.
pub fn next_range(
    last_block: u64,
    chain_head: u64,
    confirmation_lag: u64,
    chunk_size: u64,
) -> Option<BlockRange> {
    let effective_head = chain_head.saturating_sub(confirmation_lag);
    if last_block >= effective_head {
        return None;
    }
    let to = last_block.saturating_add(chunk_size).min(effective_head);
    Some(BlockRange::new(last_block + 1, to))
}

/// Orchestrates checkpoint, chain source and event store for one chain.
pub struct BatchScraper<S> {
    config: ScraperConfig,
    source: S,
    events: Arc<dyn EventStore>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl<S: ChainEventSource> BatchScraper<S> {
    pub fn new(
        config: ScraperConfig,
        source: S,
        events: Arc<dyn EventStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Result<Self, ScraperError> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            events,
            checkpoints,
        })
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    pub fn chain_id(&self) -> ChainId {
        self.config.chain_id
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Run one advance cycle.
    pub async fn advance(&self) -> Result<Advance, ScraperError> {
        let chain_id = self.config.chain_id;

        let last_block = self
            .checkpoints
            .get_checkpoint(chain_id, self.config.oldest_block)
            .await
            .map_err(|source| ScraperError::CheckpointRead { chain_id, source })?;

        let head = self
            .source
            .chain_head()
            .await
            .map_err(|source| ScraperError::ChainHead { chain_id, source })?;

        let Some(range) = next_range(
            last_block,
            head,
            self.config.confirmation_lag,
            self.config.chunk_size,
        ) else {
            let effective_head = head.saturating_sub(self.config.confirmation_lag);
            debug!(chain_id, last_block, effective_head, "no new blocks to process");
            return Ok(Advance::UpToDate { last_block, effective_head });
        };

        info!(chain_id, from = range.from, to = range.to, head, "processing blocks");

        let events = self
            .source
            .events(range.from, range.to)
            .await
            .map_err(|source| ScraperError::LoadEvents { chain_id, range, source })?;

        if let Some(stray) = events.iter().find(|e| !range.contains(e.block_number)) {
            return Err(ScraperError::LoadEvents {
                chain_id,
                range,
                source: ChainQueryError::OutOfRange {
                    block: stray.block_number,
                    range,
                },
            });
        }

        let outcome = self
            .events
            .insert_batch(&events)
            .await
            .map_err(|source| ScraperError::PersistEvents { chain_id, range, source })?;

        if outcome.inserted > 0 {
            info!(chain_id, inserted = outcome.inserted, "stored events");
        }
        if outcome.duplicates > 0 {
            warn!(chain_id, duplicates = outcome.duplicates, range = %range, "ignored duplicate events");
        }

        self.checkpoints
            .set_checkpoint(chain_id, range.to)
            .await
            .map_err(|source| ScraperError::CheckpointWrite {
                chain_id,
                range,
                source,
            })?;

        info!(chain_id, block = range.to, "successfully processed up to block");

        Ok(Advance::Advanced {
            range,
            fetched: events.len(),
            inserted: outcome.inserted,
            duplicates: outcome.duplicates,
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
