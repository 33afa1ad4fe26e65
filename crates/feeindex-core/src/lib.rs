//! feeindex-core: resumable, duplicate-tolerant scraping of fee-collection events.
//!
//! # Architecture
//!
//! ```text
//! BatchScraper::advance
//!      ├── CheckpointStore  (per-chain last processed block)
//!      ├── ChainEventSource (chain head + decoded FeeEvents for a range)
//!      └── EventStore       (bulk insert, duplicates skipped)
//! ```
//!
//! Concrete sources live in `feeindex-evm`, concrete stores in
//! `feeindex-storage`.

pub mod checkpoint;
pub mod error;
pub mod scraper;
pub mod source;
pub mod store;
pub mod types;

pub use checkpoint::{CheckpointStore, MemoryCheckpointStore};
pub use error::{
    ChainQueryError, CheckpointReadError, CheckpointWriteError, EventPersistError, ScraperError,
};
pub use scraper::{Advance, BatchScraper, ScraperConfig};
pub use source::ChainEventSource;
pub use store::{EventStore, InsertOutcome, MemoryEventStore};
pub use types::{BlockRange, ChainCheckpoint, ChainId, EventKey, FeeEvent};
