//! feeindex-storage: storage backends for FeeIndex.
//!
//! Every backend implements both [`CheckpointStore`] and [`EventStore`]:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - `sqlite`: SQLite via `sqlx` (embedded, single-file persistence)
//! - `postgres`: PostgreSQL via `sqlx` (pooled, production)
//!
//! [`CheckpointStore`]: feeindex_core::CheckpointStore
//! [`EventStore`]: feeindex_core::EventStore

use thiserror::Error;

use feeindex_core::types::{ChainId, FeeEvent};

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStorage;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresOptions, PostgresStorage};

/// Connection, schema and query failures outside the core store traits.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("connect: {0}")]
    Connect(String),

    #[error("schema setup: {0}")]
    Schema(String),

    #[error("query: {0}")]
    Query(String),

    #[error("corrupt row: {0}")]
    Decode(String),
}

/// Filter for reading back stored events, ordered by `(block, log_index)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    pub chain_id: ChainId,
    /// Case-insensitive integrator address match.
    pub integrator: Option<String>,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub limit: Option<u64>,
}

impl EventQuery {
    pub fn chain(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            ..Default::default()
        }
    }

    pub fn integrator(mut self, address: impl Into<String>) -> Self {
        self.integrator = Some(address.into());
        self
    }

    pub fn blocks(mut self, from: Option<u64>, to: Option<u64>) -> Self {
        self.from_block = from;
        self.to_block = to;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns `true` if `event` passes every filter except `limit`.
    pub fn matches(&self, event: &FeeEvent) -> bool {
        event.chain_id == self.chain_id
            && self
                .integrator
                .as_deref()
                .map_or(true, |i| i.eq_ignore_ascii_case(&event.integrator))
            && self.from_block.map_or(true, |from| event.block_number >= from)
            && self.to_block.map_or(true, |to| event.block_number <= to)
    }

    /// SQL-friendly bounds: `(from, to, limit)` with open ends made explicit.
    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    pub(crate) fn sql_bounds(&self) -> (i64, i64, Option<i64>) {
        let from = self.from_block.map_or(0, to_i64);
        let to = self.to_block.map_or(i64::MAX, to_i64);
        (from, to, self.limit.map(to_i64))
    }
}

#[cfg(any(feature = "sqlite", feature = "postgres"))]
fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

/// Checked `u64` to SQL `BIGINT` conversion; `column` names the value in the error.
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub(crate) fn to_db_int(value: u64, column: &str) -> Result<i64, String> {
    i64::try_from(value).map_err(|_| format!("{column} {value} exceeds the BIGINT range"))
}

#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub(crate) fn from_db_int(value: i64, column: &str) -> Result<u64, String> {
    u64::try_from(value).map_err(|_| format!("{column} {value} is negative"))
}

#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub(crate) fn parse_amount(s: &str) -> Result<alloy_primitives::U256, StorageError> {
    alloy_primitives::U256::from_str_radix(s, 10)
        .map_err(|e| StorageError::Decode(format!("amount {s:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;
    use chrono::DateTime;

    fn ev(block: u64, integrator: &str) -> FeeEvent {
        FeeEvent {
            chain_id: 1,
            token: "0xToken".into(),
            integrator: integrator.into(),
            integrator_fee: U256::from(1u64),
            lifi_fee: U256::ZERO,
            block_number: block,
            transaction_hash: format!("0x{block:064x}"),
            log_index: 0,
            timestamp: DateTime::from_timestamp(0, 0).unwrap(),
        }
    }

    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    #[test]
    fn db_int_conversion_is_checked() {
        assert_eq!(to_db_int(150, "block_number"), Ok(150));
        assert_eq!(to_db_int(i64::MAX as u64, "block_number"), Ok(i64::MAX));
        let err = to_db_int(u64::MAX, "block_number").unwrap_err();
        assert!(err.contains("block_number"));
        assert_eq!(from_db_int(7, "log_index"), Ok(7));
        assert!(from_db_int(-1, "log_index").is_err());
    }

    #[test]
    fn query_filters() {
        let q = EventQuery::chain(1).integrator("0xabc").blocks(Some(10), Some(20));
        assert!(q.matches(&ev(10, "0xABC")));
        assert!(q.matches(&ev(20, "0xAbC")));
        assert!(!q.matches(&ev(21, "0xabc")));
        assert!(!q.matches(&ev(15, "0xdef")));
        assert!(!EventQuery::chain(2).matches(&ev(15, "0xabc")));
        assert!(EventQuery::chain(1).matches(&ev(15, "0xdef")));
    }
}
