//! Shared types for the scraping pipeline.

use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// EVM chain identifier (e.g. `1` for Ethereum, `137` for Polygon).
pub type ChainId = u64;

// ─── ChainCheckpoint ─────────────────────────────────────────────────────────

/// Durable progress record for a single chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainCheckpoint {
    pub chain_id: ChainId,
    /// Highest block whose events have been fully persisted.
    pub last_block: u64,
}

// ─── FeeEvent ────────────────────────────────────────────────────────────────

/// A decoded `FeesCollected` log.
///
/// `(chain_id, transaction_hash, log_index)` identifies an event uniquely;
/// every store enforces that key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeEvent {
    pub chain_id: ChainId,
    /// Token the fees were collected in.
    pub token: String,
    /// Integrator credited with `integrator_fee`.
    pub integrator: String,
    #[serde(with = "decimal")]
    pub integrator_fee: U256,
    #[serde(with = "decimal")]
    pub lifi_fee: U256,
    pub block_number: u64,
    pub transaction_hash: String,
    /// Position of the log within the block.
    pub log_index: u64,
    /// Timestamp of the containing block.
    pub timestamp: DateTime<Utc>,
}

impl FeeEvent {
    /// The uniqueness key used for duplicate detection.
    pub fn key(&self) -> EventKey {
        EventKey {
            chain_id: self.chain_id,
            transaction_hash: self.transaction_hash.clone(),
            log_index: self.log_index,
        }
    }
}

/// Uniqueness key of a stored [`FeeEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey {
    pub chain_id: ChainId,
    pub transaction_hash: String,
    pub log_index: u64,
}

// ─── BlockRange ──────────────────────────────────────────────────────────────

/// An inclusive block range `[from, to]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    /// Returns `true` if `block` lies within the range.
    pub fn contains(&self, block: u64) -> bool {
        self.from <= block && block <= self.to
    }

    /// Number of blocks covered.
    pub fn len(&self) -> u64 {
        if self.to < self.from {
            0
        } else {
            self.to - self.from + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}

/// Serializes `U256` amounts as decimal strings.
mod decimal {
    use alloy_primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        U256::from_str_radix(&s, 10).map_err(serde::de::Error::custom)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
