//! SQLite storage backend for FeeIndex.
//!
//! Persists checkpoints and fee events to a single SQLite file.
//! File-backed databases are created on first open and run in WAL mode.
//!
//! # Usage
//! ```rust,no_run
//! use feeindex_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./feeindex.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use feeindex_core::checkpoint::CheckpointStore;
use feeindex_core::error::{CheckpointReadError, CheckpointWriteError, EventPersistError};
use feeindex_core::store::{EventStore, InsertOutcome};
use feeindex_core::types::{ChainCheckpoint, ChainId, FeeEvent};

use crate::{from_db_int, parse_amount, to_db_int, EventQuery, StorageError};

/// SQLite-backed storage for checkpoints and fee events.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./feeindex.db"`) or a full
    /// SQLite URL (`"sqlite:./feeindex.db"`). A missing file is created.
    /// `":memory:"` and `"sqlite::memory:"` are routed to
    /// [`SqliteStorage::in_memory`].
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        if matches!(path, ":memory:" | "sqlite::memory:") {
            return Self::in_memory().await;
        }

        let options = if path.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(path)
                .map_err(|e| StorageError::Connect(format!("{path}: {e}")))?
        } else {
            SqliteConnectOptions::new().filename(path)
        }
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| StorageError::Connect(format!("{path}: {e}")))?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Limited to one connection: every connection to `sqlite::memory:`
    /// gets its own empty database. All data is lost when the pool is dropped.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StorageError::Connect(e.to_string()))?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and indexes if they don't already exist.
    async fn init_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS scraper_checkpoints (
                chain_id   INTEGER PRIMARY KEY,
                last_block INTEGER NOT NULL,
                updated_at TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Schema(e.to_string()))?;

        // Amounts are uint256, kept as decimal text.
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS fee_events (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                chain_id         INTEGER NOT NULL,
                token            TEXT    NOT NULL,
                integrator       TEXT    NOT NULL,
                integrator_fee   TEXT    NOT NULL,
                lifi_fee         TEXT    NOT NULL,
                block_number     INTEGER NOT NULL,
                transaction_hash TEXT    NOT NULL,
                log_index        INTEGER NOT NULL,
                timestamp        TEXT    NOT NULL,
                UNIQUE (chain_id, transaction_hash, log_index)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Schema(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_fee_events_block ON fee_events (chain_id, block_number, log_index);",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Schema(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_fee_events_integrator ON fee_events (chain_id, integrator);",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Schema(e.to_string()))?;

        Ok(())
    }

    // ─── Event queries ──────────────────────────────────────────────────────────

    /// Stored events matching `query`, ordered by block and log index.
    pub async fn events(&self, query: &EventQuery) -> Result<Vec<FeeEvent>, StorageError> {
        let (from, to, limit) = query.sql_bounds();
        let chain_id = to_db_int(query.chain_id, "chain_id").map_err(StorageError::Query)?;
        let rows = sqlx::query(
            "SELECT chain_id, token, integrator, integrator_fee, lifi_fee,
                    block_number, transaction_hash, log_index, timestamp
             FROM fee_events
             WHERE chain_id = ?
               AND (? IS NULL OR integrator = ? COLLATE NOCASE)
               AND block_number BETWEEN ? AND ?
             ORDER BY block_number, log_index
             LIMIT ?",
        )
        .bind(chain_id)
        .bind(query.integrator.as_deref())
        .bind(query.integrator.as_deref())
        .bind(from)
        .bind(to)
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        rows.iter().map(row_to_event).collect()
    }

    /// Number of stored events for a chain.
    pub async fn event_count(&self, chain_id: ChainId) -> Result<u64, StorageError> {
        let chain_id = to_db_int(chain_id, "chain_id").map_err(StorageError::Query)?;
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM fee_events WHERE chain_id = ?")
            .bind(chain_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        from_db_int(row.get("cnt"), "count").map_err(StorageError::Decode)
    }
}

fn row_to_event(row: &SqliteRow) -> Result<FeeEvent, StorageError> {
    let integrator_fee: String = row.get("integrator_fee");
    let lifi_fee: String = row.get("lifi_fee");
    let timestamp: DateTime<Utc> = row
        .try_get("timestamp")
        .map_err(|e| StorageError::Decode(e.to_string()))?;

    let int = |column: &str| from_db_int(row.get(column), column).map_err(StorageError::Decode);

    Ok(FeeEvent {
        chain_id: int("chain_id")?,
        token: row.get("token"),
        integrator: row.get("integrator"),
        integrator_fee: parse_amount(&integrator_fee)?,
        lifi_fee: parse_amount(&lifi_fee)?,
        block_number: int("block_number")?,
        transaction_hash: row.get("transaction_hash"),
        log_index: int("log_index")?,
        timestamp,
    })
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn load_checkpoint(
        &self,
        chain_id: ChainId,
    ) -> Result<Option<ChainCheckpoint>, CheckpointReadError> {
        let key = to_db_int(chain_id, "chain_id").map_err(CheckpointReadError)?;
        let row = sqlx::query("SELECT last_block FROM scraper_checkpoints WHERE chain_id = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CheckpointReadError(e.to_string()))?;

        row.map(|r| {
            from_db_int(r.get("last_block"), "last_block")
                .map(|last_block| ChainCheckpoint { chain_id, last_block })
                .map_err(CheckpointReadError)
        })
        .transpose()
    }

    async fn set_checkpoint(
        &self,
        chain_id: ChainId,
        block_number: u64,
    ) -> Result<(), CheckpointWriteError> {
        let key = to_db_int(chain_id, "chain_id").map_err(CheckpointWriteError)?;
        let block = to_db_int(block_number, "last_block").map_err(CheckpointWriteError)?;

        // Drain every returned row so the statement completes and autocommits.
        let rows = sqlx::query(
            "INSERT INTO scraper_checkpoints (chain_id, last_block, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT (chain_id) DO UPDATE
                SET last_block = excluded.last_block,
                    updated_at = excluded.updated_at
             RETURNING last_block",
        )
        .bind(key)
        .bind(block)
        .bind(Utc::now())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CheckpointWriteError(e.to_string()))?;

        match rows.first().map(|r| r.get::<i64, _>("last_block")) {
            Some(stored) if stored == block => {
                debug!(chain_id, block = block_number, "checkpoint saved");
                Ok(())
            }
            Some(stored) => Err(CheckpointWriteError(format!(
                "chain {chain_id}: upsert returned {stored}, expected {block_number}"
            ))),
            None => Err(CheckpointWriteError(format!("chain {chain_id}: upsert returned no row"))),
        }
    }
}

// ─── EventStore impl ─────────────────────────────────────────────────────────

#[async_trait]
impl EventStore for SqliteStorage {
    async fn insert_batch(&self, events: &[FeeEvent]) -> Result<InsertOutcome, EventPersistError> {
        if events.is_empty() {
            return Ok(InsertOutcome::default());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EventPersistError(e.to_string()))?;

        let mut outcome = InsertOutcome::default();
        for event in events {
            let chain_id = to_db_int(event.chain_id, "chain_id").map_err(EventPersistError)?;
            let block = to_db_int(event.block_number, "block_number").map_err(EventPersistError)?;
            let log_index = to_db_int(event.log_index, "log_index").map_err(EventPersistError)?;

            let result = sqlx::query(
                "INSERT INTO fee_events
                 (chain_id, token, integrator, integrator_fee, lifi_fee,
                  block_number, transaction_hash, log_index, timestamp)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(chain_id)
            .bind(&event.token)
            .bind(&event.integrator)
            .bind(event.integrator_fee.to_string())
            .bind(event.lifi_fee.to_string())
            .bind(block)
            .bind(&event.transaction_hash)
            .bind(log_index)
            .bind(event.timestamp)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(_) => outcome.inserted += 1,
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                    debug!(
                        chain_id = event.chain_id,
                        tx = %event.transaction_hash,
                        log_index = event.log_index,
                        "duplicate event skipped"
                    );
                    outcome.duplicates += 1;
                }
                Err(e) => return Err(EventPersistError(e.to_string())),
            }
        }

        tx.commit()
            .await
            .map_err(|e| EventPersistError(e.to_string()))?;

        Ok(outcome)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
