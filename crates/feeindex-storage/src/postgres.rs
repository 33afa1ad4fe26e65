//! PostgreSQL storage backend for FeeIndex.
//!
//! Persists checkpoints and fee events to a PostgreSQL database.
//! Uses `sqlx` with connection pooling; several chain scrapers can share one
//! `PostgresStorage`.
//!
//! # Feature Flag
//! Requires the `postgres` feature:
//! ```toml
//! feeindex-storage = { version = "0.1", features = ["postgres"] }
//! ```
//!
//! # Schema
//! Created automatically on first connect:
//! - `feeindex_checkpoints`: one row per chain (chain_id → last processed block)
//! - `feeindex_fee_events`: decoded `FeesCollected` events, unique on
//!   `(chain_id, transaction_hash, log_index)`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use feeindex_core::checkpoint::CheckpointStore;
use feeindex_core::error::{CheckpointReadError, CheckpointWriteError, EventPersistError};
use feeindex_core::store::{EventStore, InsertOutcome};
use feeindex_core::types::{ChainCheckpoint, ChainId, FeeEvent};

use crate::{from_db_int, parse_amount, to_db_int, EventQuery, StorageError};

// ─── Connection options ────────────────────────────────────────────────────────

/// Connection options for the Postgres storage backend.
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: u32,
    /// Minimum number of idle connections to keep open (default: 1)
    pub min_connections: u32,
    /// Pool acquire timeout in seconds (default: 30)
    pub connect_timeout_secs: u64,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
        }
    }
}

// ─── PostgresStorage ─────────────────────────────────────────────────────────

/// PostgreSQL-backed storage for checkpoints and fee events.
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Connect with default pool options and initialize the schema.
    ///
    /// The URL format follows libpq convention:
    /// `postgresql://[user[:password]@][host][:port][/dbname]`
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        Self::connect_with_options(database_url, PostgresOptions::default()).await
    }

    /// Connect with custom pool options.
    pub async fn connect_with_options(
        database_url: &str,
        opts: PostgresOptions,
    ) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(opts.max_connections)
            .min_connections(opts.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(opts.connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Connect(format!("postgres: {e}")))?;

        let storage = Self { pool };
        storage.init_schema().await?;
        info!(max_connections = opts.max_connections, "PostgresStorage connected and schema initialized");
        Ok(storage)
    }

    /// Create tables and indexes if they don't already exist.
    async fn init_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS feeindex_checkpoints (
                chain_id   BIGINT      PRIMARY KEY,
                last_block BIGINT      NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Schema(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS feeindex_fee_events (
                id               BIGSERIAL     PRIMARY KEY,
                chain_id         BIGINT        NOT NULL,
                token            TEXT          NOT NULL,
                integrator       TEXT          NOT NULL,
                integrator_fee   NUMERIC(78,0) NOT NULL,
                lifi_fee         NUMERIC(78,0) NOT NULL,
                block_number     BIGINT        NOT NULL,
                transaction_hash TEXT          NOT NULL,
                log_index        BIGINT        NOT NULL,
                timestamp        TIMESTAMPTZ   NOT NULL,
                UNIQUE (chain_id, transaction_hash, log_index)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Schema(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_feeindex_fee_events_block
             ON feeindex_fee_events(chain_id, block_number, log_index)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Schema(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_feeindex_fee_events_integrator
             ON feeindex_fee_events(chain_id, LOWER(integrator))",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Schema(e.to_string()))?;

        debug!("PostgresStorage schema initialized");
        Ok(())
    }

    /// Stored events matching `query`, ordered by block and log index.
    pub async fn events(&self, query: &EventQuery) -> Result<Vec<FeeEvent>, StorageError> {
        let (from, to, limit) = query.sql_bounds();
        let chain_id = to_db_int(query.chain_id, "chain_id").map_err(StorageError::Query)?;
        let rows = sqlx::query(
            "SELECT chain_id, token, integrator,
                    integrator_fee::TEXT AS integrator_fee,
                    lifi_fee::TEXT AS lifi_fee,
                    block_number, transaction_hash, log_index, timestamp
             FROM feeindex_fee_events
             WHERE chain_id = $1
               AND ($2::TEXT IS NULL OR LOWER(integrator) = LOWER($2))
               AND block_number >= $3
               AND block_number <= $4
             ORDER BY block_number ASC, log_index ASC
             LIMIT $5",
        )
        .bind(chain_id)
        .bind(query.integrator.as_deref())
        .bind(from)
        .bind(to)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        rows.iter().map(row_to_event).collect()
    }

    /// Number of stored events for a chain.
    pub async fn event_count(&self, chain_id: ChainId) -> Result<u64, StorageError> {
        let chain_id = to_db_int(chain_id, "chain_id").map_err(StorageError::Query)?;
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM feeindex_fee_events WHERE chain_id = $1")
            .bind(chain_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        from_db_int(row.get("cnt"), "count").map_err(StorageError::Decode)
    }

    /// Get the underlying connection pool (for custom queries).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn row_to_event(row: &PgRow) -> Result<FeeEvent, StorageError> {
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

// ─── CheckpointStore impl ─────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for PostgresStorage {
    async fn load_checkpoint(
        &self,
        chain_id: ChainId,
    ) -> Result<Option<ChainCheckpoint>, CheckpointReadError> {
        let key = to_db_int(chain_id, "chain_id").map_err(CheckpointReadError)?;
        let row = sqlx::query("SELECT last_block FROM feeindex_checkpoints WHERE chain_id = $1")
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

        let rows = sqlx::query(
            "INSERT INTO feeindex_checkpoints (chain_id, last_block, updated_at)
             VALUES ($1, $2, NOW())
             ON CONFLICT (chain_id)
             DO UPDATE SET
                last_block = EXCLUDED.last_block,
                updated_at = EXCLUDED.updated_at
             RETURNING last_block",
        )
        .bind(key)
        .bind(block)
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

// ─── EventStore impl ──────────────────────────────────────────────────────────

#[async_trait]
impl EventStore for PostgresStorage {
    /// Inserts the batch in one transaction. `ON CONFLICT DO NOTHING`
    /// reports duplicates as zero affected rows.
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
                "INSERT INTO feeindex_fee_events
                    (chain_id, token, integrator, integrator_fee, lifi_fee,
                     block_number, transaction_hash, log_index, timestamp)
                 VALUES ($1, $2, $3, $4::NUMERIC, $5::NUMERIC, $6, $7, $8, $9)
                 ON CONFLICT (chain_id, transaction_hash, log_index) DO NOTHING",
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
            .await
            .map_err(|e| EventPersistError(e.to_string()))?;

            if result.rows_affected() == 0 {
                outcome.duplicates += 1;
            } else {
                outcome.inserted += 1;
            }
        }

        tx.commit()
            .await
            .map_err(|e| EventPersistError(format!("commit batch: {e}")))?;

        debug!(inserted = outcome.inserted, duplicates = outcome.duplicates, "fee events stored");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    // Integration tests require a running PostgreSQL instance.
    // Set DATABASE_URL environment variable to enable.
    // Example: DATABASE_URL=postgresql://localhost/feeindex_test cargo test --features postgres

    use super::*;
    use alloy_primitives::U256;

    async fn store_for(chain_id: ChainId) -> PostgresStorage {
        let url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set for integration tests");
        let store = PostgresStorage::connect(&url).await.unwrap();
        for table in ["feeindex_fee_events", "feeindex_checkpoints"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE chain_id = $1"))
                .bind(chain_id as i64)
                .execute(store.pool())
                .await
                .unwrap();
        }
        store
    }

    fn sample_event(chain_id: ChainId, block: u64, log_index: u64) -> FeeEvent {
        FeeEvent {
            chain_id,
            token: "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174".into(),
            integrator: "0x1231DEB6f5749EF6cE6943a275A1D3E7486F4EaE".into(),
            integrator_fee: U256::MAX,
            lifi_fee: U256::from(block),
            block_number: block,
            transaction_hash: format!("0x{block:064x}"),
            log_index,
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL to enable)"]
    async fn test_postgres_checkpoint_upsert() {
        let store = store_for(990_001).await;

        assert!(store.load_checkpoint(990_001).await.unwrap().is_none());
        store.set_checkpoint(990_001, 100).await.unwrap();
        store.set_checkpoint(990_001, 150).await.unwrap();

        let loaded = store.load_checkpoint(990_001).await.unwrap().unwrap();
        assert_eq!(loaded.last_block, 150);

        assert!(store.set_checkpoint(990_001, u64::MAX).await.is_err());
        assert_eq!(store.get_checkpoint(990_001, 0).await.unwrap(), 150);
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL to enable)"]
    async fn test_postgres_duplicates_and_roundtrip() {
        let store = store_for(990_002).await;

        let batch = [sample_event(990_002, 100, 0), sample_event(990_002, 100, 1)];
        let first = store.insert_batch(&batch).await.unwrap();
        assert_eq!(first, InsertOutcome { inserted: 2, duplicates: 0 });

        let second = store.insert_batch(&batch).await.unwrap();
        assert_eq!(second, InsertOutcome { inserted: 0, duplicates: 2 });

        let loaded = store.events(&EventQuery::chain(990_002)).await.unwrap();
        assert_eq!(loaded, batch.to_vec());
        assert_eq!(store.event_count(990_002).await.unwrap(), 2);
    }
}
