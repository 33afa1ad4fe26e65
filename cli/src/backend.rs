//! Storage backend selected by database URL scheme.

use std::sync::Arc;

use anyhow::{Context, Result};

use feeindex_core::checkpoint::CheckpointStore;
use feeindex_core::store::EventStore;
use feeindex_core::types::{ChainCheckpoint, ChainId, FeeEvent};
use feeindex_storage::{EventQuery, PostgresStorage, SqliteStorage};

/// One shared store for every chain.
#[derive(Clone)]
pub enum Backend {
    Sqlite(SqliteStorage),
    Postgres(PostgresStorage),
}

impl Backend {
    /// `postgres://…` / `postgresql://…` selects Postgres; anything else is
    /// treated as a SQLite URL or file path.
    pub async fn connect(database_url: &str) -> Result<Self> {
        if is_postgres_url(database_url) {
            let store = PostgresStorage::connect(database_url)
                .await
                .context("connecting to Postgres")?;
            Ok(Self::Postgres(store))
        } else {
            let store = SqliteStorage::open(database_url)
                .await
                .with_context(|| format!("opening SQLite database {database_url}"))?;
            Ok(Self::Sqlite(store))
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite",
            Self::Postgres(_) => "postgres",
        }
    }

    pub fn event_store(&self) -> Arc<dyn EventStore> {
        match self {
            Self::Sqlite(s) => Arc::new(s.clone()),
            Self::Postgres(s) => Arc::new(s.clone()),
        }
    }

    pub fn checkpoint_store(&self) -> Arc<dyn CheckpointStore> {
        match self {
            Self::Sqlite(s) => Arc::new(s.clone()),
            Self::Postgres(s) => Arc::new(s.clone()),
        }
    }

    pub async fn checkpoint(&self, chain_id: ChainId) -> Result<Option<ChainCheckpoint>> {
        Ok(self.checkpoint_store().load_checkpoint(chain_id).await?)
    }

    pub async fn event_count(&self, chain_id: ChainId) -> Result<u64> {
        Ok(match self {
            Self::Sqlite(s) => s.event_count(chain_id).await?,
            Self::Postgres(s) => s.event_count(chain_id).await?,
        })
    }

    pub async fn events(&self, query: &EventQuery) -> Result<Vec<FeeEvent>> {
        Ok(match self {
            Self::Sqlite(s) => s.events(query).await?,
            Self::Postgres(s) => s.events(query).await?,
        })
    }
}

fn is_postgres_url(url: &str) -> bool {
    url.starts_with("postgres://") || url.starts_with("postgresql://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_detection() {
        assert!(is_postgres_url("postgres://localhost/feeindex"));
        assert!(is_postgres_url("postgresql://u:p@db:5432/feeindex"));
        assert!(!is_postgres_url("sqlite:./feeindex.db"));
        assert!(!is_postgres_url("./feeindex.db"));
    }

    #[tokio::test]
    async fn sqlite_backend_roundtrip() {
        let backend = Backend::connect("sqlite::memory:").await.unwrap();
        assert_eq!(backend.name(), "sqlite");
        assert!(backend.checkpoint(1).await.unwrap().is_none());

        backend.checkpoint_store().set_checkpoint(1, 77).await.unwrap();
        assert_eq!(backend.checkpoint(1).await.unwrap().unwrap().last_block, 77);
        assert_eq!(backend.event_count(1).await.unwrap(), 0);
    }
}
