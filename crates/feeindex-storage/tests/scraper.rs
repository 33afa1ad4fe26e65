//! `BatchScraper` running against real SQLite storage.

#![cfg(feature = "sqlite")]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy_primitives::U256;
use async_trait::async_trait;
use chrono::DateTime;

use feeindex_core::{
    Advance, BatchScraper, BlockRange, ChainCheckpoint, ChainEventSource, ChainId,
    ChainQueryError, CheckpointReadError, CheckpointStore, CheckpointWriteError, EventStore,
    FeeEvent, ScraperConfig, ScraperError,
};
use feeindex_storage::{EventQuery, SqliteStorage};

fn fee(chain_id: ChainId, block: u64, log_index: u64) -> FeeEvent {
    FeeEvent {
        chain_id,
        token: "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174".into(),
        integrator: "0x1231DEB6f5749EF6cE6943a275A1D3E7486F4EaE".into(),
        integrator_fee: U256::from(block * 100),
        lifi_fee: U256::from(block),
        block_number: block,
        transaction_hash: format!("0x{block:064x}"),
        log_index,
        timestamp: DateTime::from_timestamp(1_700_000_000 + block as i64, 0).unwrap(),
    }
}

/// Two events in every listed block.
struct StaticChain {
    chain_id: ChainId,
    head: u64,
    blocks: Vec<u64>,
}

#[async_trait]
impl ChainEventSource for StaticChain {
    async fn chain_head(&self) -> Result<u64, ChainQueryError> {
        Ok(self.head)
    }

    async fn events(&self, from: u64, to: u64) -> Result<Vec<FeeEvent>, ChainQueryError> {
        Ok(self
            .blocks
            .iter()
            .filter(|b| (from..=to).contains(*b))
            .flat_map(|&b| [fee(self.chain_id, b, 0), fee(self.chain_id, b, 1)])
            .collect())
    }
}

/// Wraps SQLite checkpoints; writes fail while `fail` is set.
struct FailingCheckpoints {
    inner: SqliteStorage,
    fail: AtomicBool,
}

#[async_trait]
impl CheckpointStore for FailingCheckpoints {
    async fn load_checkpoint(
        &self,
        chain_id: ChainId,
    ) -> Result<Option<ChainCheckpoint>, CheckpointReadError> {
        self.inner.load_checkpoint(chain_id).await
    }

    async fn set_checkpoint(
        &self,
        chain_id: ChainId,
        block_number: u64,
    ) -> Result<(), CheckpointWriteError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CheckpointWriteError("database is locked".into()));
        }
        self.inner.set_checkpoint(chain_id, block_number).await
    }
}

fn config(chain_id: ChainId, last: u64, chunk: u64, lag: u64) -> ScraperConfig {
    ScraperConfig {
        chain_id,
        chunk_size: chunk,
        confirmation_lag: lag,
        oldest_block: last,
    }
}

#[tokio::test]
async fn previously_stored_event_reduces_inserted() {
    let store = SqliteStorage::in_memory().await.unwrap();
    store.insert_batch(&[fee(137, 120, 1)]).await.unwrap();

    let source = StaticChain { chain_id: 137, head: 200, blocks: vec![110, 120] };
    let scraper = BatchScraper::new(
        config(137, 100, 50, 10),
        source,
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    )
    .unwrap();

    let outcome = scraper.advance().await.unwrap();
    assert_eq!(
        outcome,
        Advance::Advanced {
            range: BlockRange::new(101, 150),
            fetched: 4,
            inserted: 3,
            duplicates: 1,
        }
    );
    assert_eq!(store.get_checkpoint(137, 0).await.unwrap(), 150);
    assert_eq!(store.event_count(137).await.unwrap(), 4);
}

#[tokio::test]
async fn retry_after_checkpoint_failure_stores_no_duplicates() {
    let store = SqliteStorage::in_memory().await.unwrap();
    let checkpoints = Arc::new(FailingCheckpoints {
        inner: store.clone(),
        fail: AtomicBool::new(true),
    });

    let source = StaticChain { chain_id: 137, head: 200, blocks: vec![101, 150] };
    let scraper = BatchScraper::new(
        config(137, 100, 50, 10),
        source,
        Arc::new(store.clone()),
        checkpoints.clone(),
    )
    .unwrap();

    let err = scraper.advance().await.unwrap_err();
    assert!(err.is_unrecorded_progress());
    assert!(matches!(
        err,
        ScraperError::CheckpointWrite { range, .. } if range == BlockRange::new(101, 150)
    ));
    assert_eq!(store.event_count(137).await.unwrap(), 4);
    assert!(store.load_checkpoint(137).await.unwrap().is_none());

    checkpoints.fail.store(false, Ordering::SeqCst);
    let retry = scraper.advance().await.unwrap();
    assert_eq!(
        retry,
        Advance::Advanced {
            range: BlockRange::new(101, 150),
            fetched: 4,
            inserted: 0,
            duplicates: 4,
        }
    );
    assert_eq!(store.event_count(137).await.unwrap(), 4);
    assert_eq!(store.get_checkpoint(137, 0).await.unwrap(), 150);
}

#[tokio::test]
async fn chains_share_one_store() {
    let store = SqliteStorage::in_memory().await.unwrap();

    let polygon = BatchScraper::new(
        config(137, 0, 1000, 0),
        StaticChain { chain_id: 137, head: 30, blocks: vec![10, 20] },
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    )
    .unwrap();
    let optimism = BatchScraper::new(
        config(10, 0, 1000, 0),
        StaticChain { chain_id: 10, head: 15, blocks: vec![10] },
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    )
    .unwrap();

    let (a, b) = tokio::join!(polygon.advance(), optimism.advance());
    assert!(a.unwrap().made_progress());
    assert!(b.unwrap().made_progress());

    assert_eq!(store.get_checkpoint(137, 0).await.unwrap(), 30);
    assert_eq!(store.get_checkpoint(10, 0).await.unwrap(), 15);
    assert_eq!(store.events(&EventQuery::chain(137)).await.unwrap().len(), 4);
    assert_eq!(store.events(&EventQuery::chain(10)).await.unwrap().len(), 2);
}

#[tokio::test]
async fn resumes_from_file_checkpoint_after_reopen() {
    let path = std::env::temp_dir().join(format!("feeindex-resume-{}.db", std::process::id()));
    let path_str = path.to_string_lossy().to_string();
    remove_db_files(&path_str);

    {
        let store = SqliteStorage::open(&path_str).await.unwrap();
        let scraper = BatchScraper::new(
            config(1, 100, 50, 0),
            StaticChain { chain_id: 1, head: 300, blocks: vec![120, 170] },
            Arc::new(store.clone()),
            Arc::new(store.clone()),
        )
        .unwrap();
        scraper.advance().await.unwrap();
        assert_eq!(store.get_checkpoint(1, 100).await.unwrap(), 150);
    }

    let store = SqliteStorage::open(&path_str).await.unwrap();
    let scraper = BatchScraper::new(
        config(1, 100, 50, 0),
        StaticChain { chain_id: 1, head: 300, blocks: vec![120, 170] },
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    )
    .unwrap();
    let outcome = scraper.advance().await.unwrap();
    assert!(matches!(
        outcome,
        Advance::Advanced { range, inserted: 2, duplicates: 0, .. } if range == BlockRange::new(151, 200)
    ));
    assert_eq!(store.event_count(1).await.unwrap(), 4);

    drop(scraper);
    drop(store);
    remove_db_files(&path_str);
}

fn remove_db_files(path: &str) {
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{path}{suffix}"));
    }
}
