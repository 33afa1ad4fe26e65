//! EVM implementation of [`ChainEventSource`] for the fee-collection contract.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, warn};

use feeindex_core::error::ChainQueryError;
use feeindex_core::source::ChainEventSource;
use feeindex_core::types::{BlockRange, ChainId, FeeEvent};

use crate::decoder::{decode_fees_collected, fees_collected_topic};
use crate::fetcher::{EvmRpcClient, LogFilter, RawLog};

const DEFAULT_TIMESTAMP_CONCURRENCY: usize = 8;

/// Where and what to scrape on one EVM chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmSourceConfig {
    pub chain_id: ChainId,
    pub provider_uri: String,
    pub contract_address: String,
    /// Upper bound on in-flight `eth_getBlockByNumber` calls per chunk.
    pub timestamp_concurrency: usize,
}

impl EvmSourceConfig {
    pub fn new(
        chain_id: ChainId,
        provider_uri: impl Into<String>,
        contract_address: impl Into<String>,
    ) -> Self {
        Self {
            chain_id,
            provider_uri: provider_uri.into(),
            contract_address: contract_address.into(),
            timestamp_concurrency: DEFAULT_TIMESTAMP_CONCURRENCY,
        }
    }
}

/// Loads `FeesCollected` events of a single contract from an EVM node.
pub struct EvmEventSource<C> {
    chain_id: ChainId,
    client: C,
    filter: LogFilter,
    timestamp_concurrency: usize,
}

impl<C: EvmRpcClient> EvmEventSource<C> {
    pub fn new(config: &EvmSourceConfig, client: C) -> Self {
        Self {
            chain_id: config.chain_id,
            client,
            filter: LogFilter {
                address: config.contract_address.clone(),
                topic0: fees_collected_topic().to_string(),
            },
            timestamp_concurrency: config.timestamp_concurrency.max(1),
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Drop reorged logs and sort the rest by `(block, log_index)`.
    fn prepare_logs(
        &self,
        logs: Vec<RawLog>,
        range: BlockRange,
    ) -> Result<Vec<(u64, u64, RawLog)>, ChainQueryError> {
        let mut kept = Vec::with_capacity(logs.len());
        for log in logs {
            if log.is_removed() {
                warn!(chain_id = self.chain_id, tx = %log.tx_hash, "skipping removed log");
                continue;
            }
            let block = log.block_number()?;
            if !range.contains(block) {
                return Err(ChainQueryError::OutOfRange { block, range });
            }
            kept.push((block, log.log_index()?, log));
        }
        kept.sort_by_key(|(block, index, _)| (*block, *index));
        Ok(kept)
    }

    /// Resolve each distinct block's timestamp once.
    async fn block_timestamps(
        &self,
        blocks: BTreeSet<u64>,
    ) -> Result<BTreeMap<u64, DateTime<Utc>>, ChainQueryError> {
        stream::iter(blocks)
            .map(|number| async move {
                let secs = self
                    .client
                    .block_timestamp(number)
                    .await?
                    .ok_or(ChainQueryError::MissingBlock(number))?;
                let ts = i64::try_from(secs)
                    .ok()
                    .and_then(|s| DateTime::from_timestamp(s, 0))
                    .ok_or_else(|| {
                        ChainQueryError::Decode(format!("block {number}: timestamp {secs} out of range"))
                    })?;
                Ok::<_, ChainQueryError>((number, ts))
            })
            .buffer_unordered(self.timestamp_concurrency)
            .try_collect()
            .await
    }
}

#[async_trait]
impl<C: EvmRpcClient> ChainEventSource for EvmEventSource<C> {
    async fn chain_head(&self) -> Result<u64, ChainQueryError> {
        self.client.block_number().await
    }

    async fn events(&self, from: u64, to: u64) -> Result<Vec<FeeEvent>, ChainQueryError> {
        if to < from {
            return Err(ChainQueryError::InvalidRange { from, to });
        }
        let range = BlockRange::new(from, to);

        let logs = self.client.logs(from, to, &self.filter).await?;
        let logs = self.prepare_logs(logs, range)?;
        if logs.is_empty() {
            debug!(chain_id = self.chain_id, %range, "no fee events in range");
            return Ok(Vec::new());
        }

        let blocks: BTreeSet<u64> = logs.iter().map(|(block, _, _)| *block).collect();
        let timestamps = self.block_timestamps(blocks).await?;

        let events = logs
            .iter()
            .map(|(block, _, log)| {
                let ts = timestamps
                    .get(block)
                    .copied()
                    .ok_or(ChainQueryError::MissingBlock(*block))?;
                decode_fees_collected(log, self.chain_id, ts)
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            chain_id = self.chain_id,
            %range,
            events = events.len(),
            blocks = timestamps.len(),
            "loaded fee events"
        );
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::tests::fee_log;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockRpc {
        head: u64,
        logs: Vec<RawLog>,
        missing_blocks: Vec<u64>,
        timestamp_calls: Mutex<Vec<u64>>,
        log_calls: Mutex<Vec<(u64, u64, LogFilter)>>,
    }

    #[async_trait]
    impl EvmRpcClient for MockRpc {
        async fn block_number(&self) -> Result<u64, ChainQueryError> {
            Ok(self.head)
        }

        async fn block_timestamp(&self, number: u64) -> Result<Option<u64>, ChainQueryError> {
            self.timestamp_calls.lock().unwrap().push(number);
            if self.missing_blocks.contains(&number) {
                return Ok(None);
            }
            Ok(Some(1_700_000_000 + number))
        }

        async fn logs(&self, from: u64, to: u64, filter: &LogFilter) -> Result<Vec<RawLog>, ChainQueryError> {
            self.log_calls.lock().unwrap().push((from, to, filter.clone()));
            Ok(self.logs.clone())
        }
    }

    fn source(rpc: MockRpc) -> EvmEventSource<MockRpc> {
        let cfg = EvmSourceConfig::new(137, "http://localhost:8545", "0xbd6c7b0d2f68c2b7805d88388319cfb6ecb50ea9");
        EvmEventSource::new(&cfg, rpc)
    }

    #[tokio::test]
    async fn chain_head_passes_through() {
        let src = source(MockRpc {
            head: 47_961_500,
            ..Default::default()
        });
        assert_eq!(src.chain_head().await.unwrap(), 47_961_500);
    }

    #[tokio::test]
    async fn events_sorted_with_timestamps() {
        let src = source(MockRpc {
            logs: vec![
                fee_log(105, 1, 3, 30, 3),
                fee_log(101, 7, 1, 10, 1),
                fee_log(105, 0, 2, 20, 2),
            ],
            ..Default::default()
        });

        let events = src.events(101, 110).await.unwrap();
        let keys: Vec<(u64, u64)> = events.iter().map(|e| (e.block_number, e.log_index)).collect();
        assert_eq!(keys, vec![(101, 7), (105, 0), (105, 1)]);
        assert_eq!(events[0].timestamp.timestamp(), 1_700_000_101);
        assert_eq!(events[2].timestamp.timestamp(), 1_700_000_105);
        assert!(events.iter().all(|e| e.chain_id == 137));

        // one lookup per distinct block
        let mut calls = src.client().timestamp_calls.lock().unwrap().clone();
        calls.sort_unstable();
        assert_eq!(calls, vec![101, 105]);
    }

    #[tokio::test]
    async fn filter_targets_contract_and_topic() {
        let src = source(MockRpc::default());
        assert!(src.events(101, 150).await.unwrap().is_empty());

        let calls = src.client().log_calls.lock().unwrap();
        let (from, to, filter) = &calls[0];
        assert_eq!((*from, *to), (101, 150));
        assert_eq!(filter.topic0, fees_collected_topic().to_string());
        assert_eq!(filter.address, "0xbd6c7b0d2f68c2b7805d88388319cfb6ecb50ea9");
    }

    #[tokio::test]
    async fn empty_range_skips_timestamp_lookups() {
        let src = source(MockRpc::default());
        assert!(src.events(1, 1).await.unwrap().is_empty());
        assert!(src.client().timestamp_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn inverted_range_rejected() {
        let src = source(MockRpc::default());
        assert!(matches!(
            src.events(10, 9).await,
            Err(ChainQueryError::InvalidRange { from: 10, to: 9 })
        ));
    }

    #[tokio::test]
    async fn removed_logs_skipped() {
        let mut reorged = fee_log(102, 0, 9, 1, 1);
        reorged.removed = Some(true);
        let src = source(MockRpc {
            logs: vec![reorged, fee_log(103, 0, 1, 1, 1)],
            ..Default::default()
        });

        let events = src.events(101, 110).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].block_number, 103);
    }

    #[tokio::test]
    async fn log_outside_range_fails_whole_call() {
        let src = source(MockRpc {
            logs: vec![fee_log(101, 0, 1, 1, 1), fee_log(200, 0, 2, 1, 1)],
            ..Default::default()
        });
        assert!(matches!(
            src.events(101, 110).await,
            Err(ChainQueryError::OutOfRange { block: 200, .. })
        ));
    }

    #[tokio::test]
    async fn missing_block_fails_whole_call() {
        let src = source(MockRpc {
            logs: vec![fee_log(101, 0, 1, 1, 1), fee_log(104, 0, 2, 1, 1)],
            missing_blocks: vec![104],
            ..Default::default()
        });
        assert!(matches!(
            src.events(101, 110).await,
            Err(ChainQueryError::MissingBlock(104))
        ));
    }
}
