//! Fluent builder for EVM-backed scrapers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use feeindex_core::{MemoryCheckpointStore, MemoryEventStore};
//! use feeindex_evm::ScraperBuilder;
//!
//! let scraper = ScraperBuilder::new(137)
//!     .provider_uri("https://polygon-rpc.com")
//!     .contract_address("0xbD6C7B0d2f68c2b7805d88388319cfB6EcB50eA9")
//!     .oldest_block(47_961_368)
//!     .chunk_size(500)
//!     .confirmation_lag(10)
//!     .build(Arc::new(MemoryEventStore::new()), Arc::new(MemoryCheckpointStore::new()))
//!     .unwrap();
//! ```

use std::sync::Arc;

use feeindex_core::checkpoint::CheckpointStore;
use feeindex_core::error::ScraperError;
use feeindex_core::scraper::{BatchScraper, ScraperConfig};
use feeindex_core::store::EventStore;
use feeindex_core::types::ChainId;

use crate::rpc::{HttpClientConfig, HttpRpcClient, RetryConfig};
use crate::source::{EvmEventSource, EvmSourceConfig};

/// Scraper over the HTTP JSON-RPC transport.
pub type EvmScraper = BatchScraper<EvmEventSource<HttpRpcClient>>;

/// Fluent builder for [`EvmScraper`].
pub struct ScraperBuilder {
    scraper: ScraperConfig,
    source: EvmSourceConfig,
    http: HttpClientConfig,
}

impl ScraperBuilder {
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            scraper: ScraperConfig::new(chain_id),
            source: EvmSourceConfig::new(chain_id, "", ""),
            http: HttpClientConfig::default(),
        }
    }

    /// JSON-RPC endpoint of the chain.
    pub fn provider_uri(mut self, uri: impl Into<String>) -> Self {
        self.source.provider_uri = uri.into();
        self
    }

    /// Address of the fee-collection contract.
    pub fn contract_address(mut self, address: impl Into<String>) -> Self {
        self.source.contract_address = address.into();
        self
    }

    /// Checkpoint assumed before the first advance.
    pub fn oldest_block(mut self, block: u64) -> Self {
        self.scraper.oldest_block = block;
        self
    }

    /// Maximum blocks per advance.
    pub fn chunk_size(mut self, size: u64) -> Self {
        self.scraper.chunk_size = size;
        self
    }

    /// Blocks held back from the chain head.
    pub fn confirmation_lag(mut self, lag: u64) -> Self {
        self.scraper.confirmation_lag = lag;
        self
    }

    pub fn timestamp_concurrency(mut self, n: usize) -> Self {
        self.source.timestamp_concurrency = n;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.http.retry = retry;
        self
    }

    pub fn request_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.http.request_timeout = timeout;
        self
    }

    pub fn scraper_config(&self) -> &ScraperConfig {
        &self.scraper
    }

    pub fn source_config(&self) -> &EvmSourceConfig {
        &self.source
    }

    /// Build the scraper over the given stores.
    pub fn build(
        self,
        events: Arc<dyn EventStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Result<EvmScraper, ScraperError> {
        let chain_id = self.scraper.chain_id;
        if self.source.provider_uri.is_empty() {
            return Err(ScraperError::InvalidConfig(format!("chain {chain_id}: provider_uri is required")));
        }
        if self.source.contract_address.is_empty() {
            return Err(ScraperError::InvalidConfig(format!(
                "chain {chain_id}: contract_address is required"
            )));
        }

        let client = HttpRpcClient::new(self.source.provider_uri.clone(), self.http)
            .map_err(|e| ScraperError::InvalidConfig(format!("chain {chain_id}: {e}")))?;
        let source = EvmEventSource::new(&self.source, client);
        BatchScraper::new(self.scraper, source, events, checkpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feeindex_core::{MemoryCheckpointStore, MemoryEventStore};

    fn stores() -> (Arc<dyn EventStore>, Arc<dyn CheckpointStore>) {
        (Arc::new(MemoryEventStore::new()), Arc::new(MemoryCheckpointStore::new()))
    }

    #[test]
    fn builder_defaults() {
        let b = ScraperBuilder::new(1);
        assert_eq!(b.scraper_config().chunk_size, 1000);
        assert_eq!(b.scraper_config().confirmation_lag, 5);
        assert_eq!(b.scraper_config().oldest_block, 0);
        assert_eq!(b.source_config().timestamp_concurrency, 8);
    }

    #[test]
    fn builder_custom() {
        let (events, checkpoints) = stores();
        let scraper = ScraperBuilder::new(137)
            .provider_uri("http://localhost:8545")
            .contract_address("0xbd6c7b0d2f68c2b7805d88388319cfb6ecb50ea9")
            .oldest_block(47_961_368)
            .chunk_size(500)
            .confirmation_lag(32)
            .build(events, checkpoints)
            .unwrap();

        assert_eq!(scraper.chain_id(), 137);
        assert_eq!(scraper.config().chunk_size, 500);
        assert_eq!(scraper.config().confirmation_lag, 32);
        assert_eq!(scraper.config().oldest_block, 47_961_368);
        assert_eq!(scraper.source().client().url(), "http://localhost:8545");
    }

    #[test]
    fn missing_provider_rejected() {
        let (events, checkpoints) = stores();
        let err = ScraperBuilder::new(10)
            .contract_address("0xbd6c7b0d2f68c2b7805d88388319cfb6ecb50ea9")
            .build(events, checkpoints)
            .err()
            .unwrap();
        assert!(matches!(err, ScraperError::InvalidConfig(_)));
    }

    #[test]
    fn zero_chunk_rejected() {
        let (events, checkpoints) = stores();
        let result = ScraperBuilder::new(10)
            .provider_uri("http://localhost:8545")
            .contract_address("0xbd6c7b0d2f68c2b7805d88388319cfb6ecb50ea9")
            .chunk_size(0)
            .build(events, checkpoints);
        assert!(matches!(result, Err(ScraperError::InvalidConfig(_))));
    }
}
