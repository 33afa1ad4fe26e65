//! feeindex-evm: JSON-RPC transport, `FeesCollected` decoder and chain
//! event source for EVM networks.

pub mod builder;
pub mod decoder;
pub mod fetcher;
pub mod rpc;
pub mod source;

pub use builder::{EvmScraper, ScraperBuilder};
pub use decoder::{decode_fees_collected, fees_collected_topic, FEES_COLLECTED_SIGNATURE};
pub use fetcher::{EvmRpcClient, LogFilter, RawLog};
pub use rpc::{HttpClientConfig, HttpRpcClient, RetryConfig};
pub use source::{EvmEventSource, EvmSourceConfig};
