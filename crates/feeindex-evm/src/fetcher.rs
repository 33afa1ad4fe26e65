//! EVM log and block fetcher.
//!
//! Thin typed layer over `eth_blockNumber`, `eth_getLogs` and
//! `eth_getBlockByNumber`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use feeindex_core::error::ChainQueryError;

use crate::rpc::HttpRpcClient;

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    pub fn block_number(&self) -> Result<u64, ChainQueryError> {
        parse_hex_u64(&self.block_number)
    }

    pub fn log_index(&self) -> Result<u64, ChainQueryError> {
        parse_hex_u64(&self.log_index)
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }
}

/// Address + topic0 filter for `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: String,
    pub topic0: String,
}

impl LogFilter {
    fn to_params(&self, from: u64, to: u64) -> Value {
        json!({
            "address": self.address,
            "topics": [self.topic0],
            "fromBlock": format!("{from:#x}"),
            "toBlock": format!("{to:#x}"),
        })
    }
}

/// Trait for fetching EVM data from a JSON-RPC provider.
#[async_trait]
pub trait EvmRpcClient: Send + Sync {
    async fn block_number(&self) -> Result<u64, ChainQueryError>;

    /// Unix timestamp of a block, `None` if the node does not know it.
    async fn block_timestamp(&self, number: u64) -> Result<Option<u64>, ChainQueryError>;

    async fn logs(&self, from: u64, to: u64, filter: &LogFilter) -> Result<Vec<RawLog>, ChainQueryError>;
}

#[derive(Deserialize)]
struct BlockHeader {
    timestamp: String,
}

#[async_trait]
impl EvmRpcClient for HttpRpcClient {
    async fn block_number(&self) -> Result<u64, ChainQueryError> {
        let hex: String = self.call("eth_blockNumber", vec![]).await?;
        parse_hex_u64(&hex)
    }

    async fn block_timestamp(&self, number: u64) -> Result<Option<u64>, ChainQueryError> {
        let header: Option<BlockHeader> = self
            .call("eth_getBlockByNumber", vec![json!(format!("{number:#x}")), json!(false)])
            .await?;
        header.map(|h| parse_hex_u64(&h.timestamp)).transpose()
    }

    async fn logs(&self, from: u64, to: u64, filter: &LogFilter) -> Result<Vec<RawLog>, ChainQueryError> {
        self.call("eth_getLogs", vec![filter.to_params(from, to)]).await
    }
}

/// Parse a `0x`-prefixed (or bare) hex quantity.
pub fn parse_hex_u64(s: &str) -> Result<u64, ChainQueryError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|e| ChainQueryError::Decode(format!("invalid hex quantity {s:?}: {e}")))
}
