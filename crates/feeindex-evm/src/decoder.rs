//! `FeesCollected` log decoder.
//!
//! ```solidity
//! event FeesCollected(
//!     address indexed _token,
//!     address indexed _integrator,
//!     uint256 _integratorFee,
//!     uint256 _lifiFee
//! );
//! ```
//!
//! Indexed addresses sit in `topics[1]` and `topics[2]`; both fees are
//! ABI-encoded in `data`.

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{keccak256, Address, B256, U256};
use chrono::{DateTime, Utc};

use feeindex_core::error::ChainQueryError;
use feeindex_core::types::{ChainId, FeeEvent};

use crate::fetcher::RawLog;

/// Canonical signature of the fee-collection event.
pub const FEES_COLLECTED_SIGNATURE: &str = "FeesCollected(address,address,uint256,uint256)";

/// `topics[0]` of every `FeesCollected` log.
pub fn fees_collected_topic() -> B256 {
    keccak256(FEES_COLLECTED_SIGNATURE)
}

/// Decode one raw log into a [`FeeEvent`].
pub fn decode_fees_collected(
    log: &RawLog,
    chain_id: ChainId,
    timestamp: DateTime<Utc>,
) -> Result<FeeEvent, ChainQueryError> {
    if log.topics.len() < 3 {
        return Err(decode_err(format!(
            "expected 3 topics, got {} (tx {})",
            log.topics.len(),
            log.tx_hash
        )));
    }
    if parse_b256(&log.topics[0])? != fees_collected_topic() {
        return Err(decode_err(format!("not a FeesCollected log: topic0 {}", log.topics[0])));
    }

    let token = decode_address_topic(&log.topics[1])?;
    let integrator = decode_address_topic(&log.topics[2])?;
    let (integrator_fee, lifi_fee) = decode_fees(&log.data)?;
    let transaction_hash = parse_b256(&log.tx_hash)?;

    Ok(FeeEvent {
        chain_id,
        token: token.to_checksum(None),
        integrator: integrator.to_checksum(None),
        integrator_fee,
        lifi_fee,
        block_number: log.block_number()?,
        transaction_hash: transaction_hash.to_string(),
        log_index: log.log_index()?,
        timestamp,
    })
}

fn decode_address_topic(topic: &str) -> Result<Address, ChainQueryError> {
    let word = parse_b256(topic)?;
    match DynSolType::Address.abi_decode(word.as_slice()) {
        Ok(DynSolValue::Address(addr)) => Ok(addr),
        Ok(other) => Err(decode_err(format!("topic {topic}: expected address, got {other:?}"))),
        Err(e) => Err(decode_err(format!("topic {topic}: {e}"))),
    }
}

fn decode_fees(data: &str) -> Result<(U256, U256), ChainQueryError> {
    let bytes = hex::decode(data.strip_prefix("0x").unwrap_or(data))
        .map_err(|e| decode_err(format!("invalid data hex: {e}")))?;

    let ty = DynSolType::Tuple(vec![DynSolType::Uint(256), DynSolType::Uint(256)]);
    let decoded = ty
        .abi_decode(&bytes)
        .map_err(|e| decode_err(format!("fee amounts: {e}")))?;

    match decoded {
        DynSolValue::Tuple(values) => match values.as_slice() {
            [DynSolValue::Uint(integrator_fee, _), DynSolValue::Uint(lifi_fee, _)] => {
                Ok((*integrator_fee, *lifi_fee))
            }
            _ => Err(decode_err("fee amounts: unexpected tuple shape")),
        },
        other => Err(decode_err(format!("fee amounts: expected tuple, got {other:?}"))),
    }
}

fn parse_b256(s: &str) -> Result<B256, ChainQueryError> {
    s.parse::<B256>()
        .map_err(|e| decode_err(format!("invalid 32-byte hex {s:?}: {e}")))
}

fn decode_err(msg: impl Into<String>) -> ChainQueryError {
    ChainQueryError::Decode(msg.into())
}
