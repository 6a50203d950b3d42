//! The RPC client seam and the `eth_getLogs` wire shapes.
//!
//! [`BlockchainClient`] is the single abstraction the poller depends on; any
//! JSON-RPC adapter (or a test double) implements it. The helpers below
//! translate between the hex-quantity wire encoding and the engine's types
//! for adapters to reuse.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use chainsentinel_core::error::SentinelError;
use chainsentinel_core::types::{FilterQuery, Log};

/// Narrow capability interface over a blockchain node.
///
/// Implementations must be safe for concurrent use and must treat
/// cancellation of a pending call as a normal abort, not a failure.
#[async_trait]
pub trait BlockchainClient: Send + Sync {
    /// Current head block number.
    async fn block_number(&self) -> Result<u64, SentinelError>;

    /// Logs matching `query` in its inclusive block range.
    async fn filter_logs(&self, query: &FilterQuery) -> Result<Vec<Log>, SentinelError>;
}

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    #[serde(rename = "data")]
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(rename = "removed")]
    pub removed: Option<bool>,
}

impl RawLog {
    /// Returns the block number as u64.
    pub fn block_number_u64(&self) -> u64 {
        parse_hex_u64(&self.block_number)
    }

    /// Returns the log index as u32.
    pub fn log_index_u32(&self) -> u32 {
        parse_hex_u64(&self.log_index) as u32
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }

    /// Convert to the engine's [`Log`] type.
    pub fn into_log(self) -> Log {
        Log {
            block_number: self.block_number_u64(),
            index: self.log_index_u32(),
            address: self.address,
            topics: self.topics,
            data: self.data,
            tx_hash: self.tx_hash,
        }
    }
}

/// Parse a hex-encoded string (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> u64 {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).unwrap_or(0)
}

/// Build the `eth_getLogs` params object for a [`FilterQuery`].
pub fn filter_params(query: &FilterQuery) -> Value {
    json!({
        "fromBlock": format!("0x{:x}", query.from_block),
        "toBlock": format!("0x{:x}", query.to_block),
        "address": query.addresses,
        "topics": query.topics,
    })
}
