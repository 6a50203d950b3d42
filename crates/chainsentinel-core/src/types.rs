//! Shared types for the notification pipeline.

use serde::{Deserialize, Serialize};

// ─── EventKey ─────────────────────────────────────────────────────────────────

/// Identifies one subscribable event stream: a contract address plus a single
/// topic value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    /// Contract address (`0x…`).
    pub address: String,
    /// Topic value (`0x…`), usually the event signature hash.
    pub topic: String,
}

impl EventKey {
    /// Create a key for an (address, topic) pair.
    pub fn new(address: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            topic: topic.into(),
        }
    }
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.address, self.topic)
    }
}

// ─── Log ──────────────────────────────────────────────────────────────────────

/// An observed blockchain log entry. Immutable once produced by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    /// Contract address that emitted the log.
    pub address: String,
    /// Topic values, signature hash first.
    pub topics: Vec<String>,
    /// ABI-encoded payload (`0x…`).
    pub data: String,
    /// Block number the log was included in.
    pub block_number: u64,
    /// Transaction hash.
    pub tx_hash: String,
    /// Log index within the block.
    pub index: u32,
}

// ─── FilterQuery ──────────────────────────────────────────────────────────────

/// Request shape passed to `BlockchainClient::filter_logs`.
///
/// The poll loop emits one query per live [`EventKey`] — a single address and
/// a single topic per query keeps server-side filter semantics predictable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterQuery {
    /// Start block (inclusive).
    pub from_block: u64,
    /// End block (inclusive).
    pub to_block: u64,
    /// Contract addresses to match.
    pub addresses: Vec<String>,
    /// Topic positions to match; each position is an OR-list of values.
    pub topics: Vec<Vec<String>>,
}

impl FilterQuery {
    /// Build the single-address, single-topic query for one subscription key.
    pub fn for_key(key: &EventKey, from_block: u64, to_block: u64) -> Self {
        Self {
            from_block,
            to_block,
            addresses: vec![key.address.clone()],
            topics: vec![vec![key.topic.clone()]],
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn event_key_structural_equality() {
        let a = EventKey::new("0xabc", "0xt1");
        let b = EventKey::new("0xabc".to_string(), "0xt1".to_string());
        assert_eq!(a, b);
        assert_ne!(a, EventKey::new("0xabc", "0xt2"));
    }

    #[test]
    fn event_key_as_map_key() {
        let mut map = HashMap::new();
        map.insert(EventKey::new("0xabc", "0xt1"), 1u32);
        map.insert(EventKey::new("0xabc", "0xt1"), 2u32);
        assert_eq!(map.len(), 1);
        assert_eq!(map[&EventKey::new("0xabc", "0xt1")], 2);
    }

    #[test]
    fn filter_query_for_key_shape() {
        let key = EventKey::new("0xabc", "0xt1");
        let q = FilterQuery::for_key(&key, 100, 110);
        assert_eq!(q.from_block, 100);
        assert_eq!(q.to_block, 110);
        assert_eq!(q.addresses, vec!["0xabc".to_string()]);
        assert_eq!(q.topics, vec![vec!["0xt1".to_string()]]);
    }
}
