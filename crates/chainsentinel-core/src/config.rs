//! Per-chain poller configuration and service state.

use serde::{Deserialize, Serialize};

use crate::error::SentinelError;

/// Configuration for one chain's poller service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain to poll (EVM chain id, non-zero).
    pub chain_id: u64,
    /// Poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Upper bound on one RPC round (head fetch, or one filter-query round).
    pub query_timeout_ms: u64,
    /// How many blocks one `eth_getLogs` call may span before the range is
    /// split into chunks.
    pub max_blocks_per_query: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            poll_interval_ms: 2000,
            query_timeout_ms: 10_000,
            max_blocks_per_query: 1000,
        }
    }
}

impl ChainConfig {
    /// Validate all construction preconditions, naming the offending field.
    pub fn validate(&self) -> Result<(), SentinelError> {
        if self.chain_id == 0 {
            return Err(SentinelError::InvalidArgument(
                "chain_id must be non-zero".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(SentinelError::InvalidArgument(
                "poll_interval_ms must be positive".into(),
            ));
        }
        if self.query_timeout_ms == 0 {
            return Err(SentinelError::InvalidArgument(
                "query_timeout_ms must be positive".into(),
            ));
        }
        if self.max_blocks_per_query == 0 {
            return Err(SentinelError::InvalidArgument(
                "max_blocks_per_query must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Lifecycle state of a chain poller service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    /// Constructed but not yet started.
    Created,
    /// Poll loop running.
    Started,
    /// Stopped; the state machine is one-way and the service cannot restart.
    Stopped,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Started => write!(f, "started"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let cfg = ChainConfig::default();
        assert_eq!(cfg.chain_id, 1);
        assert_eq!(cfg.poll_interval_ms, 2000);
        assert_eq!(cfg.query_timeout_ms, 10_000);
        assert_eq!(cfg.max_blocks_per_query, 1000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn config_rejects_zero_fields() {
        let cases = [
            ChainConfig { chain_id: 0, ..Default::default() },
            ChainConfig { poll_interval_ms: 0, ..Default::default() },
            ChainConfig { query_timeout_ms: 0, ..Default::default() },
            ChainConfig { max_blocks_per_query: 0, ..Default::default() },
        ];
        for cfg in cases {
            assert!(cfg.validate().unwrap_err().is_invalid_argument());
        }
    }

    #[test]
    fn service_state_display() {
        assert_eq!(ServiceState::Created.to_string(), "created");
        assert_eq!(ServiceState::Started.to_string(), "started");
        assert_eq!(ServiceState::Stopped.to_string(), "stopped");
    }
}
