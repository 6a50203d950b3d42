//! Fluent builder API for per-chain poller configuration.
//!
//! # Example
//!
//! ```rust
//! use chainsentinel_evm::ChainConfigBuilder;
//!
//! let config = ChainConfigBuilder::new()
//!     .chain_id(137)
//!     .poll_interval_ms(500)
//!     .max_blocks_per_query(200)
//!     .build();
//! ```

use chainsentinel_core::config::ChainConfig;

/// Fluent builder for [`ChainConfig`].
#[derive(Default)]
pub struct ChainConfigBuilder {
    config: ChainConfig,
}

impl ChainConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ChainConfig::default(),
        }
    }

    /// Set the chain to poll.
    pub fn chain_id(mut self, chain_id: u64) -> Self {
        self.config.chain_id = chain_id;
        self
    }

    /// Set the poll interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Set the bound on one RPC round in milliseconds.
    pub fn query_timeout_ms(mut self, ms: u64) -> Self {
        self.config.query_timeout_ms = ms;
        self
    }

    /// Set the widest block span one `eth_getLogs` call may cover.
    pub fn max_blocks_per_query(mut self, blocks: u64) -> Self {
        self.config.max_blocks_per_query = blocks;
        self
    }

    /// Build the [`ChainConfig`].
    pub fn build(self) -> ChainConfig {
        self.config
    }
}
