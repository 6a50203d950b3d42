//! chainsentinel-evm — per-chain poller, poll-loop service, and the
//! multi-chain [`Sentinel`] coordinator.
//!
//! # Architecture
//!
//! ```text
//! Sentinel
//!   └── ChainPollerService  (one per chain, owns the poll loop)
//!           ├── ChainPoller          (one filter query per live EventKey)
//!           ├── SubscriptionManager  (chainsentinel-core)
//!           └── BlockchainClient     (implemented by RPC adapters)
//! ```

pub mod builder;
pub mod client;
pub mod poller;
pub mod sentinel;
pub mod service;

pub use builder::ChainConfigBuilder;
pub use client::{BlockchainClient, RawLog};
pub use poller::ChainPoller;
pub use sentinel::Sentinel;
pub use service::{ChainPollerService, PollerMetrics};
