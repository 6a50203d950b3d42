//! chainsentinel-core — foundation for the multi-chain event-notification engine.
//!
//! # Architecture
//!
//! ```text
//! Sentinel → ChainPollerService  (one per chain)
//!                ├── ChainPoller          (filter-query fan-out)
//!                ├── SubscriptionManager  (registry + broadcast)   ← this crate
//!                └── BlockchainClient     (RPC seam, implemented by adapters)
//! ```

pub mod config;
pub mod error;
pub mod subscription;
pub mod types;

pub use config::{ChainConfig, ServiceState};
pub use error::SentinelError;
pub use subscription::{Subscription, SubscriptionId, SubscriptionManager};
pub use types::{EventKey, FilterQuery, Log};
