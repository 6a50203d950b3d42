//! Error types for the notification pipeline.

use thiserror::Error;

/// Errors surfaced by subscription and chain-management operations.
#[derive(Debug, Error)]
pub enum SentinelError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("chain {0} is already registered")]
    AlreadyExists(u64),

    #[error("chain {0} reports an empty chain (head is zero)")]
    EmptyChain(u64),

    #[error("shutting down")]
    ShuttingDown,

    #[error("RPC error: {0}")]
    Rpc(String),
}

impl SentinelError {
    /// Returns `true` if the error is a missing chain/subscription lookup.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` if the error is a caller-side precondition violation.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }
}
