//! Batch filter-query execution with per-query failure isolation.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use chainsentinel_core::error::SentinelError;
use chainsentinel_core::types::{FilterQuery, Log};

use crate::client::BlockchainClient;

/// Runs a batch of filter queries against one chain's client and aggregates
/// the results.
///
/// A query that fails is logged and skipped — one misbehaving subscription
/// must not starve the rest of the feed. Cancellation between queries is a
/// graceful early-out, never an error.
pub struct ChainPoller {
    chain_id: u64,
    client: Arc<dyn BlockchainClient>,
    /// Widest block span one client call may cover; wider query ranges are
    /// split into chunks.
    max_range: u64,
}

impl ChainPoller {
    pub fn new(chain_id: u64, client: Arc<dyn BlockchainClient>, max_range: u64) -> Self {
        Self {
            chain_id,
            client,
            max_range,
        }
    }

    /// Execute every query, returning whatever was gathered.
    pub async fn filter_logs(
        &self,
        cancel: &CancellationToken,
        queries: &[FilterQuery],
    ) -> Vec<Log> {
        let mut collected = Vec::new();
        for query in queries {
            if cancel.is_cancelled() {
                debug!(
                    chain_id = self.chain_id,
                    gathered = collected.len(),
                    "cancelled mid-batch, returning partial results"
                );
                break;
            }
            match self.query_range(query).await {
                Ok(mut logs) => collected.append(&mut logs),
                Err(e) => warn!(
                    chain_id = self.chain_id,
                    from = query.from_block,
                    to = query.to_block,
                    error = %e,
                    "filter query failed, skipping"
                ),
            }
        }
        collected
    }

    /// Fetch all logs for one query, splitting ranges wider than `max_range`.
    async fn query_range(&self, query: &FilterQuery) -> Result<Vec<Log>, SentinelError> {
        if query.to_block < query.from_block {
            return Ok(vec![]);
        }
        if query.to_block - query.from_block < self.max_range {
            return self.client.filter_logs(query).await;
        }
        let mut all_logs = Vec::new();
        let mut start = query.from_block;
        while start <= query.to_block {
            let end = (start + self.max_range - 1).min(query.to_block);
            let chunk = FilterQuery {
                from_block: start,
                to_block: end,
                ..query.clone()
            };
            all_logs.extend(self.client.filter_logs(&chunk).await?);
            start = end + 1;
        }
        Ok(all_logs)
    }
}
