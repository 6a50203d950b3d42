//! Single-chain polling service: lifecycle state machine plus the poll loop.
//!
//! One service owns one [`ChainPoller`], one [`SubscriptionManager`], and one
//! [`BlockchainClient`]. Its loop runs on a fixed-interval ticker; each tick
//! executes one poll cycle:
//!
//! 1. fetch head → 2. compute `[last + 1, head]` → 3. read live keys →
//! 4. one query per key → 5. filter logs → 6. broadcast per (address, topic)
//! → 7. advance the cursor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chainsentinel_core::config::{ChainConfig, ServiceState};
use chainsentinel_core::error::SentinelError;
use chainsentinel_core::subscription::SubscriptionManager;
use chainsentinel_core::types::{EventKey, FilterQuery};

use crate::client::BlockchainClient;
use crate::poller::ChainPoller;

/// Poll-loop counters, snapshot via [`ChainPollerService::metrics`].
#[derive(Debug, Clone, Default)]
pub struct PollerMetrics {
    pub cycles: u64,
    pub rpc_errors: u64,
    pub logs_fetched: u64,
}

/// Owns one chain's poll loop and subscription registry.
///
/// Lifecycle is one-way: `Created → Started → Stopped`. A second `start` is
/// a warning no-op, as is `stop` before `start`; after `stop` returns, the
/// loop task has exited and the subscription manager is closed.
pub struct ChainPollerService {
    chain_id: u64,
    poll_interval: Duration,
    query_timeout: Duration,
    max_blocks_per_query: u64,
    client: Arc<dyn BlockchainClient>,
    subs: Arc<SubscriptionManager>,
    /// Highest block already covered by a completed cycle. Written only by
    /// the loop task; read anywhere.
    cursor: Arc<AtomicU64>,
    metrics: Arc<Mutex<PollerMetrics>>,
    state: Mutex<ServiceState>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ChainPollerService {
    /// Validate the config, seed the cursor at `head - 1`, and return the
    /// service in the `Created` state.
    pub async fn new(
        config: ChainConfig,
        client: Arc<dyn BlockchainClient>,
    ) -> Result<Self, SentinelError> {
        config.validate()?;
        let query_timeout = Duration::from_millis(config.query_timeout_ms);

        let head = timeout(query_timeout, client.block_number())
            .await
            .map_err(|_| SentinelError::Rpc("head fetch timed out during construction".into()))??;
        if head == 0 {
            return Err(SentinelError::EmptyChain(config.chain_id));
        }

        info!(
            chain_id = config.chain_id,
            head,
            poll_interval_ms = config.poll_interval_ms,
            "chain poller created"
        );
        Ok(Self {
            chain_id: config.chain_id,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            query_timeout,
            max_blocks_per_query: config.max_blocks_per_query,
            subs: Arc::new(SubscriptionManager::new(config.chain_id)),
            cursor: Arc::new(AtomicU64::new(head - 1)),
            metrics: Arc::new(Mutex::new(PollerMetrics::default())),
            state: Mutex::new(ServiceState::Created),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
            client,
        })
    }

    /// Spawn the poll loop. No-op (with a warning) unless in `Created` state.
    pub fn start(&self) {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                ServiceState::Started => {
                    warn!(chain_id = self.chain_id, "start called on a running service");
                    return;
                }
                ServiceState::Stopped => {
                    warn!(chain_id = self.chain_id, "start called on a stopped service");
                    return;
                }
                ServiceState::Created => *state = ServiceState::Started,
            }
        }

        let poll_loop = PollLoop {
            chain_id: self.chain_id,
            client: Arc::clone(&self.client),
            poller: ChainPoller::new(
                self.chain_id,
                Arc::clone(&self.client),
                self.max_blocks_per_query,
            ),
            subs: Arc::clone(&self.subs),
            cursor: Arc::clone(&self.cursor),
            query_timeout: self.query_timeout,
            metrics: Arc::clone(&self.metrics),
        };
        let handle = tokio::spawn(poll_loop.run(self.poll_interval, self.cancel.clone()));
        *self.handle.lock().unwrap() = Some(handle);
        info!(chain_id = self.chain_id, "chain poller started");
    }

    /// Cancel the loop, wait for it to exit, then close the subscription
    /// manager. After this returns no task of the service is left running.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state != ServiceState::Started {
                debug!(
                    chain_id = self.chain_id,
                    state = %*state,
                    "stop called on a service that is not running"
                );
                return;
            }
            *state = ServiceState::Stopped;
        }

        self.cancel.cancel();
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(chain_id = self.chain_id, error = %e, "poll loop task panicked");
            }
        }
        self.subs.close().await;
        info!(chain_id = self.chain_id, "chain poller stopped");
    }

    /// The chain this service polls.
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// This chain's subscription registry.
    pub fn subscriptions(&self) -> Arc<SubscriptionManager> {
        Arc::clone(&self.subs)
    }

    /// Highest block number already covered by a completed poll cycle.
    pub fn last_block(&self) -> u64 {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServiceState {
        *self.state.lock().unwrap()
    }

    /// Poll-loop counters so far.
    pub fn metrics(&self) -> PollerMetrics {
        self.metrics.lock().unwrap().clone()
    }
}

impl std::fmt::Debug for ChainPollerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainPollerService")
            .field("chain_id", &self.chain_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// The loop task's share of the service state.
struct PollLoop {
    chain_id: u64,
    client: Arc<dyn BlockchainClient>,
    poller: ChainPoller,
    subs: Arc<SubscriptionManager>,
    cursor: Arc<AtomicU64>,
    query_timeout: Duration,
    metrics: Arc<Mutex<PollerMetrics>>,
}

impl PollLoop {
    async fn run(self, poll_interval: Duration, cancel: CancellationToken) {
        // First tick after one full interval, so a caller can subscribe
        // between start() and the first cycle.
        let start = tokio::time::Instant::now() + poll_interval;
        let mut ticker = tokio::time::interval_at(start, poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.cycle(&cancel) => {}
                    }
                }
            }
        }
        debug!(chain_id = self.chain_id, "poll loop exited");
    }

    /// One poll cycle. Errors are contained here: RPC failures skip the
    /// cycle and the next tick retries via the unchanged cursor.
    async fn cycle(&self, cancel: &CancellationToken) {
        self.metrics.lock().unwrap().cycles += 1;

        let head = match timeout(self.query_timeout, self.client.block_number()).await {
            Ok(Ok(head)) => head,
            Ok(Err(e)) => {
                if cancel.is_cancelled() {
                    debug!(chain_id = self.chain_id, "head fetch aborted by shutdown");
                } else {
                    self.metrics.lock().unwrap().rpc_errors += 1;
                    warn!(chain_id = self.chain_id, error = %e, "failed to fetch head, skipping cycle");
                }
                return;
            }
            Err(_) => {
                self.metrics.lock().unwrap().rpc_errors += 1;
                warn!(chain_id = self.chain_id, "head fetch timed out, skipping cycle");
                return;
            }
        };

        let from_block = self.cursor.load(Ordering::Relaxed) + 1;
        if from_block > head {
            debug!(chain_id = self.chain_id, head, "head has not advanced");
            return;
        }

        let keys = self.subs.subscribed_keys();
        if keys.is_empty() {
            // Nobody is listening: advance without an RPC call.
            self.cursor.store(head, Ordering::Relaxed);
            debug!(chain_id = self.chain_id, head, "no live subscriptions, cursor advanced");
            return;
        }

        let queries: Vec<FilterQuery> = keys
            .iter()
            .map(|key| FilterQuery::for_key(key, from_block, head))
            .collect();

        let logs = match timeout(
            self.query_timeout,
            self.poller.filter_logs(cancel, &queries),
        )
        .await
        {
            Ok(logs) => logs,
            Err(_) => {
                self.metrics.lock().unwrap().rpc_errors += 1;
                warn!(chain_id = self.chain_id, "filter round timed out, skipping its results");
                Vec::new()
            }
        };
        self.metrics.lock().unwrap().logs_fetched += logs.len() as u64;

        // Subscribers key on exact (address, topic) pairs: a log carrying
        // several matching topics is broadcast once per topic.
        for log in &logs {
            for topic in &log.topics {
                let key = EventKey::new(log.address.clone(), topic.clone());
                self.subs.broadcast(&key, log);
            }
        }

        // Unconditional: the cursor never regresses or stalls because of a
        // downstream consumer problem.
        self.cursor.store(head, Ordering::Relaxed);
        debug!(
            chain_id = self.chain_id,
            from_block,
            to_block = head,
            logs = logs.len(),
            "poll cycle complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chainsentinel_core::types::Log;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::timeout as tokio_timeout;

    const ADDR: &str = "0xa";
    const TOPIC_A: &str = "0xt1";
    const TOPIC_B: &str = "0xt2";

    /// Client double: scripted heads (last one repeats) and canned logs
    /// filtered per query.
    struct MockClient {
        heads: Mutex<VecDeque<u64>>,
        logs: Vec<Log>,
        filter_calls: AtomicUsize,
        fail_filters: bool,
        fail_head: bool,
    }

    impl MockClient {
        fn with_heads(heads: &[u64]) -> Self {
            Self {
                heads: Mutex::new(heads.iter().copied().collect()),
                logs: vec![],
                filter_calls: AtomicUsize::new(0),
                fail_filters: false,
                fail_head: false,
            }
        }

        fn with_logs(mut self, logs: Vec<Log>) -> Self {
            self.logs = logs;
            self
        }

        fn filter_calls(&self) -> usize {
            self.filter_calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl BlockchainClient for MockClient {
        async fn block_number(&self) -> Result<u64, SentinelError> {
            if self.fail_head {
                return Err(SentinelError::Rpc("node unreachable".into()));
            }
            let mut heads = self.heads.lock().unwrap();
            let head = if heads.len() > 1 {
                heads.pop_front().unwrap()
            } else {
                *heads.front().expect("mock has no heads")
            };
            Ok(head)
        }

        async fn filter_logs(&self, query: &FilterQuery) -> Result<Vec<Log>, SentinelError> {
            self.filter_calls.fetch_add(1, Ordering::Relaxed);
            if self.fail_filters {
                return Err(SentinelError::Rpc("filter rejected".into()));
            }
            Ok(self
                .logs
                .iter()
                .filter(|log| {
                    log.block_number >= query.from_block
                        && log.block_number <= query.to_block
                        && query.addresses.contains(&log.address)
                        && log.topics.iter().any(|t| query.topics[0].contains(t))
                })
                .cloned()
                .collect())
        }
    }

    fn transfer_log(block: u64, topics: &[&str]) -> Log {
        Log {
            address: ADDR.into(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            data: "0x".into(),
            block_number: block,
            tx_hash: format!("0xtx{block}"),
            index: 0,
        }
    }

    fn poll_loop(client: Arc<MockClient>, cursor: u64) -> PollLoop {
        PollLoop {
            chain_id: 1,
            poller: ChainPoller::new(1, client.clone(), 1000),
            client,
            subs: Arc::new(SubscriptionManager::new(1)),
            cursor: Arc::new(AtomicU64::new(cursor)),
            query_timeout: Duration::from_secs(5),
            metrics: Arc::new(Mutex::new(PollerMetrics::default())),
        }
    }

    #[tokio::test]
    async fn construction_validates_config() {
        let client = Arc::new(MockClient::with_heads(&[100]));
        let bad = ChainConfig {
            chain_id: 0,
            ..Default::default()
        };
        let err = ChainPollerService::new(bad, client).await.unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[tokio::test]
    async fn construction_rejects_empty_chain() {
        let client = Arc::new(MockClient::with_heads(&[0]));
        let err = ChainPollerService::new(ChainConfig::default(), client)
            .await
            .unwrap_err();
        assert!(matches!(err, SentinelError::EmptyChain(1)));
    }

    #[tokio::test]
    async fn construction_seeds_cursor_one_below_head() {
        let client = Arc::new(MockClient::with_heads(&[100]));
        let service = ChainPollerService::new(ChainConfig::default(), client)
            .await
            .unwrap();
        assert_eq!(service.last_block(), 99);
        assert_eq!(service.state(), ServiceState::Created);
    }

    #[tokio::test]
    async fn cycle_without_subscriptions_advances_cursor_without_filtering() {
        let client = Arc::new(MockClient::with_heads(&[110]));
        let poll = poll_loop(client.clone(), 99);

        poll.cycle(&CancellationToken::new()).await;
        assert_eq!(poll.cursor.load(Ordering::Relaxed), 110);
        assert_eq!(client.filter_calls(), 0);
    }

    #[tokio::test]
    async fn cycle_skips_when_head_has_not_advanced() {
        let client = Arc::new(MockClient::with_heads(&[100]));
        let poll = poll_loop(client.clone(), 100);
        let _sub = poll.subs.subscribe(ADDR, TOPIC_A).unwrap();

        poll.cycle(&CancellationToken::new()).await;
        assert_eq!(poll.cursor.load(Ordering::Relaxed), 100);
        assert_eq!(client.filter_calls(), 0);
    }

    #[tokio::test]
    async fn cycle_broadcasts_once_per_matching_topic() {
        let client = Arc::new(
            MockClient::with_heads(&[110])
                .with_logs(vec![transfer_log(105, &[TOPIC_A, TOPIC_B])]),
        );
        let poll = poll_loop(client, 99);
        let mut sub_a = poll.subs.subscribe(ADDR, TOPIC_A).unwrap();
        let mut sub_b = poll.subs.subscribe(ADDR, TOPIC_B).unwrap();

        poll.cycle(&CancellationToken::new()).await;

        let got_a = tokio_timeout(Duration::from_secs(1), sub_a.receiver.recv())
            .await
            .unwrap()
            .unwrap();
        let got_b = tokio_timeout(Duration::from_secs(1), sub_b.receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got_a.block_number, 105);
        assert_eq!(got_a, got_b);
        assert_eq!(poll.cursor.load(Ordering::Relaxed), 110);
    }

    #[tokio::test]
    async fn cycle_advances_cursor_despite_filter_errors() {
        let mut client = MockClient::with_heads(&[110]);
        client.fail_filters = true;
        let poll = poll_loop(Arc::new(client), 99);
        let _sub = poll.subs.subscribe(ADDR, TOPIC_A).unwrap();

        poll.cycle(&CancellationToken::new()).await;
        assert_eq!(poll.cursor.load(Ordering::Relaxed), 110);
    }

    #[tokio::test]
    async fn cycle_skips_on_head_fetch_error() {
        let mut client = MockClient::with_heads(&[110]);
        client.fail_head = true;
        let poll = poll_loop(Arc::new(client), 99);

        poll.cycle(&CancellationToken::new()).await;
        assert_eq!(poll.cursor.load(Ordering::Relaxed), 99);
        assert_eq!(poll.metrics.lock().unwrap().rpc_errors, 1);
    }

    #[tokio::test]
    async fn lifecycle_is_one_way_and_stop_joins_the_loop() {
        let client = Arc::new(MockClient::with_heads(&[100, 110]));
        let config = ChainConfig {
            poll_interval_ms: 10,
            ..Default::default()
        };
        let service = ChainPollerService::new(config, client).await.unwrap();

        service.start();
        assert_eq!(service.state(), ServiceState::Started);
        // Re-entrant start is a no-op.
        service.start();
        assert_eq!(service.state(), ServiceState::Started);

        tokio::time::sleep(Duration::from_millis(50)).await;
        service.stop().await;
        assert_eq!(service.state(), ServiceState::Stopped);
        assert_eq!(service.last_block(), 110);

        // Stop again and start-after-stop are both no-ops.
        service.stop().await;
        service.start();
        assert_eq!(service.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn stop_before_start_is_a_noop() {
        let client = Arc::new(MockClient::with_heads(&[100]));
        let service = ChainPollerService::new(ChainConfig::default(), client)
            .await
            .unwrap();
        service.stop().await;
        assert_eq!(service.state(), ServiceState::Created);
    }

    #[tokio::test]
    async fn stop_closes_the_subscription_manager() {
        let client = Arc::new(MockClient::with_heads(&[100]));
        let config = ChainConfig {
            poll_interval_ms: 10,
            ..Default::default()
        };
        let service = ChainPollerService::new(config, client).await.unwrap();
        let mut sub = service.subscriptions().subscribe(ADDR, TOPIC_A).unwrap();

        service.start();
        service.stop().await;
        assert!(sub.receiver.recv().await.is_none());
    }
}
