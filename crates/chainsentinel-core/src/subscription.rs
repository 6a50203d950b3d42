//! Subscription registry and fan-out broadcaster.
//!
//! One `SubscriptionManager` per chain owns the map from [`EventKey`] to the
//! subscriber channels interested in it. Broadcasting spawns one bounded send
//! per subscriber so a slow consumer can never stall the poll loop or its
//! sibling subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::SentinelError;
use crate::types::{EventKey, Log};

/// Buffer capacity of each subscriber channel.
pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 3;

/// Default bound on one broadcast send before the log is dropped.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Identifies one registered subscriber channel under an [`EventKey`].
///
/// IDs are assigned from a per-manager counter and never reused, so an ID
/// uniquely names the channel it was issued with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live subscription: the assigned ID plus the receiving end of the log
/// channel. The ID is what `unsubscribe` keys on.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub receiver: mpsc::Receiver<Log>,
}

/// Delivery counters, snapshot via [`SubscriptionManager::metrics`].
#[derive(Debug, Clone, Default)]
pub struct BroadcastMetrics {
    pub logs_delivered: u64,
    pub sends_timed_out: u64,
}

type Registry = HashMap<EventKey, Vec<(SubscriptionId, mpsc::Sender<Log>)>>;

/// Thread-safe registry of interest plus fan-out broadcaster for one chain.
pub struct SubscriptionManager {
    chain_id: u64,
    send_timeout: Duration,
    next_id: AtomicU64,
    registry: Mutex<Registry>,
    /// Memoized view of the registry's keys; `None` after any mutation.
    cache: Mutex<Option<Arc<Vec<EventKey>>>>,
    closing: AtomicBool,
    /// In-flight broadcast sends; `close` drains this before tearing down
    /// the registry.
    sends: TaskTracker,
    metrics: Mutex<BroadcastMetrics>,
}

impl SubscriptionManager {
    /// Create a manager for one chain with the default send timeout.
    pub fn new(chain_id: u64) -> Self {
        Self::with_send_timeout(chain_id, DEFAULT_SEND_TIMEOUT)
    }

    /// Create a manager with an explicit per-send timeout.
    pub fn with_send_timeout(chain_id: u64, send_timeout: Duration) -> Self {
        Self {
            chain_id,
            send_timeout,
            next_id: AtomicU64::new(1),
            registry: Mutex::new(HashMap::new()),
            cache: Mutex::new(None),
            closing: AtomicBool::new(false),
            sends: TaskTracker::new(),
            metrics: Mutex::new(BroadcastMetrics::default()),
        }
    }

    /// Register a new subscriber for an (address, topic) pair.
    ///
    /// Returns the receiving end of a bounded channel. Never blocks.
    pub fn subscribe(&self, address: &str, topic: &str) -> Result<Subscription, SentinelError> {
        if address.is_empty() {
            return Err(SentinelError::InvalidArgument(
                "address must not be empty".into(),
            ));
        }
        if topic.is_empty() {
            return Err(SentinelError::InvalidArgument(
                "topic must not be empty".into(),
            ));
        }

        let key = EventKey::new(address, topic);
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        {
            let mut registry = self.registry.lock().unwrap();
            if self.closing.load(Ordering::SeqCst) {
                return Err(SentinelError::ShuttingDown);
            }
            registry.entry(key.clone()).or_default().push((id, tx));
        }
        self.invalidate_cache();

        debug!(
            chain_id = self.chain_id,
            key = %key,
            subscription = %id,
            "registered subscription"
        );
        Ok(Subscription { id, receiver: rx })
    }

    /// Remove one subscriber channel from a key.
    ///
    /// Dropping the registered sender closes the subscriber's channel as soon
    /// as any in-flight send to it finishes. The key itself is removed once
    /// its last channel is gone.
    pub fn unsubscribe(
        &self,
        address: &str,
        topic: &str,
        id: SubscriptionId,
    ) -> Result<(), SentinelError> {
        let key = EventKey::new(address, topic);
        {
            let mut registry = self.registry.lock().unwrap();
            let entries = registry
                .get_mut(&key)
                .ok_or_else(|| SentinelError::NotFound(format!("no subscriptions for {key}")))?;
            let pos = entries
                .iter()
                .position(|(sid, _)| *sid == id)
                .ok_or_else(|| {
                    SentinelError::NotFound(format!("subscription {id} is not registered for {key}"))
                })?;
            entries.remove(pos);
            if entries.is_empty() {
                registry.remove(&key);
            }
        }
        self.invalidate_cache();

        debug!(
            chain_id = self.chain_id,
            key = %key,
            subscription = %id,
            "removed subscription"
        );
        Ok(())
    }

    /// Fan a log out to every subscriber of `key`.
    ///
    /// Each delivery runs as its own tracked task bounded by the send
    /// timeout; a timed-out send is dropped, not retried. No-op when there
    /// are no subscribers or the manager is closing.
    pub fn broadcast(self: &Arc<Self>, key: &EventKey, log: &Log) {
        let registry = self.registry.lock().unwrap();
        if self.closing.load(Ordering::SeqCst) {
            return;
        }
        let Some(entries) = registry.get(key) else {
            return;
        };
        for (id, sender) in entries {
            let id = *id;
            let sender = sender.clone();
            let log = log.clone();
            let manager = Arc::clone(self);
            // Spawned under the registry lock: every send is tracked before
            // close() can observe the closing flag.
            self.sends
                .spawn(async move { manager.send_one(id, sender, log).await });
        }
    }

    async fn send_one(&self, id: SubscriptionId, sender: mpsc::Sender<Log>, log: Log) {
        match sender.send_timeout(log, self.send_timeout).await {
            Ok(()) => {
                self.metrics.lock().unwrap().logs_delivered += 1;
            }
            Err(SendTimeoutError::Timeout(log)) => {
                self.metrics.lock().unwrap().sends_timed_out += 1;
                warn!(
                    chain_id = self.chain_id,
                    subscription = %id,
                    block = log.block_number,
                    "subscriber send timed out, dropping log"
                );
            }
            Err(SendTimeoutError::Closed(_)) => {
                debug!(
                    chain_id = self.chain_id,
                    subscription = %id,
                    "subscriber channel closed during send"
                );
            }
        }
    }

    /// Snapshot of the currently subscribed keys.
    ///
    /// Recomputed lazily after a mutation; between two mutations repeated
    /// calls return the identical allocation.
    pub fn subscribed_keys(&self) -> Arc<Vec<EventKey>> {
        let mut cache = self.cache.lock().unwrap();
        if let Some(keys) = cache.as_ref() {
            return Arc::clone(keys);
        }
        let keys: Arc<Vec<EventKey>> =
            Arc::new(self.registry.lock().unwrap().keys().cloned().collect());
        *cache = Some(Arc::clone(&keys));
        keys
    }

    /// Mark the manager as closing, wait for all in-flight sends, then close
    /// every remaining subscriber channel and empty the registry.
    pub async fn close(&self) {
        {
            let _registry = self.registry.lock().unwrap();
            self.closing.store(true, Ordering::SeqCst);
        }
        self.sends.close();
        self.sends.wait().await;
        // Dropping the senders closes every subscriber channel.
        self.registry.lock().unwrap().clear();
        self.invalidate_cache();
        info!(chain_id = self.chain_id, "subscription manager closed");
    }

    /// Delivery counters so far.
    pub fn metrics(&self) -> BroadcastMetrics {
        self.metrics.lock().unwrap().clone()
    }

    fn invalidate_cache(&self) {
        *self.cache.lock().unwrap() = None;
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}
