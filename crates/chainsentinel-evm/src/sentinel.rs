//! Multi-chain coordinator: one poller service per chain behind a single
//! subscribe/unsubscribe surface.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tracing::info;

use chainsentinel_core::config::ChainConfig;
use chainsentinel_core::error::SentinelError;
use chainsentinel_core::subscription::{Subscription, SubscriptionId};

use crate::client::BlockchainClient;
use crate::service::ChainPollerService;

/// Owns the chain-id → [`ChainPollerService`] map.
///
/// The map lock is never held across an await: services are cloned out of
/// the map and operated on afterwards, so one chain's shutdown cannot block
/// another chain's subscribers.
#[derive(Debug, Default)]
pub struct Sentinel {
    chains: Mutex<HashMap<u64, Arc<ChainPollerService>>>,
}

impl Sentinel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct, start, and register a poller service for a new chain.
    pub async fn add_chain(
        &self,
        config: ChainConfig,
        client: Arc<dyn BlockchainClient>,
    ) -> Result<(), SentinelError> {
        let chain_id = config.chain_id;
        if self.chains.lock().unwrap().contains_key(&chain_id) {
            return Err(SentinelError::AlreadyExists(chain_id));
        }

        let service = Arc::new(ChainPollerService::new(config, client).await?);
        service.start();

        let lost_race = {
            let mut chains = self.chains.lock().unwrap();
            match chains.entry(chain_id) {
                Entry::Occupied(_) => true,
                Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(&service));
                    false
                }
            }
        };
        if lost_race {
            // A concurrent add_chain won; tear our service back down.
            service.stop().await;
            return Err(SentinelError::AlreadyExists(chain_id));
        }

        info!(chain_id, "chain registered");
        Ok(())
    }

    /// Stop a chain's service and drop it from the map. Stopping closes the
    /// chain's subscription manager, which closes every subscriber channel.
    pub async fn remove_chain(&self, chain_id: u64) -> Result<(), SentinelError> {
        let service = self
            .chains
            .lock()
            .unwrap()
            .remove(&chain_id)
            .ok_or_else(|| SentinelError::NotFound(format!("chain {chain_id}")))?;
        service.stop().await;
        info!(chain_id, "chain removed");
        Ok(())
    }

    /// Subscribe to (address, topic) on one chain.
    pub fn subscribe(
        &self,
        chain_id: u64,
        address: &str,
        topic: &str,
    ) -> Result<Subscription, SentinelError> {
        self.service(chain_id)?.subscriptions().subscribe(address, topic)
    }

    /// Remove one subscription from one chain.
    pub fn unsubscribe(
        &self,
        chain_id: u64,
        address: &str,
        topic: &str,
        id: SubscriptionId,
    ) -> Result<(), SentinelError> {
        self.service(chain_id)?
            .subscriptions()
            .unsubscribe(address, topic, id)
    }

    /// Stop every chain service and empty the map.
    pub async fn close(&self) {
        let services: Vec<_> = {
            let mut chains = self.chains.lock().unwrap();
            chains.drain().map(|(_, service)| service).collect()
        };
        join_all(services.iter().map(|service| service.stop())).await;
        info!(chains = services.len(), "sentinel closed");
    }

    /// Registered chain ids, sorted.
    pub fn chain_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.chains.lock().unwrap().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// The service for `chain_id`, if registered.
    pub fn service(&self, chain_id: u64) -> Result<Arc<ChainPollerService>, SentinelError> {
        self.chains
            .lock()
            .unwrap()
            .get(&chain_id)
            .cloned()
            .ok_or_else(|| SentinelError::NotFound(format!("chain {chain_id}")))
    }
}
