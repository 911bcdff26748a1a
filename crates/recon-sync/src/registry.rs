use alloy::primitives::Address;
use dashmap::DashMap;
use recon_core::traits::RegistrySource;
use recon_core::types::Currency;
use recon_core::Result;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// What one network's scanner needs to know for a pass
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    pub watched: HashSet<Address>,
    pub currencies: Vec<Currency>,
    loaded_at: Instant,
}

impl RegistrySnapshot {
    pub fn contracts(&self) -> Vec<Address> {
        self.currencies.iter().map(|c| c.contract).collect()
    }

    pub fn is_watched(&self, address: &Address) -> bool {
        self.watched.contains(address)
    }

    /// `to` topic filter, or None when the set is too large to send.
    pub fn recipient_filter(&self, max: usize) -> Option<Vec<Address>> {
        if self.watched.is_empty() || self.watched.len() > max {
            return None;
        }
        let mut recipients: Vec<Address> = self.watched.iter().copied().collect();
        recipients.sort();
        Some(recipients)
    }
}

/// Read-only registry view with bounded staleness, shared by all scanners.
pub struct CachedRegistry {
    source: Arc<dyn RegistrySource>,
    ttl: Duration,
    snapshots: DashMap<i64, Arc<RegistrySnapshot>>,
}

impl CachedRegistry {
    pub fn new(source: Arc<dyn RegistrySource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            snapshots: DashMap::new(),
        }
    }

    /// Cached snapshot for a network, reloaded once older than the TTL.
    ///
    /// A failed reload keeps serving the stale snapshot if there is one.
    pub async fn snapshot(&self, network_id: i64) -> Result<Arc<RegistrySnapshot>> {
        let cached = self.snapshots.get(&network_id).map(|s| Arc::clone(&s));
        if let Some(snapshot) = &cached {
            if snapshot.loaded_at.elapsed() < self.ttl {
                return Ok(Arc::clone(snapshot));
            }
        }

        match self.load(network_id).await {
            Ok(fresh) => {
                let fresh = Arc::new(fresh);
                self.snapshots.insert(network_id, Arc::clone(&fresh));
                Ok(fresh)
            }
            Err(e) => match cached {
                Some(stale) => {
                    warn!(network_id = network_id, error = %e, "Registry refresh failed, using stale snapshot");
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    async fn load(&self, network_id: i64) -> Result<RegistrySnapshot> {
        let watched = self.source.watched_addresses().await?;
        let currencies = self.source.currencies(network_id).await?;
        debug!(
            network_id = network_id,
            watched = watched.len(),
            currencies = currencies.len(),
            "Registry reloaded"
        );
        recon_metrics::gauges::set_watched_addresses(watched.len());
        Ok(RegistrySnapshot {
            watched,
            currencies,
            loaded_at: Instant::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use recon_core::types::WalletRecord;
    use recon_store::MemoryLedger;

    fn currency(id: i64) -> Currency {
        Currency {
            id,
            network_id: 1,
            symbol: "USDT".to_string(),
            contract: address!("00000000000000000000000000000000000000c1"),
            decimals: 6,
        }
    }

    fn wallet(user_id: i64, address: Address) -> WalletRecord {
        WalletRecord {
            user_id,
            address,
            private_key: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_refreshes_after_ttl() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.add_currency(currency(1));
        ledger.add_wallet(wallet(1, address!("00000000000000000000000000000000000000a1")));

        let registry = CachedRegistry::new(ledger.clone(), Duration::from_secs(60));
        assert_eq!(registry.snapshot(1).await.unwrap().watched.len(), 1);

        ledger.add_wallet(wallet(2, address!("00000000000000000000000000000000000000a2")));
        assert_eq!(registry.snapshot(1).await.unwrap().watched.len(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        let snapshot = registry.snapshot(1).await.unwrap();
        assert_eq!(snapshot.watched.len(), 2);
        assert_eq!(snapshot.contracts(), vec![currency(1).contract]);
    }

    #[tokio::test]
    async fn test_recipient_filter_limit() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.add_wallet(wallet(1, address!("00000000000000000000000000000000000000a2")));
        ledger.add_wallet(wallet(2, address!("00000000000000000000000000000000000000a1")));
        let registry = CachedRegistry::new(ledger, Duration::from_secs(60));

        let snapshot = registry.snapshot(1).await.unwrap();
        let filter = snapshot.recipient_filter(2).unwrap();
        assert_eq!(filter[0], address!("00000000000000000000000000000000000000a1"));
        assert!(snapshot.recipient_filter(1).is_none());
    }
}
