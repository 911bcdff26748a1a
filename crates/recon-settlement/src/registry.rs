use crate::executor::{Execution, TransferExecutor};
use async_trait::async_trait;
use recon_core::traits::{LedgerStore, TransferClient};
use recon_core::types::{JobKind, SettlementJob};
use recon_core::{ReconError, Result, SettlementConfig};
use std::collections::HashMap;
use std::sync::Arc;

/// Typed handler for one kind of settlement job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn kind(&self) -> JobKind;

    async fn execute(&self, job: &SettlementJob) -> Result<Execution>;
}

/// Transfer clients keyed by network id
#[derive(Default, Clone)]
pub struct TransferClients {
    clients: HashMap<i64, Arc<dyn TransferClient>>,
}

impl TransferClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, network_id: i64, client: Arc<dyn TransferClient>) {
        self.clients.insert(network_id, client);
    }

    pub fn get(&self, network_id: i64) -> Option<Arc<dyn TransferClient>> {
        self.clients.get(&network_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Job kind to handler table, built once at startup.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One `TransferExecutor` per job kind, sharing the ledger and clients.
    pub fn with_transfer_executors(
        ledger: Arc<dyn LedgerStore>,
        clients: Arc<TransferClients>,
        config: &SettlementConfig,
    ) -> Self {
        let mut registry = Self::new();
        for kind in JobKind::ALL {
            registry.register(Arc::new(TransferExecutor::new(
                kind,
                Arc::clone(&ledger),
                Arc::clone(&clients),
                config.clone(),
            )));
        }
        registry
    }

    /// Returns the handler previously registered for the same kind, if any.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) -> Option<Arc<dyn JobHandler>> {
        self.handlers.insert(handler.kind(), handler)
    }

    pub fn resolve(&self, kind: JobKind) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Fail fast when some job kind would have nobody to run it.
    pub fn ensure_complete(&self) -> Result<()> {
        let missing: Vec<&str> = JobKind::ALL
            .iter()
            .filter(|kind| !self.handlers.contains_key(kind))
            .map(|kind| kind.as_str())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ReconError::ConfigParse(format!(
                "No settlement handler registered for: {}",
                missing.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::settlement_config;
    use recon_store::MemoryLedger;

    struct Noop(JobKind);

    #[async_trait]
    impl JobHandler for Noop {
        fn kind(&self) -> JobKind {
            self.0
        }

        async fn execute(&self, _job: &SettlementJob) -> Result<Execution> {
            Ok(Execution::Skipped)
        }
    }

    #[test]
    fn test_registry_resolves_by_kind() {
        let mut registry = HandlerRegistry::new();
        assert!(registry.register(Arc::new(Noop(JobKind::Payout))).is_none());
        assert!(registry.register(Arc::new(Noop(JobKind::Payout))).is_some());

        assert!(registry.resolve(JobKind::Payout).is_some());
        assert!(registry.resolve(JobKind::Withdraw).is_none());

        let err = registry.ensure_complete().unwrap_err();
        assert!(err.to_string().contains("withdraw"));
    }

    #[test]
    fn test_transfer_executors_cover_every_kind() {
        let registry = HandlerRegistry::with_transfer_executors(
            Arc::new(MemoryLedger::new()),
            Arc::new(TransferClients::new()),
            &settlement_config(),
        );
        registry.ensure_complete().unwrap();
        for kind in JobKind::ALL {
            assert_eq!(registry.resolve(kind).map(|h| h.kind()), Some(kind));
        }
    }
}
