use async_trait::async_trait;
use recon_core::traits::{LedgerStore, TransferHandler};
use recon_core::types::{IngestOutcome, TransferEvent};
use recon_core::Result;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::handlers::LedgerIngestHandler;

/// Ingest counters since process start
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub total_events_processed: u64,
    pub deposits_applied: u64,
    pub duplicates_ignored: u64,
    pub unresolved_address: u64,
    pub unresolved_currency: u64,
    pub rejected: u64,
    pub failures: u64,
}

impl ProcessorStats {
    fn record(&mut self, outcome: IngestOutcome) {
        self.total_events_processed += 1;
        match outcome {
            IngestOutcome::Applied { .. } => self.deposits_applied += 1,
            IngestOutcome::DuplicateIgnored => self.duplicates_ignored += 1,
            IngestOutcome::UnresolvedAddress => self.unresolved_address += 1,
            IngestOutcome::UnresolvedCurrency => self.unresolved_currency += 1,
            IngestOutcome::Rejected => self.rejected += 1,
        }
    }
}

/// Entry point for decoded transfers coming off the scanners.
pub struct EventProcessor {
    ledger: Arc<dyn LedgerStore>,
    deposits: LedgerIngestHandler,
    stats: RwLock<ProcessorStats>,
}

impl EventProcessor {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self {
            deposits: LedgerIngestHandler::new(Arc::clone(&ledger)),
            ledger,
            stats: RwLock::new(ProcessorStats::default()),
        }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    pub async fn stats(&self) -> ProcessorStats {
        self.stats.read().await.clone()
    }

    /// Process a single transfer
    pub async fn process_transfer(
        &self,
        network_id: i64,
        event: &TransferEvent,
    ) -> Result<IngestOutcome> {
        let process_start = Instant::now();
        let network = network_id.to_string();

        let outcome = match self.deposits.ingest(network_id, event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.stats.write().await.failures += 1;
                recon_metrics::counters::errors(1, "ingest");
                error!(
                    network_id = network_id,
                    block = event.block_number,
                    tx_hash = ?event.tx_hash,
                    error = %e,
                    "Ledger ingest failed"
                );
                return Err(e);
            }
        };

        self.stats.write().await.record(outcome);
        recon_metrics::counters::ingest_outcome(&network, outcome.as_str());

        debug!(
            network_id = network_id,
            block = event.block_number,
            log_index = event.log_index,
            outcome = outcome.as_str(),
            total_us = process_start.elapsed().as_micros(),
            "Processed Transfer"
        );
        Ok(outcome)
    }
}

#[async_trait]
impl TransferHandler for EventProcessor {
    async fn handle(&self, network_id: i64, event: &TransferEvent) -> Result<IngestOutcome> {
        self.process_transfer(network_id, event).await
    }
}
