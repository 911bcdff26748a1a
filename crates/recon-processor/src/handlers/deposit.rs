use recon_core::traits::LedgerStore;
use recon_core::types::{raw_to_decimal, DepositWrite, IngestOutcome, NewDeposit, TransferEvent};
use recon_core::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Credits confirmed inbound transfers to the ledger exactly once.
///
/// Replays of an already-recorded proof (reorg-window rescans, upstream
/// retries) come back as `DuplicateIgnored` with no balance change.
pub struct LedgerIngestHandler {
    ledger: Arc<dyn LedgerStore>,
}

impl LedgerIngestHandler {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    pub async fn ingest(&self, network_id: i64, event: &TransferEvent) -> Result<IngestOutcome> {
        let start = Instant::now();

        let Some(wallet) = self.ledger.resolve_wallet(&event.to).await? else {
            debug!(to = ?event.to, tx_hash = ?event.tx_hash, "Recipient is not a watched wallet");
            return Ok(IngestOutcome::UnresolvedAddress);
        };

        let Some(currency) = self.ledger.resolve_currency(network_id, &event.contract).await? else {
            debug!(
                network_id = network_id,
                contract = ?event.contract,
                tx_hash = ?event.tx_hash,
                "Transfer from an untracked contract"
            );
            return Ok(IngestOutcome::UnresolvedCurrency);
        };

        let Some(amount) = raw_to_decimal(event.value, currency.decimals) else {
            warn!(
                tx_hash = ?event.tx_hash,
                value = %event.value,
                decimals = currency.decimals,
                "Transfer amount does not fit the ledger, rejecting"
            );
            return Ok(IngestOutcome::Rejected);
        };

        let deposit = NewDeposit {
            user_id: wallet.user_id,
            currency_id: currency.id,
            amount,
            proof: event.proof(),
        };

        let store_start = Instant::now();
        let outcome = match self.ledger.apply_deposit(deposit).await? {
            DepositWrite::Applied(entry) => {
                info!(
                    entry_id = entry.id,
                    user_id = entry.user_id,
                    currency = %currency.symbol,
                    amount = %entry.change_amount,
                    block = event.block_number,
                    tx_hash = ?event.tx_hash,
                    "Deposit credited"
                );
                IngestOutcome::Applied { entry_id: entry.id }
            }
            DepositWrite::DuplicateProof => {
                debug!(tx_hash = ?event.tx_hash, block = event.block_number, "Deposit already recorded");
                IngestOutcome::DuplicateIgnored
            }
        };

        debug!(
            store_us = store_start.elapsed().as_micros(),
            total_us = start.elapsed().as_micros(),
            "Deposit handler timing"
        );
        Ok(outcome)
    }
}
