use crate::registry::{JobHandler, TransferClients};
use alloy::primitives::U256;
use async_trait::async_trait;
use chrono::Utc;
use recon_core::traits::{
    LedgerStore, ReceiptStatus, SignedTransfer, TransferClient, TransferRequest, TransferSource,
};
use recon_core::types::{
    decimal_to_raw, parse_chain_address, AttemptOutcome, BalanceEffect, JobKind, LedgerEntry,
    LedgerStatus, Resolution, SettlementAttempt, SettlementJob,
};
use recon_core::{ReconError, Result, SettlementConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Receipt checks after a submission before handing over to the retry path
const RECEIPT_POLLS: u32 = 10;
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(3);
const PROOF_WRITE_ATTEMPTS: u32 = 3;
const PROOF_WRITE_DELAY: Duration = Duration::from_millis(200);

pub const MAX_RETRIES_EXCEEDED: &str = "Max retries exceeded";

/// What one execution did to its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// Entry reached a terminal status
    Settled(LedgerStatus),
    /// Transient failure; run again with this retry count
    Retry { retry_count: u32 },
    /// Entry missing, already terminal, or its transfer owned by another attempt
    Skipped,
}

/// Result of driving the chain side of one attempt
#[derive(Debug)]
enum Step {
    Confirmed { tx_hash: String },
    Reverted { tx_hash: String },
    InsufficientFunds { available: U256, requested: U256 },
    Canceled(String),
    Transient { error: String, tx_hash: Option<String> },
    /// Another attempt stored a different signed transfer first
    Superseded { existing: String },
}

enum Prepared {
    Ready(Arc<dyn TransferClient>, TransferRequest),
    Cancel(String),
}

/// Settles PENDING withdrawals or payouts with exactly-once economic effect.
///
/// A transfer is signed locally and its hash and raw bytes are stored as the
/// entry's proof before anything is submitted. From then on the entry only
/// ever resubmits those same bytes or checks their receipt, so a crash, a
/// timeout or an ambiguous node reply can never produce a second transfer.
pub struct TransferExecutor {
    kind: JobKind,
    ledger: Arc<dyn LedgerStore>,
    clients: Arc<TransferClients>,
    config: SettlementConfig,
    receipt_polls: u32,
    receipt_poll_interval: Duration,
}

impl TransferExecutor {
    pub fn new(
        kind: JobKind,
        ledger: Arc<dyn LedgerStore>,
        clients: Arc<TransferClients>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            kind,
            ledger,
            clients,
            config,
            receipt_polls: RECEIPT_POLLS,
            receipt_poll_interval: RECEIPT_POLL_INTERVAL,
        }
    }

    pub fn with_receipt_polling(mut self, polls: u32, interval: Duration) -> Self {
        self.receipt_polls = polls.max(1);
        self.receipt_poll_interval = interval;
        self
    }

    /// Run one attempt for the job's entry.
    pub async fn run(&self, job: &SettlementJob) -> Result<Execution> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let job_id = job.job_id();

        let entry = match self.ledger.entry(job.entry_id).await? {
            Some(entry) if entry.status == LedgerStatus::Pending => entry,
            Some(entry) => {
                debug!(job_id = %job_id, status = %entry.status, "Entry already settled, skipping");
                return Ok(Execution::Skipped);
            }
            None => {
                warn!(job_id = %job_id, entry_id = job.entry_id, "Entry not found, skipping");
                return Ok(Execution::Skipped);
            }
        };

        let step = self.settle(&entry).await;
        let tx_hash = match &step {
            Step::Confirmed { tx_hash } | Step::Reverted { tx_hash } => Some(tx_hash.clone()),
            Step::Transient { tx_hash, .. } => tx_hash.clone(),
            Step::Superseded { existing } => Some(existing.clone()),
            _ => entry.proof.clone(),
        };
        let error = step_error(&step);

        let execution = self.conclude(&entry, step).await?;
        let outcome = match execution {
            Execution::Settled(LedgerStatus::Success) => AttemptOutcome::Success,
            Execution::Settled(_) => AttemptOutcome::Failed,
            Execution::Retry { .. } => AttemptOutcome::Retry,
            Execution::Skipped => AttemptOutcome::Skipped,
        };

        let attempt = SettlementAttempt {
            entry_id: entry.id,
            job_id: job_id.clone(),
            attempt: job.retry_count + 1,
            outcome,
            error,
            tx_hash,
            started_at,
            finished_at: Utc::now(),
        };
        if let Err(e) = self.ledger.record_attempt(attempt).await {
            warn!(job_id = %job_id, error = %e, "Failed to record settlement attempt");
        }

        recon_metrics::histograms::settlement_duration(self.kind.as_str(), timer.elapsed());
        debug!(
            job_id = %job_id,
            outcome = outcome.as_str(),
            duration_ms = timer.elapsed().as_millis() as u64,
            "Settlement attempt finished"
        );
        Ok(execution)
    }

    async fn settle(&self, entry: &LedgerEntry) -> Step {
        if let Some(tx_hash) = &entry.proof {
            debug!(entry_id = entry.id, tx_hash = %tx_hash, "Proof already recorded, checking receipt");
            return self.resume(entry, tx_hash).await;
        }

        let (client, request) = match self.prepare(entry).await {
            Ok(Prepared::Ready(client, request)) => (client, request),
            Ok(Prepared::Cancel(reason)) => return Step::Canceled(reason),
            Err(e) => {
                return Step::Transient {
                    error: e.to_string(),
                    tx_hash: None,
                }
            }
        };

        match client.source_balance(&request.source, &request.currency).await {
            Ok(available) if available < request.amount => {
                return Step::InsufficientFunds {
                    available,
                    requested: request.amount,
                }
            }
            Ok(_) => {}
            Err(e) => return client_failure(e),
        }

        let signed = match client.sign(&request).await {
            Ok(signed) => signed,
            Err(e) => return client_failure(e),
        };

        // Nothing has left the process yet, so any failure here is safe to retry
        match self.persist_proof(entry.id, &signed).await {
            Ok(()) => {}
            Err(ReconError::ProofConflict { existing, .. }) => return Step::Superseded { existing },
            Err(e) => {
                return Step::Transient {
                    error: format!("Proof not stored, transfer not sent: {}", e),
                    tx_hash: None,
                }
            }
        }

        if let Err(e) = client.submit(&signed).await {
            warn!(
                entry_id = entry.id,
                tx_hash = %signed.tx_hash,
                error = %e,
                "Submission failed, the receipt check decides"
            );
            return Step::Transient {
                error: e.to_string(),
                tx_hash: Some(signed.tx_hash),
            };
        }
        info!(
            entry_id = entry.id,
            kind = self.kind.as_str(),
            tx_hash = %signed.tx_hash,
            to = %request.to,
            amount = %request.amount,
            "Transfer submitted"
        );

        self.await_receipt(client.as_ref(), &signed.tx_hash).await
    }

    /// Continue a transfer whose proof is already stored.
    ///
    /// Preconditions are not re-checked: the transaction exists and only its
    /// receipt decides the outcome.
    async fn resume(&self, entry: &LedgerEntry, tx_hash: &str) -> Step {
        let client = match self.client_for(entry).await {
            Ok(Some(client)) => client,
            Ok(None) => {
                return Step::Transient {
                    error: format!("No transfer client to check {}", tx_hash),
                    tx_hash: Some(tx_hash.to_string()),
                }
            }
            Err(e) => {
                return Step::Transient {
                    error: e.to_string(),
                    tx_hash: Some(tx_hash.to_string()),
                }
            }
        };

        match client.receipt(tx_hash).await {
            Ok(ReceiptStatus::Pending) => {}
            other => return receipt_step(tx_hash, other),
        }

        // Unknown to the node: hand it the same signed bytes again
        let Some(raw) = entry.args.raw_tx.clone() else {
            return Step::Transient {
                error: format!("Receipt for {} not available yet", tx_hash),
                tx_hash: Some(tx_hash.to_string()),
            };
        };
        let signed = SignedTransfer {
            tx_hash: tx_hash.to_string(),
            raw,
        };
        match client.submit(&signed).await {
            Ok(()) => {
                debug!(entry_id = entry.id, tx_hash = %tx_hash, "Resubmitted signed transfer");
                self.await_receipt(client.as_ref(), tx_hash).await
            }
            Err(e) => Step::Transient {
                error: format!("Resubmission of {} failed: {}", tx_hash, e),
                tx_hash: Some(tx_hash.to_string()),
            },
        }
    }

    async fn client_for(&self, entry: &LedgerEntry) -> Result<Option<Arc<dyn TransferClient>>> {
        Ok(self
            .ledger
            .currency(entry.currency_id)
            .await?
            .and_then(|currency| self.clients.get(currency.network_id)))
    }

    /// Resolve everything a transfer needs. Missing pieces cancel the entry.
    async fn prepare(&self, entry: &LedgerEntry) -> Result<Prepared> {
        if JobKind::for_change_type(entry.change_type) != Some(self.kind) {
            return Ok(Prepared::Cancel(format!(
                "Entry is a {} entry, not {}",
                entry.change_type,
                self.kind.as_str()
            )));
        }

        let Some(currency) = self.ledger.currency(entry.currency_id).await? else {
            return Ok(Prepared::Cancel(format!("Unknown currency {}", entry.currency_id)));
        };
        let Some(client) = self.clients.get(currency.network_id) else {
            return Ok(Prepared::Cancel(format!(
                "No transfer client for network {}",
                currency.network_id
            )));
        };
        let Some(wallet) = self.ledger.wallet_for_user(entry.user_id).await? else {
            return Ok(Prepared::Cancel(format!("User {} has no wallet", entry.user_id)));
        };

        let amount = match decimal_to_raw(entry.amount(), currency.decimals) {
            Some(amount) if !amount.is_zero() => amount,
            _ => {
                return Ok(Prepared::Cancel(format!(
                    "Amount {} is not transferable with {} decimals",
                    entry.amount(),
                    currency.decimals
                )))
            }
        };

        let (source, to) = match self.kind {
            JobKind::Withdraw => {
                let Some(address) = entry.args.address.as_deref() else {
                    return Ok(Prepared::Cancel("Withdrawal has no destination address".to_string()));
                };
                let Some(to) = parse_chain_address(address) else {
                    return Ok(Prepared::Cancel(format!("Invalid destination address {}", address)));
                };
                if wallet.private_key.is_none() {
                    return Ok(Prepared::Cancel(format!(
                        "Wallet {} has no signing key",
                        wallet.address
                    )));
                }
                (TransferSource::Wallet(wallet), to)
            }
            JobKind::Payout => (TransferSource::Platform, wallet.address),
        };

        Ok(Prepared::Ready(
            client,
            TransferRequest {
                currency,
                source,
                to,
                amount,
            },
        ))
    }

    async fn check_receipt(&self, client: &dyn TransferClient, tx_hash: &str) -> Step {
        receipt_step(tx_hash, client.receipt(tx_hash).await)
    }

    async fn await_receipt(&self, client: &dyn TransferClient, tx_hash: &str) -> Step {
        let mut last = None;
        for poll in 0..self.receipt_polls {
            if poll > 0 {
                tokio::time::sleep(self.receipt_poll_interval).await;
            }
            match self.check_receipt(client, tx_hash).await {
                step @ Step::Transient { .. } => last = Some(step),
                settled => return settled,
            }
        }
        last.unwrap_or_else(|| Step::Transient {
            error: format!("Receipt for {} not available yet", tx_hash),
            tx_hash: Some(tx_hash.to_string()),
        })
    }

    async fn persist_proof(&self, entry_id: i64, signed: &SignedTransfer) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self
                .ledger
                .record_proof(entry_id, &signed.tx_hash, &signed.raw)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < PROOF_WRITE_ATTEMPTS => {
                    warn!(entry_id, tx_hash = %signed.tx_hash, attempt, error = %e, "Proof write failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(PROOF_WRITE_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn conclude(&self, entry: &LedgerEntry, step: Step) -> Result<Execution> {
        let kind = self.kind.as_str();
        let refund = if entry.change_type.is_debit() {
            BalanceEffect::Refund
        } else {
            BalanceEffect::None
        };

        let resolution = match step {
            Step::Confirmed { tx_hash } => {
                info!(entry_id = entry.id, kind, tx_hash = %tx_hash, "Settlement confirmed");
                let effect = if entry.change_type.is_debit() {
                    BalanceEffect::None
                } else {
                    BalanceEffect::Credit
                };
                Resolution::success(effect)
            }
            Step::Reverted { tx_hash } => {
                error!(entry_id = entry.id, kind, tx_hash = %tx_hash, "Transfer reverted on chain, flagged for review");
                recon_metrics::counters::flagged_for_review(kind);
                Resolution::failed(
                    LedgerStatus::Web3Error,
                    refund,
                    format!("Transaction {} reverted", tx_hash),
                )
            }
            Step::InsufficientFunds {
                available,
                requested,
            } => {
                warn!(entry_id = entry.id, kind, %available, %requested, "Source wallet cannot cover transfer");
                Resolution::failed(
                    LedgerStatus::InsufficientFunds,
                    refund,
                    format!("Source balance {} below {}", available, requested),
                )
            }
            Step::Canceled(reason) => {
                warn!(entry_id = entry.id, kind, reason = %reason, "Settlement canceled");
                Resolution::failed(LedgerStatus::Canceled, BalanceEffect::None, reason)
            }
            Step::Superseded { existing } => {
                warn!(entry_id = entry.id, kind, existing = %existing, "Another attempt owns this transfer, discarding ours");
                return Ok(Execution::Skipped);
            }
            Step::Transient { error, .. } => {
                let updated = match self.ledger.record_transient_failure(entry.id, &error).await {
                    Ok(updated) => updated,
                    Err(ReconError::InvalidTransition { .. }) => return Ok(Execution::Skipped),
                    Err(e) => return Err(e),
                };
                if updated.retry_count <= self.config.max_retries {
                    warn!(
                        entry_id = entry.id,
                        kind,
                        retry_count = updated.retry_count,
                        max_retries = self.config.max_retries,
                        error = %error,
                        "Settlement attempt failed, will retry"
                    );
                    return Ok(Execution::Retry {
                        retry_count: updated.retry_count,
                    });
                }
                error!(
                    entry_id = entry.id,
                    kind,
                    retry_count = updated.retry_count,
                    error = %error,
                    "Settlement retries exhausted, flagged for review"
                );
                recon_metrics::counters::flagged_for_review(kind);
                Resolution::failed(LedgerStatus::Web3Error, refund, MAX_RETRIES_EXCEEDED)
            }
        };

        let status = resolution.status;
        match self.ledger.finalize(entry.id, resolution).await {
            Ok(_) => {
                recon_metrics::counters::settlement_outcome(kind, status.as_str());
                Ok(Execution::Settled(status))
            }
            Err(ReconError::InvalidTransition { from, .. }) => {
                warn!(entry_id = entry.id, kind, from = %from, "Entry settled concurrently");
                Ok(Execution::Skipped)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl JobHandler for TransferExecutor {
    fn kind(&self) -> JobKind {
        self.kind
    }

    async fn execute(&self, job: &SettlementJob) -> Result<Execution> {
        self.run(job).await
    }
}

/// Permanent client errors cancel the entry; everything else is retried.
fn client_failure(e: ReconError) -> Step {
    match e {
        ReconError::PermanentData(reason) => Step::Canceled(reason),
        other => Step::Transient {
            error: other.to_string(),
            tx_hash: None,
        },
    }
}

fn receipt_step(tx_hash: &str, receipt: Result<ReceiptStatus>) -> Step {
    match receipt {
        Ok(ReceiptStatus::Confirmed) => Step::Confirmed {
            tx_hash: tx_hash.to_string(),
        },
        Ok(ReceiptStatus::Reverted) => Step::Reverted {
            tx_hash: tx_hash.to_string(),
        },
        Ok(ReceiptStatus::Pending) => Step::Transient {
            error: format!("Receipt for {} not available yet", tx_hash),
            tx_hash: Some(tx_hash.to_string()),
        },
        Err(e) => Step::Transient {
            error: e.to_string(),
            tx_hash: Some(tx_hash.to_string()),
        },
    }
}

fn step_error(step: &Step) -> Option<String> {
    match step {
        Step::Confirmed { .. } => None,
        Step::Reverted { tx_hash } => Some(format!("Transaction {} reverted", tx_hash)),
        Step::InsufficientFunds {
            available,
            requested,
        } => Some(format!("Source balance {} below {}", available, requested)),
        Step::Canceled(reason) => Some(reason.clone()),
        Step::Transient { error, .. } => Some(error.clone()),
        Step::Superseded { existing } => Some(format!("Superseded by {}", existing)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use alloy::primitives::Address;
    use recon_core::types::{ChangeType, Currency};
    use recon_store::MemoryLedger;
    use rust_decimal_macros::dec;

    fn executor(
        kind: JobKind,
        ledger: &Arc<MemoryLedger>,
        client: &Arc<ScriptedClient>,
    ) -> TransferExecutor {
        let mut clients = TransferClients::new();
        clients.insert(NETWORK_ID, client.clone());
        TransferExecutor::new(kind, ledger.clone(), Arc::new(clients), settlement_config())
            .with_receipt_polling(2, Duration::from_millis(1))
    }

    fn refunds(ledger: &MemoryLedger, entry_id: i64) -> usize {
        ledger
            .entries()
            .iter()
            .filter(|e| e.change_type == ChangeType::Refund && e.args.refund_of == Some(entry_id))
            .count()
    }

    #[tokio::test]
    async fn test_withdrawal_settles_without_touching_balance() {
        let ledger = ledger(dec!(10));
        let client = Arc::new(ScriptedClient::new(100_000_000));
        let entry = ledger
            .create_withdrawal(USER_ID, CURRENCY_ID, dec!(4), DESTINATION)
            .await
            .unwrap();

        let job = SettlementJob::new(JobKind::Withdraw, entry.id);
        let result = executor(JobKind::Withdraw, &ledger, &client).run(&job).await.unwrap();
        assert_eq!(result, Execution::Settled(LedgerStatus::Success));

        let settled = ledger.entry(entry.id).await.unwrap().unwrap();
        assert_eq!(settled.status, LedgerStatus::Success);
        assert!(settled.proof.is_some());
        assert_eq!(ledger.balance(USER_ID, CURRENCY_ID).await.unwrap(), dec!(6));

        let sent = client.signed();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].amount, U256::from(4_000_000u64));
        assert_eq!(sent[0].to, DESTINATION.parse::<Address>().unwrap());
        assert!(matches!(&sent[0].source, TransferSource::Wallet(w) if w.address == USER_WALLET));

        let attempts = ledger.attempts();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].outcome, AttemptOutcome::Success);
        assert_eq!(attempts[0].tx_hash, settled.proof);
    }

    #[tokio::test]
    async fn test_payout_credits_once() {
        let ledger = ledger(dec!(0));
        let client = Arc::new(ScriptedClient::new(100_000_000));
        let entry = ledger.create_payout(USER_ID, CURRENCY_ID, dec!(2.5)).await.unwrap();
        let executor = executor(JobKind::Payout, &ledger, &client);
        let job = SettlementJob::new(JobKind::Payout, entry.id);

        assert_eq!(
            executor.run(&job).await.unwrap(),
            Execution::Settled(LedgerStatus::Success)
        );
        // Redelivered job finds a terminal entry
        assert_eq!(executor.run(&job).await.unwrap(), Execution::Skipped);

        assert_eq!(ledger.balance(USER_ID, CURRENCY_ID).await.unwrap(), dec!(2.5));
        let sent = client.signed();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].source, TransferSource::Platform);
        assert_eq!(sent[0].to, USER_WALLET);
    }

    #[tokio::test]
    async fn test_crash_after_submission_resumes_from_receipt() {
        let ledger = ledger(dec!(0));
        let client = Arc::new(ScriptedClient::new(100_000_000));
        let entry = ledger.create_payout(USER_ID, CURRENCY_ID, dec!(1)).await.unwrap();

        // Previous process broadcast and stored the proof, then died
        let tx_hash = format!("0x{}", "ab".repeat(32));
        ledger.record_proof(entry.id, &tx_hash, "0x02f8ab").await.unwrap();
        client.set_receipt(&tx_hash, ReceiptStatus::Confirmed);

        let job = SettlementJob::new(JobKind::Payout, entry.id).with_retry(1);
        let result = executor(JobKind::Payout, &ledger, &client).run(&job).await.unwrap();

        assert_eq!(result, Execution::Settled(LedgerStatus::Success));
        assert!(client.signed().is_empty());
        assert!(client.submissions().is_empty());
        assert_eq!(ledger.balance(USER_ID, CURRENCY_ID).await.unwrap(), dec!(1));
        let settled = ledger.entry(entry.id).await.unwrap().unwrap();
        assert_eq!(settled.proof.as_deref(), Some(tx_hash.as_str()));
        assert_eq!(ledger.attempts()[0].attempt, 2);
    }

    #[tokio::test]
    async fn test_unmined_proof_retries_without_signing_again() {
        let ledger = ledger(dec!(10));
        let client = Arc::new(ScriptedClient::new(100_000_000));
        client.mine_as(ReceiptStatus::Pending);
        let entry = ledger
            .create_withdrawal(USER_ID, CURRENCY_ID, dec!(4), DESTINATION)
            .await
            .unwrap();
        let executor = executor(JobKind::Withdraw, &ledger, &client);
        let job = SettlementJob::new(JobKind::Withdraw, entry.id);

        assert_eq!(executor.run(&job).await.unwrap(), Execution::Retry { retry_count: 1 });
        let pending = ledger.entry(entry.id).await.unwrap().unwrap();
        let proof = pending.proof.clone().unwrap();
        assert_eq!(pending.status, LedgerStatus::Pending);
        assert_eq!(pending.args.web3.len(), 1);

        client.set_receipt(&proof, ReceiptStatus::Confirmed);
        let result = executor.run(&job.with_retry(1)).await.unwrap();
        assert_eq!(result, Execution::Settled(LedgerStatus::Success));
        assert_eq!(client.signed().len(), 1);
        assert_eq!(client.submissions().len(), 1);
        assert_eq!(ledger.balance(USER_ID, CURRENCY_ID).await.unwrap(), dec!(6));
    }

    #[tokio::test]
    async fn test_ambiguous_submission_settles_once() {
        let ledger = ledger(dec!(10));
        let client = Arc::new(ScriptedClient::new(100_000_000));
        let entry = ledger
            .create_withdrawal(USER_ID, CURRENCY_ID, dec!(4), DESTINATION)
            .await
            .unwrap();
        let executor = executor(JobKind::Withdraw, &ledger, &client);
        let job = SettlementJob::new(JobKind::Withdraw, entry.id);

        // Node takes the transfer but the reply times out
        client.submit_as(SubmitMode::LandedButFailed);
        assert_eq!(executor.run(&job).await.unwrap(), Execution::Retry { retry_count: 1 });
        let pending = ledger.entry(entry.id).await.unwrap().unwrap();
        assert!(pending.proof.is_some());
        assert!(pending.args.raw_tx.is_some());

        client.submit_as(SubmitMode::Accept);
        let result = executor.run(&job.with_retry(1)).await.unwrap();
        assert_eq!(result, Execution::Settled(LedgerStatus::Success));

        assert_eq!(client.signed().len(), 1);
        assert_eq!(client.landed(), 1);
        assert_eq!(ledger.balance(USER_ID, CURRENCY_ID).await.unwrap(), dec!(6));
        let attempts = ledger.attempts();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].tx_hash, attempts[1].tx_hash);
    }

    #[tokio::test]
    async fn test_lost_submission_resends_the_same_bytes() {
        let ledger = ledger(dec!(0));
        let client = Arc::new(ScriptedClient::new(100_000_000));
        let entry = ledger.create_payout(USER_ID, CURRENCY_ID, dec!(1)).await.unwrap();
        let executor = executor(JobKind::Payout, &ledger, &client);
        let job = SettlementJob::new(JobKind::Payout, entry.id);

        client.submit_as(SubmitMode::Lost);
        assert_eq!(executor.run(&job).await.unwrap(), Execution::Retry { retry_count: 1 });
        assert_eq!(client.landed(), 0);

        client.submit_as(SubmitMode::Accept);
        let result = executor.run(&job.with_retry(1)).await.unwrap();
        assert_eq!(result, Execution::Settled(LedgerStatus::Success));

        let submissions = client.submissions();
        assert_eq!(submissions.len(), 2);
        assert_eq!(submissions[0], submissions[1]);
        assert_eq!(client.signed().len(), 1);
        assert_eq!(ledger.balance(USER_ID, CURRENCY_ID).await.unwrap(), dec!(1));
    }

    #[tokio::test]
    async fn test_receipt_errors_retry_without_resubmitting() {
        let ledger = ledger(dec!(0));
        let client = Arc::new(ScriptedClient::new(100_000_000));
        let entry = ledger.create_payout(USER_ID, CURRENCY_ID, dec!(1)).await.unwrap();
        ledger.record_proof(entry.id, "0xabc", "0x02f8").await.unwrap();
        client.fail_receipts(true);

        let job = SettlementJob::new(JobKind::Payout, entry.id);
        let result = executor(JobKind::Payout, &ledger, &client).run(&job).await.unwrap();

        assert_eq!(result, Execution::Retry { retry_count: 1 });
        assert!(client.submissions().is_empty());
        assert_eq!(ledger.attempts()[0].tx_hash.as_deref(), Some("0xabc"));
    }

    #[tokio::test]
    async fn test_stored_proof_is_checked_before_preconditions() {
        let ledger = ledger(dec!(0));
        let client = Arc::new(ScriptedClient::new(100_000_000));

        // User has no wallet any more, but the transfer already went out
        let orphan = ledger.create_payout(99, CURRENCY_ID, dec!(1)).await.unwrap();
        ledger.record_proof(orphan.id, "0xaaa", "0x02f8aa").await.unwrap();
        client.set_receipt("0xaaa", ReceiptStatus::Confirmed);
        let result = executor(JobKind::Payout, &ledger, &client)
            .run(&SettlementJob::new(JobKind::Payout, orphan.id))
            .await
            .unwrap();
        assert_eq!(result, Execution::Settled(LedgerStatus::Success));
        assert_eq!(ledger.balance(99, CURRENCY_ID).await.unwrap(), dec!(1));

        // Without a client the receipt cannot be read, which is retried, not canceled
        let payout = ledger.create_payout(USER_ID, CURRENCY_ID, dec!(1)).await.unwrap();
        ledger.record_proof(payout.id, "0xbbb", "0x02f8bb").await.unwrap();
        let no_clients = TransferExecutor::new(
            JobKind::Payout,
            ledger.clone(),
            Arc::new(TransferClients::new()),
            settlement_config(),
        );
        let result = no_clients
            .run(&SettlementJob::new(JobKind::Payout, payout.id))
            .await
            .unwrap();
        assert_eq!(result, Execution::Retry { retry_count: 1 });
        assert!(client.signed().is_empty());
    }

    /// Stores a competing proof between signing and persisting.
    struct RacingClient {
        inner: Arc<ScriptedClient>,
        ledger: Arc<MemoryLedger>,
        entry_id: i64,
    }

    #[async_trait]
    impl TransferClient for RacingClient {
        async fn source_balance(&self, source: &TransferSource, currency: &Currency) -> Result<U256> {
            self.inner.source_balance(source, currency).await
        }

        async fn sign(&self, request: &TransferRequest) -> Result<SignedTransfer> {
            let signed = self.inner.sign(request).await?;
            self.ledger.record_proof(self.entry_id, "0xfeed", "0x02f8fe").await?;
            Ok(signed)
        }

        async fn submit(&self, signed: &SignedTransfer) -> Result<()> {
            self.inner.submit(signed).await
        }

        async fn receipt(&self, tx_hash: &str) -> Result<ReceiptStatus> {
            self.inner.receipt(tx_hash).await
        }
    }

    #[tokio::test]
    async fn test_losing_attempt_never_submits() {
        let ledger = ledger(dec!(10));
        let inner = Arc::new(ScriptedClient::new(100_000_000));
        let entry = ledger
            .create_withdrawal(USER_ID, CURRENCY_ID, dec!(4), DESTINATION)
            .await
            .unwrap();
        let mut clients = TransferClients::new();
        clients.insert(
            NETWORK_ID,
            Arc::new(RacingClient {
                inner: inner.clone(),
                ledger: ledger.clone(),
                entry_id: entry.id,
            }),
        );
        let executor = TransferExecutor::new(
            JobKind::Withdraw,
            ledger.clone(),
            Arc::new(clients),
            settlement_config(),
        );

        let result = executor
            .run(&SettlementJob::new(JobKind::Withdraw, entry.id))
            .await
            .unwrap();
        assert_eq!(result, Execution::Skipped);
        assert!(inner.submissions().is_empty());

        let still = ledger.entry(entry.id).await.unwrap().unwrap();
        assert_eq!(still.status, LedgerStatus::Pending);
        assert_eq!(still.proof.as_deref(), Some("0xfeed"));
        assert_eq!(still.retry_count, 0);
    }

    #[tokio::test]
    async fn test_insufficient_source_funds_refunds_withdrawal() {
        let ledger = ledger(dec!(10));
        let client = Arc::new(ScriptedClient::new(1));
        let entry = ledger
            .create_withdrawal(USER_ID, CURRENCY_ID, dec!(4), DESTINATION)
            .await
            .unwrap();

        let job = SettlementJob::new(JobKind::Withdraw, entry.id);
        let result = executor(JobKind::Withdraw, &ledger, &client).run(&job).await.unwrap();

        assert_eq!(result, Execution::Settled(LedgerStatus::InsufficientFunds));
        assert!(client.signed().is_empty());
        assert_eq!(ledger.balance(USER_ID, CURRENCY_ID).await.unwrap(), dec!(10));
        assert_eq!(refunds(&ledger, entry.id), 1);
    }

    #[tokio::test]
    async fn test_reverted_transfer_is_terminal() {
        let ledger = ledger(dec!(10));
        let client = Arc::new(ScriptedClient::new(100_000_000));
        client.mine_as(ReceiptStatus::Reverted);
        let entry = ledger
            .create_withdrawal(USER_ID, CURRENCY_ID, dec!(4), DESTINATION)
            .await
            .unwrap();

        let job = SettlementJob::new(JobKind::Withdraw, entry.id);
        let result = executor(JobKind::Withdraw, &ledger, &client).run(&job).await.unwrap();

        assert_eq!(result, Execution::Settled(LedgerStatus::Web3Error));
        assert_eq!(ledger.balance(USER_ID, CURRENCY_ID).await.unwrap(), dec!(10));
        assert_eq!(refunds(&ledger, entry.id), 1);
        assert_eq!(ledger.entries_for_review().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_preconditions_cancel_without_balance_effect() {
        let ledger = ledger(dec!(10));
        let client = Arc::new(ScriptedClient::new(100_000_000));
        let entry = ledger
            .create_withdrawal(USER_ID, CURRENCY_ID, dec!(4), "not-an-address")
            .await
            .unwrap();

        let job = SettlementJob::new(JobKind::Withdraw, entry.id);
        let result = executor(JobKind::Withdraw, &ledger, &client).run(&job).await.unwrap();

        assert_eq!(result, Execution::Settled(LedgerStatus::Canceled));
        let canceled = ledger.entry(entry.id).await.unwrap().unwrap();
        assert!(canceled.args.error.unwrap().contains("not-an-address"));
        assert_eq!(ledger.balance(USER_ID, CURRENCY_ID).await.unwrap(), dec!(6));
        assert_eq!(refunds(&ledger, entry.id), 0);
        assert!(client.signed().is_empty());
    }

    #[tokio::test]
    async fn test_payout_without_wallet_or_client_is_canceled() {
        let ledger = ledger(dec!(0));
        let client = Arc::new(ScriptedClient::new(100_000_000));
        let orphan = ledger.create_payout(99, CURRENCY_ID, dec!(1)).await.unwrap();
        let executor_with_client = executor(JobKind::Payout, &ledger, &client);
        assert_eq!(
            executor_with_client
                .run(&SettlementJob::new(JobKind::Payout, orphan.id))
                .await
                .unwrap(),
            Execution::Settled(LedgerStatus::Canceled)
        );

        let entry = ledger.create_payout(USER_ID, CURRENCY_ID, dec!(1)).await.unwrap();
        let no_clients = TransferExecutor::new(
            JobKind::Payout,
            ledger.clone(),
            Arc::new(TransferClients::new()),
            settlement_config(),
        );
        assert_eq!(
            no_clients
                .run(&SettlementJob::new(JobKind::Payout, entry.id))
                .await
                .unwrap(),
            Execution::Settled(LedgerStatus::Canceled)
        );
        assert!(client.signed().is_empty());
        assert_eq!(ledger.balance(USER_ID, CURRENCY_ID).await.unwrap(), dec!(0));
    }

    #[tokio::test]
    async fn test_missing_entry_is_skipped() {
        let ledger = ledger(dec!(0));
        let client = Arc::new(ScriptedClient::new(0));
        let job = SettlementJob::new(JobKind::Withdraw, 404);
        let result = executor(JobKind::Withdraw, &ledger, &client).run(&job).await.unwrap();
        assert_eq!(result, Execution::Skipped);
        assert!(ledger.attempts().is_empty());
    }
}
