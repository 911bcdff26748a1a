use crate::error::Result;
use crate::types::{
    Currency, DepositWrite, IngestOutcome, JobLease, LedgerEntry, LedgerStatus, NewDeposit,
    Resolution, SettlementAttempt, SettlementJob, TransferEvent, TransferQuery, WalletRecord,
};
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashSet;

/// Block and log access for one network.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn head_block(&self) -> Result<u64>;

    /// Decoded Transfer logs for an inclusive block range.
    async fn transfer_logs(&self, query: &TransferQuery) -> Result<Vec<TransferEvent>>;
}

/// Durable "scanned through block N" marker, keyed by network label.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, network: &str) -> Result<Option<u64>>;
    async fn store(&self, network: &str, block: u64) -> Result<()>;
}

/// Watched wallets and tracked tokens.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    async fn watched_addresses(&self) -> Result<HashSet<Address>>;
    async fn currencies(&self, network_id: i64) -> Result<Vec<Currency>>;
}

/// Consumer of matched transfers.
#[async_trait]
pub trait TransferHandler: Send + Sync {
    async fn handle(&self, network_id: i64, event: &TransferEvent) -> Result<IngestOutcome>;
}

/// Balances and the append-only ledger.
///
/// Every balance mutation happens in the same transaction as the ledger
/// write that explains it.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn resolve_wallet(&self, address: &Address) -> Result<Option<WalletRecord>>;
    async fn wallet_for_user(&self, user_id: i64) -> Result<Option<WalletRecord>>;
    async fn resolve_currency(&self, network_id: i64, contract: &Address)
        -> Result<Option<Currency>>;
    async fn currency(&self, currency_id: i64) -> Result<Option<Currency>>;

    /// Credit a confirmed inbound transfer unless its proof is already recorded.
    async fn apply_deposit(&self, deposit: NewDeposit) -> Result<DepositWrite>;

    /// Debit the balance and open a PENDING withdrawal to `address`.
    async fn create_withdrawal(
        &self,
        user_id: i64,
        currency_id: i64,
        amount: Decimal,
        address: &str,
    ) -> Result<LedgerEntry>;

    /// Open a PENDING payout. The balance moves only when it settles.
    async fn create_payout(&self, user_id: i64, currency_id: i64, amount: Decimal)
        -> Result<LedgerEntry>;

    async fn entry(&self, entry_id: i64) -> Result<Option<LedgerEntry>>;

    /// Persist a signed transfer's hash and raw bytes on a PENDING entry
    /// before it is submitted.
    ///
    /// Idempotent for the same proof. A different proof already on the entry
    /// fails with `ProofConflict`.
    async fn record_proof(&self, entry_id: i64, proof: &str, raw_tx: &str) -> Result<()>;

    /// Bump retry_count and remember the error. Returns the updated entry.
    async fn record_transient_failure(&self, entry_id: i64, error: &str) -> Result<LedgerEntry>;

    /// Move a PENDING entry to a terminal status with its balance effect.
    async fn finalize(&self, entry_id: i64, resolution: Resolution) -> Result<LedgerEntry>;

    async fn balance(&self, user_id: i64, currency_id: i64) -> Result<Decimal>;

    /// PENDING withdrawals and payouts, oldest first.
    async fn pending_outbound(&self) -> Result<Vec<LedgerEntry>>;

    async fn entries_with_status(&self, status: LedgerStatus) -> Result<Vec<LedgerEntry>>;

    /// Entries whose settlement gave up and need an operator.
    async fn entries_for_review(&self) -> Result<Vec<LedgerEntry>> {
        self.entries_with_status(LedgerStatus::Web3Error).await
    }

    async fn record_attempt(&self, attempt: SettlementAttempt) -> Result<()>;
}

/// Durable delayed-job queue with one live job per job id.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Returns false when a job with the same id is already queued or running.
    async fn enqueue_at(&self, job: &SettlementJob, run_at_ms: u64) -> Result<bool>;

    /// Take up to `limit` due jobs and lease them to the caller.
    async fn claim_due(&self, now_ms: u64, limit: usize) -> Result<Vec<JobLease>>;

    /// Extend a held lease. False once the lease is gone or owned by another claim.
    async fn renew(&self, lease: &JobLease) -> Result<bool>;

    /// Requeue `job` under the caller's lease. False if the lease was lost.
    async fn reschedule(&self, lease: &JobLease, job: &SettlementJob, run_at_ms: u64)
        -> Result<bool>;

    /// Release the lease if the caller still holds it.
    async fn complete(&self, lease: &JobLease) -> Result<()>;

    /// Drop a queued job. False if it is not queued (absent or already running).
    async fn cancel(&self, job_id: &str) -> Result<bool>;

    async fn is_running(&self, job_id: &str) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Confirmed,
    Reverted,
    /// Not mined yet, or unknown to the node
    Pending,
}

/// Which key signs an outbound transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferSource {
    Platform,
    Wallet(WalletRecord),
}

/// A transfer signed locally but not necessarily submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransfer {
    pub tx_hash: String,
    /// Encoded transaction in the form the node accepts it
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub currency: Currency,
    pub source: TransferSource,
    pub to: Address,
    pub amount: U256,
}

/// Signs and submits token transfers on one network.
///
/// Signing and submission are separate so the hash can be stored before
/// anything reaches the network. Submitting the same raw bytes twice can
/// only ever land one transaction.
#[async_trait]
pub trait TransferClient: Send + Sync {
    async fn source_balance(&self, source: &TransferSource, currency: &Currency) -> Result<U256>;

    /// Build and sign the transfer. Nothing is sent.
    async fn sign(&self, request: &TransferRequest) -> Result<SignedTransfer>;

    /// Hand signed bytes to the node without waiting for inclusion.
    async fn submit(&self, signed: &SignedTransfer) -> Result<()>;

    async fn receipt(&self, tx_hash: &str) -> Result<ReceiptStatus>;
}
