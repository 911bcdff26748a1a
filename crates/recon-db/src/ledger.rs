use crate::models::DbLedgerEntry;
use crate::repositories::{
    AttemptRepository, BalanceRepository, LedgerRepository, NetworkRepository, WalletRepository,
};
use crate::DatabaseError;
use alloy_primitives::Address;
use async_trait::async_trait;
use chrono::Utc;
use recon_core::error::{ReconError, Result};
use recon_core::traits::{LedgerStore, RegistrySource};
use recon_core::types::{
    parse_chain_address, BalanceEffect, ChangeType, Currency, DepositWrite, EntryArgs,
    LedgerEntry, LedgerStatus, NewDeposit, Resolution, SettlementAttempt, WalletRecord,
};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Postgres-backed ledger. Each write runs in its own transaction with the
/// touched balance row locked `FOR UPDATE`.
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

fn draft(
    user_id: i64,
    currency_id: i64,
    balance_id: i64,
    change_amount: Decimal,
    change_type: ChangeType,
    status: LedgerStatus,
) -> LedgerEntry {
    let now = Utc::now();
    LedgerEntry {
        id: 0,
        user_id,
        currency_id,
        balance_id,
        change_amount,
        change_type,
        status,
        proof: None,
        retry_count: 0,
        previous_balance: None,
        new_balance: None,
        args: EntryArgs::default(),
        created_at: now,
        updated_at: now,
    }
}

fn convert(rows: Vec<DbLedgerEntry>) -> Result<Vec<LedgerEntry>> {
    rows.into_iter()
        .map(|r| LedgerEntry::try_from(r).map_err(ReconError::from))
        .collect()
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lock a PENDING entry that may move to `next`.
    async fn lock_pending(
        conn: &mut PgConnection,
        entry_id: i64,
        next: LedgerStatus,
    ) -> Result<LedgerEntry> {
        let row = LedgerRepository::lock(conn, entry_id)
            .await?
            .ok_or(ReconError::EntryNotFound(entry_id))?;
        let entry = LedgerEntry::try_from(row)?;
        if !entry.status.can_transition_to(next) {
            return Err(ReconError::InvalidTransition {
                id: entry_id,
                from: entry.status.to_string(),
                to: next.to_string(),
            });
        }
        Ok(entry)
    }
}

#[async_trait]
impl RegistrySource for PgLedger {
    async fn watched_addresses(&self) -> Result<HashSet<Address>> {
        let raw = WalletRepository::all_addresses(&self.pool).await?;
        let mut watched = HashSet::with_capacity(raw.len());
        for address in raw {
            match parse_chain_address(&address) {
                Some(parsed) => {
                    watched.insert(parsed);
                }
                None => warn!(address = %address, "Skipping malformed wallet address"),
            }
        }
        Ok(watched)
    }

    async fn currencies(&self, network_id: i64) -> Result<Vec<Currency>> {
        NetworkRepository::currencies_for_network(&self.pool, network_id)
            .await?
            .into_iter()
            .map(|r| Currency::try_from(r).map_err(ReconError::from))
            .collect()
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn resolve_wallet(&self, address: &Address) -> Result<Option<WalletRecord>> {
        WalletRepository::by_address(&self.pool, address)
            .await?
            .map(|w| WalletRecord::try_from(w).map_err(ReconError::from))
            .transpose()
    }

    async fn wallet_for_user(&self, user_id: i64) -> Result<Option<WalletRecord>> {
        WalletRepository::by_user(&self.pool, user_id)
            .await?
            .map(|w| WalletRecord::try_from(w).map_err(ReconError::from))
            .transpose()
    }

    async fn resolve_currency(
        &self,
        network_id: i64,
        contract: &Address,
    ) -> Result<Option<Currency>> {
        NetworkRepository::currency_by_contract(&self.pool, network_id, contract)
            .await?
            .map(|c| Currency::try_from(c).map_err(ReconError::from))
            .transpose()
    }

    async fn currency(&self, currency_id: i64) -> Result<Option<Currency>> {
        NetworkRepository::currency_by_id(&self.pool, currency_id)
            .await?
            .map(|c| Currency::try_from(c).map_err(ReconError::from))
            .transpose()
    }

    async fn apply_deposit(&self, deposit: NewDeposit) -> Result<DepositWrite> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;

        if LedgerRepository::id_by_proof(&mut tx, &deposit.proof).await?.is_some() {
            return Ok(DepositWrite::DuplicateProof);
        }

        let balance = BalanceRepository::lock(&mut tx, deposit.user_id, deposit.currency_id).await?;
        let new_amount = balance.amount + deposit.amount;

        let mut entry = draft(
            deposit.user_id,
            deposit.currency_id,
            balance.id,
            deposit.amount,
            ChangeType::Deposit,
            LedgerStatus::Success,
        );
        entry.proof = Some(deposit.proof.clone());
        entry.previous_balance = Some(balance.amount);
        entry.new_balance = Some(new_amount);

        // A concurrent writer may have inserted the same proof since the check
        let row = match LedgerRepository::insert(&mut tx, &entry).await {
            Ok(row) => row,
            Err(DatabaseError::UniqueViolation(_)) => {
                debug!(proof = %deposit.proof, "Proof inserted concurrently, ignoring");
                return Ok(DepositWrite::DuplicateProof);
            }
            Err(e) => return Err(e.into()),
        };
        BalanceRepository::set_amount(&mut tx, balance.id, new_amount).await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        Ok(DepositWrite::Applied(row.try_into()?))
    }

    async fn create_withdrawal(
        &self,
        user_id: i64,
        currency_id: i64,
        amount: Decimal,
        address: &str,
    ) -> Result<LedgerEntry> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        let balance = BalanceRepository::lock(&mut tx, user_id, currency_id).await?;
        if balance.amount < amount {
            return Err(ReconError::InsufficientFunds {
                available: balance.amount.to_string(),
                requested: amount.to_string(),
            });
        }
        let new_amount = balance.amount - amount;

        let mut entry = draft(
            user_id,
            currency_id,
            balance.id,
            -amount,
            ChangeType::Withdraw,
            LedgerStatus::Pending,
        );
        entry.previous_balance = Some(balance.amount);
        entry.new_balance = Some(new_amount);
        entry.args.address = Some(address.to_string());

        let row = LedgerRepository::insert(&mut tx, &entry).await?;
        BalanceRepository::set_amount(&mut tx, balance.id, new_amount).await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        Ok(row.try_into()?)
    }

    async fn create_payout(
        &self,
        user_id: i64,
        currency_id: i64,
        amount: Decimal,
    ) -> Result<LedgerEntry> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        BalanceRepository::ensure(&mut tx, user_id, currency_id).await?;
        let (balance_id,): (i64,) =
            sqlx::query_as("SELECT id FROM balances WHERE user_id = $1 AND currency_id = $2")
                .bind(user_id)
                .bind(currency_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(DatabaseError::from)?;

        let entry = draft(
            user_id,
            currency_id,
            balance_id,
            amount,
            ChangeType::Payout,
            LedgerStatus::Pending,
        );
        let row = LedgerRepository::insert(&mut tx, &entry).await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        Ok(row.try_into()?)
    }

    async fn entry(&self, entry_id: i64) -> Result<Option<LedgerEntry>> {
        LedgerRepository::get(&self.pool, entry_id)
            .await?
            .map(|r| LedgerEntry::try_from(r).map_err(ReconError::from))
            .transpose()
    }

    async fn record_proof(&self, entry_id: i64, proof: &str, raw_tx: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        let mut entry = Self::lock_pending(&mut tx, entry_id, LedgerStatus::Success).await?;
        match entry.proof.as_deref() {
            Some(existing) if existing == proof => return Ok(()),
            Some(existing) => {
                return Err(ReconError::ProofConflict {
                    id: entry_id,
                    existing: existing.to_string(),
                })
            }
            None => {}
        }
        entry.proof = Some(proof.to_string());
        entry.args.raw_tx = Some(raw_tx.to_string());
        LedgerRepository::update(&mut tx, &entry).await?;
        tx.commit().await.map_err(DatabaseError::from)?;
        Ok(())
    }

    async fn record_transient_failure(&self, entry_id: i64, error: &str) -> Result<LedgerEntry> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        let mut entry = Self::lock_pending(&mut tx, entry_id, LedgerStatus::Web3Error).await?;
        entry.retry_count += 1;
        entry.args.web3.push(error.to_string());
        let row = LedgerRepository::update(&mut tx, &entry).await?;
        tx.commit().await.map_err(DatabaseError::from)?;
        Ok(row.try_into()?)
    }

    async fn finalize(&self, entry_id: i64, resolution: Resolution) -> Result<LedgerEntry> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        let mut entry = Self::lock_pending(&mut tx, entry_id, resolution.status).await?;
        entry.status = resolution.status;
        if resolution.error.is_some() {
            entry.args.error = resolution.error.clone();
        }

        match resolution.effect {
            BalanceEffect::None => {}
            BalanceEffect::Credit => {
                let balance = BalanceRepository::lock(&mut tx, entry.user_id, entry.currency_id).await?;
                let new_amount = balance.amount + entry.amount();
                BalanceRepository::set_amount(&mut tx, balance.id, new_amount).await?;
                entry.previous_balance = Some(balance.amount);
                entry.new_balance = Some(new_amount);
            }
            BalanceEffect::Refund => {
                let balance = BalanceRepository::lock(&mut tx, entry.user_id, entry.currency_id).await?;
                let new_amount = balance.amount + entry.amount();

                let mut refund = draft(
                    entry.user_id,
                    entry.currency_id,
                    balance.id,
                    entry.amount(),
                    ChangeType::Refund,
                    LedgerStatus::Success,
                );
                refund.previous_balance = Some(balance.amount);
                refund.new_balance = Some(new_amount);
                refund.args.refund_of = Some(entry.id);

                LedgerRepository::insert(&mut tx, &refund).await?;
                BalanceRepository::set_amount(&mut tx, balance.id, new_amount).await?;
            }
        }

        let row = LedgerRepository::update(&mut tx, &entry).await?;
        tx.commit().await.map_err(DatabaseError::from)?;
        Ok(row.try_into()?)
    }

    async fn balance(&self, user_id: i64, currency_id: i64) -> Result<Decimal> {
        Ok(BalanceRepository::get_amount(&self.pool, user_id, currency_id).await?)
    }

    async fn pending_outbound(&self) -> Result<Vec<LedgerEntry>> {
        convert(LedgerRepository::pending_outbound(&self.pool).await?)
    }

    async fn entries_with_status(&self, status: LedgerStatus) -> Result<Vec<LedgerEntry>> {
        convert(LedgerRepository::by_status(&self.pool, status).await?)
    }

    async fn record_attempt(&self, attempt: SettlementAttempt) -> Result<()> {
        Ok(AttemptRepository::insert(&self.pool, &attempt).await?)
    }
}
