use alloy_primitives::Address;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use recon_core::error::{ReconError, Result};
use recon_core::traits::{LedgerStore, RegistrySource};
use recon_core::types::{
    Balance, BalanceEffect, ChangeType, Currency, DepositWrite, EntryArgs, LedgerEntry,
    LedgerStatus, NewDeposit, Resolution, SettlementAttempt, WalletRecord,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Balances and entries behind one lock, so every write pairs atomically.
#[derive(Debug, Default)]
struct LedgerBook {
    balances: HashMap<(i64, i64), Balance>,
    entries: BTreeMap<i64, LedgerEntry>,
    proofs: HashMap<String, i64>,
    next_balance_id: i64,
    next_entry_id: i64,
}

impl LedgerBook {
    fn balance_mut(&mut self, user_id: i64, currency_id: i64) -> &mut Balance {
        let next_id = &mut self.next_balance_id;
        self.balances
            .entry((user_id, currency_id))
            .or_insert_with(|| {
                *next_id += 1;
                Balance {
                    id: *next_id,
                    user_id,
                    currency_id,
                    amount: Decimal::ZERO,
                }
            })
    }

    fn insert_entry(&mut self, mut entry: LedgerEntry) -> LedgerEntry {
        self.next_entry_id += 1;
        entry.id = self.next_entry_id;
        if let Some(proof) = &entry.proof {
            self.proofs.insert(proof.clone(), entry.id);
        }
        self.entries.insert(entry.id, entry.clone());
        entry
    }

    fn pending_mut(&mut self, entry_id: i64, next: LedgerStatus) -> Result<&mut LedgerEntry> {
        let entry = self
            .entries
            .get_mut(&entry_id)
            .ok_or(ReconError::EntryNotFound(entry_id))?;
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

fn new_entry(
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

/// In-process ledger used when no database is configured, and by tests.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    book: Mutex<LedgerBook>,
    /// address -> wallet
    wallets: DashMap<Address, WalletRecord>,
    /// currency_id -> currency
    currencies: DashMap<i64, Currency>,
    attempts: Mutex<Vec<SettlementAttempt>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_wallet(&self, wallet: WalletRecord) {
        self.wallets.insert(wallet.address, wallet);
    }

    pub fn add_currency(&self, currency: Currency) {
        self.currencies.insert(currency.id, currency);
    }

    /// Seed a balance directly, bypassing the ledger.
    pub fn set_balance(&self, user_id: i64, currency_id: i64, amount: Decimal) {
        self.book.lock().balance_mut(user_id, currency_id).amount = amount;
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.book.lock().entries.values().cloned().collect()
    }

    pub fn attempts(&self) -> Vec<SettlementAttempt> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl RegistrySource for MemoryLedger {
    async fn watched_addresses(&self) -> Result<HashSet<Address>> {
        Ok(self.wallets.iter().map(|w| *w.key()).collect())
    }

    async fn currencies(&self, network_id: i64) -> Result<Vec<Currency>> {
        Ok(self
            .currencies
            .iter()
            .filter(|c| c.network_id == network_id)
            .map(|c| c.clone())
            .collect())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn resolve_wallet(&self, address: &Address) -> Result<Option<WalletRecord>> {
        Ok(self.wallets.get(address).map(|w| w.clone()))
    }

    async fn wallet_for_user(&self, user_id: i64) -> Result<Option<WalletRecord>> {
        Ok(self
            .wallets
            .iter()
            .find(|w| w.user_id == user_id)
            .map(|w| w.clone()))
    }

    async fn resolve_currency(
        &self,
        network_id: i64,
        contract: &Address,
    ) -> Result<Option<Currency>> {
        Ok(self
            .currencies
            .iter()
            .find(|c| c.network_id == network_id && c.contract == *contract)
            .map(|c| c.clone()))
    }

    async fn currency(&self, currency_id: i64) -> Result<Option<Currency>> {
        Ok(self.currencies.get(&currency_id).map(|c| c.clone()))
    }

    async fn apply_deposit(&self, deposit: NewDeposit) -> Result<DepositWrite> {
        let mut book = self.book.lock();
        if book.proofs.contains_key(&deposit.proof) {
            return Ok(DepositWrite::DuplicateProof);
        }

        let balance = book.balance_mut(deposit.user_id, deposit.currency_id);
        let previous = balance.amount;
        balance.amount += deposit.amount;
        let (balance_id, current) = (balance.id, balance.amount);

        let mut entry = new_entry(
            deposit.user_id,
            deposit.currency_id,
            balance_id,
            deposit.amount,
            ChangeType::Deposit,
            LedgerStatus::Success,
        );
        entry.proof = Some(deposit.proof);
        entry.previous_balance = Some(previous);
        entry.new_balance = Some(current);

        let entry = book.insert_entry(entry);
        debug!(entry_id = entry.id, user_id = entry.user_id, amount = %entry.change_amount, "Deposit applied in memory ledger");
        Ok(DepositWrite::Applied(entry))
    }

    async fn create_withdrawal(
        &self,
        user_id: i64,
        currency_id: i64,
        amount: Decimal,
        address: &str,
    ) -> Result<LedgerEntry> {
        let mut book = self.book.lock();
        let balance = book.balance_mut(user_id, currency_id);
        if balance.amount < amount {
            return Err(ReconError::InsufficientFunds {
                available: balance.amount.to_string(),
                requested: amount.to_string(),
            });
        }
        let previous = balance.amount;
        balance.amount -= amount;
        let (balance_id, current) = (balance.id, balance.amount);

        let mut entry = new_entry(
            user_id,
            currency_id,
            balance_id,
            -amount,
            ChangeType::Withdraw,
            LedgerStatus::Pending,
        );
        entry.previous_balance = Some(previous);
        entry.new_balance = Some(current);
        entry.args.address = Some(address.to_string());
        Ok(book.insert_entry(entry))
    }

    async fn create_payout(
        &self,
        user_id: i64,
        currency_id: i64,
        amount: Decimal,
    ) -> Result<LedgerEntry> {
        let mut book = self.book.lock();
        let balance_id = book.balance_mut(user_id, currency_id).id;
        let entry = new_entry(
            user_id,
            currency_id,
            balance_id,
            amount,
            ChangeType::Payout,
            LedgerStatus::Pending,
        );
        Ok(book.insert_entry(entry))
    }

    async fn entry(&self, entry_id: i64) -> Result<Option<LedgerEntry>> {
        Ok(self.book.lock().entries.get(&entry_id).cloned())
    }

    async fn record_proof(&self, entry_id: i64, proof: &str, raw_tx: &str) -> Result<()> {
        let mut book = self.book.lock();
        match book.proofs.get(proof) {
            Some(owner) if *owner == entry_id => return Ok(()),
            Some(_) => return Err(ReconError::DuplicateProof(proof.to_string())),
            None => {}
        }
        let entry = book.pending_mut(entry_id, LedgerStatus::Success)?;
        if let Some(existing) = &entry.proof {
            return Err(ReconError::ProofConflict {
                id: entry_id,
                existing: existing.clone(),
            });
        }
        entry.proof = Some(proof.to_string());
        entry.args.raw_tx = Some(raw_tx.to_string());
        entry.updated_at = Utc::now();
        book.proofs.insert(proof.to_string(), entry_id);
        Ok(())
    }

    async fn record_transient_failure(&self, entry_id: i64, error: &str) -> Result<LedgerEntry> {
        let mut book = self.book.lock();
        let entry = book.pending_mut(entry_id, LedgerStatus::Web3Error)?;
        entry.retry_count += 1;
        entry.args.web3.push(error.to_string());
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn finalize(&self, entry_id: i64, resolution: Resolution) -> Result<LedgerEntry> {
        let mut book = self.book.lock();
        let entry = book.pending_mut(entry_id, resolution.status)?.clone();

        let mut updated = entry.clone();
        updated.status = resolution.status;
        updated.updated_at = Utc::now();
        if resolution.error.is_some() {
            updated.args.error = resolution.error.clone();
        }

        match resolution.effect {
            BalanceEffect::None => {}
            BalanceEffect::Credit => {
                let balance = book.balance_mut(entry.user_id, entry.currency_id);
                let previous = balance.amount;
                balance.amount += entry.amount();
                updated.previous_balance = Some(previous);
                updated.new_balance = Some(balance.amount);
            }
            BalanceEffect::Refund => {
                let balance = book.balance_mut(entry.user_id, entry.currency_id);
                let previous = balance.amount;
                balance.amount += entry.amount();
                let (balance_id, current) = (balance.id, balance.amount);

                let mut refund = new_entry(
                    entry.user_id,
                    entry.currency_id,
                    balance_id,
                    entry.amount(),
                    ChangeType::Refund,
                    LedgerStatus::Success,
                );
                refund.previous_balance = Some(previous);
                refund.new_balance = Some(current);
                refund.args.refund_of = Some(entry.id);
                book.insert_entry(refund);
            }
        }

        book.entries.insert(entry_id, updated.clone());
        Ok(updated)
    }

    async fn balance(&self, user_id: i64, currency_id: i64) -> Result<Decimal> {
        Ok(self
            .book
            .lock()
            .balances
            .get(&(user_id, currency_id))
            .map(|b| b.amount)
            .unwrap_or(Decimal::ZERO))
    }

    async fn pending_outbound(&self) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .book
            .lock()
            .entries
            .values()
            .filter(|e| e.status == LedgerStatus::Pending && e.change_type.is_outbound())
            .cloned()
            .collect())
    }

    async fn entries_with_status(&self, status: LedgerStatus) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .book
            .lock()
            .entries
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect())
    }

    async fn record_attempt(&self, attempt: SettlementAttempt) -> Result<()> {
        self.attempts.lock().push(attempt);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use rust_decimal_macros::dec;

    fn ledger() -> MemoryLedger {
        let ledger = MemoryLedger::new();
        ledger.add_wallet(WalletRecord {
            user_id: 1,
            address: address!("00000000000000000000000000000000000000aa"),
            private_key: None,
        });
        ledger.add_currency(Currency {
            id: 10,
            network_id: 1,
            symbol: "USDT".to_string(),
            contract: address!("00000000000000000000000000000000000000cc"),
            decimals: 6,
        });
        ledger
    }

    fn deposit(proof: &str, amount: Decimal) -> NewDeposit {
        NewDeposit {
            user_id: 1,
            currency_id: 10,
            amount,
            proof: proof.to_string(),
        }
    }

    #[tokio::test]
    async fn test_deposit_is_idempotent_by_proof() {
        let ledger = ledger();
        let first = ledger.apply_deposit(deposit("0x01", dec!(2.5))).await.unwrap();
        let second = ledger.apply_deposit(deposit("0x01", dec!(2.5))).await.unwrap();

        assert!(matches!(first, DepositWrite::Applied(_)));
        assert_eq!(second, DepositWrite::DuplicateProof);
        assert_eq!(ledger.balance(1, 10).await.unwrap(), dec!(2.5));
        assert_eq!(ledger.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_deposit_snapshots_balance() {
        let ledger = ledger();
        ledger.set_balance(1, 10, dec!(1));
        let DepositWrite::Applied(entry) = ledger.apply_deposit(deposit("0x02", dec!(1))).await.unwrap() else {
            panic!("expected applied");
        };
        assert_eq!(entry.status, LedgerStatus::Success);
        assert_eq!(entry.previous_balance, Some(dec!(1)));
        assert_eq!(entry.new_balance, Some(dec!(2)));
    }

    #[tokio::test]
    async fn test_withdrawal_debits_and_refuses_overdraft() {
        let ledger = ledger();
        ledger.set_balance(1, 10, dec!(5));

        let entry = ledger.create_withdrawal(1, 10, dec!(3), "0xdest").await.unwrap();
        assert_eq!(entry.status, LedgerStatus::Pending);
        assert_eq!(entry.change_amount, dec!(-3));
        assert_eq!(entry.args.address.as_deref(), Some("0xdest"));
        assert_eq!(ledger.balance(1, 10).await.unwrap(), dec!(2));

        let err = ledger.create_withdrawal(1, 10, dec!(3), "0xdest").await.unwrap_err();
        assert!(matches!(err, ReconError::InsufficientFunds { .. }));
        assert_eq!(ledger.balance(1, 10).await.unwrap(), dec!(2));
    }

    #[tokio::test]
    async fn test_refund_is_separate_entry() {
        let ledger = ledger();
        ledger.set_balance(1, 10, dec!(5));
        let entry = ledger.create_withdrawal(1, 10, dec!(5), "0xdest").await.unwrap();

        let failed = ledger
            .finalize(
                entry.id,
                Resolution::failed(LedgerStatus::Web3Error, BalanceEffect::Refund, "gave up"),
            )
            .await
            .unwrap();
        assert_eq!(failed.status, LedgerStatus::Web3Error);
        assert_eq!(failed.args.error.as_deref(), Some("gave up"));
        assert_eq!(ledger.balance(1, 10).await.unwrap(), dec!(5));

        let refunds: Vec<_> = ledger
            .entries()
            .into_iter()
            .filter(|e| e.change_type == ChangeType::Refund)
            .collect();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].args.refund_of, Some(entry.id));
        assert_eq!(refunds[0].change_amount, dec!(5));
    }

    #[tokio::test]
    async fn test_terminal_status_never_moves() {
        let ledger = ledger();
        let entry = ledger.create_payout(1, 10, dec!(1)).await.unwrap();
        ledger
            .finalize(entry.id, Resolution::success(BalanceEffect::Credit))
            .await
            .unwrap();
        assert_eq!(ledger.balance(1, 10).await.unwrap(), dec!(1));

        let again = ledger
            .finalize(entry.id, Resolution::success(BalanceEffect::Credit))
            .await;
        assert!(matches!(again, Err(ReconError::InvalidTransition { .. })));
        assert!(ledger.record_transient_failure(entry.id, "late").await.is_err());
        assert_eq!(ledger.balance(1, 10).await.unwrap(), dec!(1));
    }

    #[tokio::test]
    async fn test_proof_unique_across_entries() {
        let ledger = ledger();
        let a = ledger.create_payout(1, 10, dec!(1)).await.unwrap();
        let b = ledger.create_payout(1, 10, dec!(1)).await.unwrap();

        ledger.record_proof(a.id, "0xabc", "0xf86b01").await.unwrap();
        ledger.record_proof(a.id, "0xabc", "0xf86b01").await.unwrap();
        assert!(matches!(
            ledger.record_proof(b.id, "0xabc", "0xf86b01").await,
            Err(ReconError::DuplicateProof(_))
        ));
        let stored = ledger.entry(a.id).await.unwrap().unwrap();
        assert_eq!(stored.args.raw_tx.as_deref(), Some("0xf86b01"));
    }

    #[tokio::test]
    async fn test_second_signed_transfer_cannot_replace_proof() {
        let ledger = ledger();
        let entry = ledger.create_payout(1, 10, dec!(1)).await.unwrap();

        ledger.record_proof(entry.id, "0xaaa", "0x01").await.unwrap();
        let err = ledger.record_proof(entry.id, "0xbbb", "0x02").await.unwrap_err();
        assert!(matches!(err, ReconError::ProofConflict { ref existing, .. } if existing == "0xaaa"));

        let stored = ledger.entry(entry.id).await.unwrap().unwrap();
        assert_eq!(stored.proof.as_deref(), Some("0xaaa"));
        assert_eq!(stored.args.raw_tx.as_deref(), Some("0x01"));
    }

    #[tokio::test]
    async fn test_pending_outbound_and_review_queries() {
        let ledger = ledger();
        ledger.set_balance(1, 10, dec!(10));
        let w = ledger.create_withdrawal(1, 10, dec!(1), "0xdest").await.unwrap();
        let p = ledger.create_payout(1, 10, dec!(1)).await.unwrap();
        ledger.apply_deposit(deposit("0x03", dec!(1))).await.unwrap();

        let pending: Vec<i64> = ledger.pending_outbound().await.unwrap().iter().map(|e| e.id).collect();
        assert_eq!(pending, vec![w.id, p.id]);

        ledger
            .finalize(p.id, Resolution::failed(LedgerStatus::Web3Error, BalanceEffect::None, "x"))
            .await
            .unwrap();
        let review = ledger.entries_with_status(LedgerStatus::Web3Error).await.unwrap();
        assert_eq!(review.len(), 1);
        assert_eq!(review[0].id, p.id);
    }

    #[tokio::test]
    async fn test_registry_view() {
        let ledger = ledger();
        let watched = ledger.watched_addresses().await.unwrap();
        assert!(watched.contains(&address!("00000000000000000000000000000000000000aa")));
        assert_eq!(ledger.currencies(1).await.unwrap().len(), 1);
        assert!(ledger.currencies(2).await.unwrap().is_empty());
    }
}
