use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ledger entry lifecycle. PENDING is the only non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerStatus {
    Pending,
    Success,
    Canceled,
    Blocked,
    InsufficientFunds,
    Web3Error,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Pending => "pending",
            LedgerStatus::Success => "success",
            LedgerStatus::Canceled => "canceled",
            LedgerStatus::Blocked => "blocked",
            LedgerStatus::InsufficientFunds => "insufficient_funds",
            LedgerStatus::Web3Error => "web3_error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(LedgerStatus::Pending),
            "success" => Some(LedgerStatus::Success),
            "canceled" => Some(LedgerStatus::Canceled),
            "blocked" => Some(LedgerStatus::Blocked),
            "insufficient_funds" => Some(LedgerStatus::InsufficientFunds),
            "web3_error" => Some(LedgerStatus::Web3Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, LedgerStatus::Pending)
    }

    /// PENDING may move to any terminal status; terminal statuses never move.
    pub fn can_transition_to(&self, next: LedgerStatus) -> bool {
        *self == LedgerStatus::Pending && next.is_terminal()
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Deposit,
    Withdraw,
    Payout,
    Penalty,
    Refund,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Deposit => "deposit",
            ChangeType::Withdraw => "withdraw",
            ChangeType::Payout => "payout",
            ChangeType::Penalty => "penalty",
            ChangeType::Refund => "refund",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(ChangeType::Deposit),
            "withdraw" => Some(ChangeType::Withdraw),
            "payout" => Some(ChangeType::Payout),
            "penalty" => Some(ChangeType::Penalty),
            "refund" => Some(ChangeType::Refund),
            _ => None,
        }
    }

    /// Requires an on-chain transfer to settle.
    pub fn is_outbound(&self) -> bool {
        matches!(self, ChangeType::Withdraw | ChangeType::Payout)
    }

    /// Balance was debited when the entry was created, so a failure owes a refund.
    pub fn is_debit(&self) -> bool {
        matches!(self, ChangeType::Withdraw)
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free-form bookkeeping carried on an entry (stored as JSON).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryArgs {
    /// Destination for withdrawals
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Transient chain errors seen across attempts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub web3: Vec<String>,
    /// Reason for a terminal failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Entry this one compensates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_of: Option<i64>,
    /// Signed transaction behind `proof` as the node accepts it, resubmitted while unmined
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_tx: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub id: i64,
    pub user_id: i64,
    pub currency_id: i64,
    pub balance_id: i64,
    /// Signed: negative for withdrawals
    pub change_amount: Decimal,
    pub change_type: ChangeType,
    pub status: LedgerStatus,
    pub proof: Option<String>,
    pub retry_count: u32,
    /// Set whenever the entry actually moved the balance
    pub previous_balance: Option<Decimal>,
    pub new_balance: Option<Decimal>,
    pub args: EntryArgs,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Magnitude of the transfer the entry asks for.
    pub fn amount(&self) -> Decimal {
        self.change_amount.abs()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Balance {
    pub id: i64,
    pub user_id: i64,
    pub currency_id: i64,
    pub amount: Decimal,
}

/// Confirmed inbound transfer ready to be credited.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDeposit {
    pub user_id: i64,
    pub currency_id: i64,
    pub amount: Decimal,
    pub proof: String,
}

/// What a deposit write did.
#[derive(Debug, Clone, PartialEq)]
pub enum DepositWrite {
    Applied(LedgerEntry),
    DuplicateProof,
}

/// Balance side effect paired with a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceEffect {
    None,
    /// Add the entry amount (payout settled)
    Credit,
    /// Return a debited amount via a separate refund entry
    Refund,
}

/// Terminal resolution for a PENDING entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub status: LedgerStatus,
    pub effect: BalanceEffect,
    pub error: Option<String>,
}

impl Resolution {
    pub fn success(effect: BalanceEffect) -> Self {
        Self {
            status: LedgerStatus::Success,
            effect,
            error: None,
        }
    }

    pub fn failed(status: LedgerStatus, effect: BalanceEffect, error: impl Into<String>) -> Self {
        Self {
            status,
            effect,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Retry,
    Failed,
    Skipped,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Retry => "retry",
            AttemptOutcome::Failed => "failed",
            AttemptOutcome::Skipped => "skipped",
        }
    }
}

/// Audit row for one executor run.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementAttempt {
    pub entry_id: i64,
    pub job_id: String,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub error: Option<String>,
    pub tx_hash: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Convert a raw token amount to a decimal with `decimals` places.
/// Returns None when the value does not fit.
pub fn raw_to_decimal(value: U256, decimals: u32) -> Option<Decimal> {
    let raw: u128 = value.try_into().ok()?;
    let raw = i128::try_from(raw).ok()?;
    Decimal::try_from_i128_with_scale(raw, decimals)
        .ok()
        .map(|d| d.normalize())
}

/// Convert a decimal amount to raw token units, truncating extra precision.
pub fn decimal_to_raw(amount: Decimal, decimals: u32) -> Option<U256> {
    if amount.is_sign_negative() || decimals > 28 {
        return None;
    }
    let factor = Decimal::from_i128_with_scale(10i128.pow(decimals), 0);
    let scaled = amount.checked_mul(factor)?.trunc();
    scaled.to_u128().map(U256::from)
}
