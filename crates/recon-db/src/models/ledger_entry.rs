use crate::{DatabaseError, Result};
use chrono::{DateTime, Utc};
use recon_core::types::{ChangeType, EntryArgs, LedgerEntry, LedgerStatus};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::FromRow;

/// Database model for ledger_entries table
#[derive(Debug, Clone, FromRow)]
pub struct DbLedgerEntry {
    pub id: i64,
    pub user_id: i64,
    pub currency_id: i64,
    pub balance_id: i64,
    pub change_amount: Decimal,
    pub change_type: String,
    pub status: String,
    /// Tx hash, unique when present
    pub proof: Option<String>,
    pub retry_count: i32,
    pub previous_balance: Option<Decimal>,
    pub new_balance: Option<Decimal>,
    pub args: Json<EntryArgs>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbLedgerEntry> for LedgerEntry {
    type Error = DatabaseError;

    fn try_from(row: DbLedgerEntry) -> Result<Self> {
        let status = LedgerStatus::from_str(&row.status).ok_or_else(|| {
            DatabaseError::Serialization(format!("entry {}: unknown status {}", row.id, row.status))
        })?;
        let change_type = ChangeType::from_str(&row.change_type).ok_or_else(|| {
            DatabaseError::Serialization(format!(
                "entry {}: unknown change type {}",
                row.id, row.change_type
            ))
        })?;

        Ok(LedgerEntry {
            id: row.id,
            user_id: row.user_id,
            currency_id: row.currency_id,
            balance_id: row.balance_id,
            change_amount: row.change_amount,
            change_type,
            status,
            proof: row.proof,
            retry_count: row.retry_count.max(0) as u32,
            previous_balance: row.previous_balance,
            new_balance: row.new_balance,
            args: row.args.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
