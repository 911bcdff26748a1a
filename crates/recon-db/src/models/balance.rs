use recon_core::types::Balance;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Database model for balances table
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbBalance {
    pub id: i64,
    pub user_id: i64,
    pub currency_id: i64,
    pub amount: Decimal,
}

impl From<DbBalance> for Balance {
    fn from(row: DbBalance) -> Self {
        Balance {
            id: row.id,
            user_id: row.user_id,
            currency_id: row.currency_id,
            amount: row.amount,
        }
    }
}
