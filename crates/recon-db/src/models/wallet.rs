use crate::{DatabaseError, Result};
use recon_core::types::{parse_chain_address, WalletRecord};
use sqlx::FromRow;

/// Database model for wallets table
#[derive(Clone, FromRow)]
pub struct DbWallet {
    pub id: i64,
    pub user_id: i64,
    pub address: String,
    pub private_key: Option<String>,
}

impl TryFrom<DbWallet> for WalletRecord {
    type Error = DatabaseError;

    fn try_from(row: DbWallet) -> Result<Self> {
        let address = parse_chain_address(&row.address).ok_or_else(|| {
            DatabaseError::Serialization(format!("wallet {}: malformed address {}", row.id, row.address))
        })?;
        Ok(WalletRecord {
            user_id: row.user_id,
            address,
            private_key: row.private_key,
        })
    }
}
