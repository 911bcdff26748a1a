use crate::models::{address_key, DbWallet};
use crate::Result;
use alloy_primitives::Address;
use recon_core::types::to_tron_base58;
use sqlx::PgPool;

pub struct WalletRepository;

impl WalletRepository {
    /// Matches the hex form or, for TRON wallets, the base58 form
    pub async fn by_address(pool: &PgPool, address: &Address) -> Result<Option<DbWallet>> {
        let row = sqlx::query_as::<_, DbWallet>(
            "SELECT * FROM wallets WHERE lower(address) = $1 OR address = $2 ORDER BY id LIMIT 1",
        )
        .bind(address_key(address))
        .bind(to_tron_base58(address))
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    /// Oldest wallet of a user
    pub async fn by_user(pool: &PgPool, user_id: i64) -> Result<Option<DbWallet>> {
        let row = sqlx::query_as::<_, DbWallet>(
            "SELECT * FROM wallets WHERE user_id = $1 ORDER BY id LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    /// Every watched address
    pub async fn all_addresses(pool: &PgPool) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT address FROM wallets")
            .fetch_all(pool)
            .await?;
        Ok(rows.into_iter().map(|(a,)| a).collect())
    }
}
