use crate::models::{address_key, DbCurrency};
use crate::Result;
use alloy_primitives::Address;
use recon_core::types::{Currency, Network};
use sqlx::PgPool;

pub struct NetworkRepository;

impl NetworkRepository {
    /// Insert or update a configured network
    pub async fn upsert_network(pool: &PgPool, network: &Network) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO networks (id, label, chain_kind, rpc_url, reorg_window)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                label = EXCLUDED.label,
                chain_kind = EXCLUDED.chain_kind,
                rpc_url = EXCLUDED.rpc_url,
                reorg_window = EXCLUDED.reorg_window
            "#,
        )
        .bind(network.id)
        .bind(&network.label)
        .bind(network.chain_kind.as_str())
        .bind(&network.rpc_url)
        .bind(network.reorg_window as i64)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Insert or update a tracked currency
    pub async fn upsert_currency(pool: &PgPool, currency: &Currency) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO currencies (id, network_id, symbol, contract, decimals)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                network_id = EXCLUDED.network_id,
                symbol = EXCLUDED.symbol,
                contract = EXCLUDED.contract,
                decimals = EXCLUDED.decimals
            "#,
        )
        .bind(currency.id)
        .bind(currency.network_id)
        .bind(&currency.symbol)
        .bind(address_key(&currency.contract))
        .bind(currency.decimals as i32)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn currencies_for_network(pool: &PgPool, network_id: i64) -> Result<Vec<DbCurrency>> {
        let rows = sqlx::query_as::<_, DbCurrency>(
            "SELECT * FROM currencies WHERE network_id = $1 ORDER BY id",
        )
        .bind(network_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn currency_by_id(pool: &PgPool, id: i64) -> Result<Option<DbCurrency>> {
        let row = sqlx::query_as::<_, DbCurrency>("SELECT * FROM currencies WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    /// Case-insensitive lookup by token contract
    pub async fn currency_by_contract(
        pool: &PgPool,
        network_id: i64,
        contract: &Address,
    ) -> Result<Option<DbCurrency>> {
        let row = sqlx::query_as::<_, DbCurrency>(
            "SELECT * FROM currencies WHERE network_id = $1 AND lower(contract) = $2",
        )
        .bind(network_id)
        .bind(address_key(contract))
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }
}
