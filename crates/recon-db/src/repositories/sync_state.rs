use crate::Result;
use sqlx::PgPool;

pub struct SyncStateRepository;

impl SyncStateRepository {
    /// Get the last synced block for a network (None if never stored)
    pub async fn get_last_synced_block(pool: &PgPool, network: &str) -> Result<Option<u64>> {
        let result: Option<(i64,)> =
            sqlx::query_as("SELECT last_synced_block FROM sync_state WHERE network = $1")
                .bind(network)
                .fetch_optional(pool)
                .await?;

        Ok(result.map(|(block,)| block.max(0) as u64))
    }

    /// Upsert the last synced block
    pub async fn set_last_synced_block(pool: &PgPool, network: &str, block: u64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (network, last_synced_block, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (network) DO UPDATE SET
                last_synced_block = EXCLUDED.last_synced_block,
                updated_at = NOW()
            "#,
        )
        .bind(network)
        .bind(block as i64)
        .execute(pool)
        .await?;
        Ok(())
    }
}
