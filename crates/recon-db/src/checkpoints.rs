use crate::repositories::SyncStateRepository;
use async_trait::async_trait;
use recon_core::error::Result;
use recon_core::traits::CheckpointStore;
use sqlx::PgPool;

/// Checkpoints in the `sync_state` table, one row per network
#[derive(Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn load(&self, network: &str) -> Result<Option<u64>> {
        Ok(SyncStateRepository::get_last_synced_block(&self.pool, network).await?)
    }

    async fn store(&self, network: &str, block: u64) -> Result<()> {
        Ok(SyncStateRepository::set_last_synced_block(&self.pool, network, block).await?)
    }
}
