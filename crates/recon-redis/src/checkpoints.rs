use crate::connection::RedisConnection;
use crate::keys::state_key;
use crate::RedisError;
use async_trait::async_trait;
use recon_core::error::Result;
use recon_core::traits::CheckpointStore;
use std::sync::Arc;

/// Checkpoints stored as plain integers under `<prefix>:STATE:<network>`
#[derive(Clone)]
pub struct RedisCheckpointStore {
    connection: Arc<RedisConnection>,
}

impl RedisCheckpointStore {
    pub fn new(connection: Arc<RedisConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl CheckpointStore for RedisCheckpointStore {
    async fn load(&self, network: &str) -> Result<Option<u64>> {
        let mut conn = self.connection.get_connection();
        let key = state_key(&self.connection.config().key_prefix, network);
        let raw: Option<String> = redis::cmd("GET")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(RedisError::from)?;

        match raw {
            None => Ok(None),
            Some(value) => value.trim().parse::<u64>().map(Some).map_err(|e| {
                RedisError::Serialization(format!("{}: {}", key, e)).into()
            }),
        }
    }

    async fn store(&self, network: &str, block: u64) -> Result<()> {
        let mut conn = self.connection.get_connection();
        let key = state_key(&self.connection.config().key_prefix, network);
        let _: () = redis::cmd("SET")
            .arg(&key)
            .arg(block)
            .query_async(&mut conn)
            .await
            .map_err(RedisError::from)?;
        Ok(())
    }
}
