use async_trait::async_trait;
use dashmap::DashMap;
use recon_core::error::Result;
use recon_core::traits::CheckpointStore;

/// Checkpoints that live only as long as the process
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    blocks: DashMap<String, u64>,
    writes: DashMap<String, u64>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, network: &str) -> Option<u64> {
        self.blocks.get(network).map(|b| *b)
    }

    /// Number of stores seen for a network.
    pub fn write_count(&self, network: &str) -> u64 {
        self.writes.get(network).map(|w| *w).unwrap_or(0)
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, network: &str) -> Result<Option<u64>> {
        Ok(self.get(network))
    }

    async fn store(&self, network: &str, block: u64) -> Result<()> {
        self.blocks.insert(network.to_string(), block);
        *self.writes.entry(network.to_string()).or_insert(0) += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_and_load() {
        let store = MemoryCheckpointStore::new();
        assert_eq!(store.load("ETH").await.unwrap(), None);

        store.store("ETH", 100).await.unwrap();
        store.store("ETH", 120).await.unwrap();
        assert_eq!(store.load("ETH").await.unwrap(), Some(120));
        assert_eq!(store.write_count("ETH"), 2);
        assert_eq!(store.load("TRON").await.unwrap(), None);
    }
}
