mod checkpoint;
mod chunking;
mod engine;
mod provider;
mod registry;
mod scanner;
#[cfg(test)]
mod testing;

pub use checkpoint::{CheckpointTracker, ReorgPolicy};
pub use chunking::ChunkSizeController;
pub use engine::{NetworkSupervisor, SyncEngine};
pub use provider::{decode_transfer, ProviderManager, RpcLogSource};
pub use registry::{CachedRegistry, RegistrySnapshot};
pub use scanner::{ChainScanner, ChunkOutcome, ScanError, ScanReport};
