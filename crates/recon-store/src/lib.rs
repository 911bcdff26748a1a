mod checkpoints;
mod jobs;
mod ledger;
mod progress;

pub use checkpoints::MemoryCheckpointStore;
pub use jobs::{MemoryJobQueue, QueueStats};
pub use ledger::MemoryLedger;
pub use progress::{ScanMode, ScanProgress, ScanStats};
