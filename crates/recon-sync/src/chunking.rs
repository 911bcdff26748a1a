use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Activity-driven chunk sizing.
///
/// A chunk with any match drops the size to the floor since more activity
/// likely follows nearby. An empty chunk doubles it, capped at the ceiling.
pub struct ChunkSizeController {
    current_size: AtomicU64,
    min_size: u64,
    max_size: u64,
}

impl ChunkSizeController {
    pub fn new(initial: u64, min_size: u64, max_size: u64) -> Self {
        let min_size = min_size.max(1);
        let max_size = max_size.max(min_size);
        Self {
            current_size: AtomicU64::new(initial.clamp(min_size, max_size)),
            min_size,
            max_size,
        }
    }

    pub fn get_size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Restart from `initial` for a new pass.
    pub fn reset(&self, initial: u64) {
        self.current_size
            .store(initial.clamp(self.min_size, self.max_size), Ordering::Relaxed);
    }

    /// Feed back how many watched transfers the last chunk held.
    /// Returns the size for the next chunk.
    pub fn report_chunk(&self, matched: usize) -> u64 {
        let current = self.get_size();
        let next = if matched > 0 {
            self.min_size
        } else {
            current.saturating_mul(2).min(self.max_size)
        };

        if next != current {
            self.current_size.store(next, Ordering::Relaxed);
            debug!(from = current, to = next, matched = matched, "Chunk size adjusted");
        }
        next
    }
}
