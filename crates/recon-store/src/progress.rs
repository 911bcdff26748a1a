use recon_core::types::IngestOutcome;

/// What a network's scanner is doing right now
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScanMode {
    #[default]
    Idle,
    Scanning,
    /// Last pass failed, waiting before the next one
    Backoff,
}

/// Scan statistics
#[derive(Debug, Clone, Default)]
pub struct ScanStats {
    pub passes_completed: u64,
    pub passes_failed: u64,
    pub chunks_scanned: u64,
    pub blocks_scanned: u64,
    pub events_matched: u64,
    pub deposits_applied: u64,
    /// Replays absorbed by proof uniqueness, mostly from the reorg window
    pub duplicates_ignored: u64,
    pub unresolved: u64,
}

/// Per-network scan state
#[derive(Debug, Clone, Default)]
pub struct ScanProgress {
    pub network: String,
    /// Highest block fully handed to the ledger
    pub last_scanned_block: Option<u64>,
    pub head_block: Option<u64>,
    pub mode: ScanMode,
    pub last_error: Option<String>,
    pub stats: ScanStats,
}

impl ScanProgress {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            ..Default::default()
        }
    }

    pub fn begin_pass(&mut self, head: u64) {
        self.head_block = Some(head);
        self.mode = ScanMode::Scanning;
    }

    pub fn record_chunk(&mut self, from: u64, to: u64) {
        self.stats.chunks_scanned += 1;
        self.stats.blocks_scanned += to.saturating_sub(from) + 1;
        self.last_scanned_block = Some(self.last_scanned_block.map_or(to, |b| b.max(to)));
    }

    pub fn record_outcome(&mut self, outcome: IngestOutcome) {
        self.stats.events_matched += 1;
        match outcome {
            IngestOutcome::Applied { .. } => self.stats.deposits_applied += 1,
            IngestOutcome::DuplicateIgnored => self.stats.duplicates_ignored += 1,
            IngestOutcome::UnresolvedAddress
            | IngestOutcome::UnresolvedCurrency
            | IngestOutcome::Rejected => {
                self.stats.unresolved += 1
            }
        }
    }

    pub fn complete_pass(&mut self) {
        self.stats.passes_completed += 1;
        self.mode = ScanMode::Idle;
        self.last_error = None;
    }

    pub fn fail_pass(&mut self, error: impl Into<String>) {
        self.stats.passes_failed += 1;
        self.mode = ScanMode::Backoff;
        self.last_error = Some(error.into());
    }

    /// Blocks between the checkpoint and the scan target
    pub fn lag(&self) -> Option<u64> {
        match (self.head_block, self.last_scanned_block) {
            (Some(head), Some(last)) => Some(head.saturating_sub(1).saturating_sub(last)),
            _ => None,
        }
    }
}
