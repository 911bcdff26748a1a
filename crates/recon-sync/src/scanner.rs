use recon_core::config::ScannerConfig;
use recon_core::traits::{LogSource, TransferHandler};
use recon_core::types::{IngestOutcome, Network, TransferEvent, TransferQuery};
use recon_core::error::is_too_many_logs_message;
use recon_core::ReconError;
use recon_store::ScanProgress;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointTracker;
use crate::chunking::ChunkSizeController;
use crate::registry::RegistrySnapshot;

/// Upper bound on a server-suggested rate-limit wait
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

/// What one chunk fetch achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Every block of the requested range was read
    Complete {
        from: u64,
        to: u64,
        events: Vec<TransferEvent>,
    },
    /// The range was halved on retry; only `from..=achieved_end` was read
    Partial {
        from: u64,
        requested_end: u64,
        achieved_end: u64,
        events: Vec<TransferEvent>,
    },
}

impl ChunkOutcome {
    pub fn achieved_end(&self) -> u64 {
        match self {
            ChunkOutcome::Complete { to, .. } => *to,
            ChunkOutcome::Partial { achieved_end, .. } => *achieved_end,
        }
    }

    pub fn into_events(self) -> Vec<TransferEvent> {
        match self {
            ChunkOutcome::Complete { events, .. } | ChunkOutcome::Partial { events, .. } => events,
        }
    }
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Invalid scan range {start}..={end}")]
    InvalidRange { start: u64, end: u64 },

    #[error("Retries exhausted for blocks {from}..={to} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        from: u64,
        to: u64,
        attempts: u32,
        last_error: String,
    },

    #[error("Ledger ingest failed at block {block} ({tx_hash}): {source}")]
    Ingest {
        block: u64,
        tx_hash: String,
        #[source]
        source: ReconError,
    },

    #[error("Checkpoint write failed: {0}")]
    Checkpoint(#[source] ReconError),
}

impl From<ScanError> for ReconError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::RetriesExhausted {
                from,
                to,
                attempts,
                last_error,
            } => ReconError::MaxRetriesExceeded {
                from,
                to,
                attempts,
                last_error,
            },
            ScanError::Ingest { source, .. } | ScanError::Checkpoint(source) => source,
            ScanError::InvalidRange { start, end } => {
                ReconError::PermanentData(format!("invalid scan range {}..={}", start, end))
            }
        }
    }
}

/// Summary of one `scan` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub start: u64,
    pub end: u64,
    /// Last block fully handed to the ledger, None if no chunk finished
    pub achieved_end: Option<u64>,
    pub chunks_scanned: u64,
    pub matched: Vec<TransferEvent>,
    pub applied: u64,
    /// Replays absorbed by proof uniqueness, normally from the reorg window
    pub rescanned_duplicates: u64,
    pub unresolved: u64,
    /// Stopped early on shutdown
    pub interrupted: bool,
}

impl ScanReport {
    fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end,
            ..Default::default()
        }
    }

    fn record(&mut self, outcome: IngestOutcome) {
        match outcome {
            IngestOutcome::Applied { .. } => self.applied += 1,
            IngestOutcome::DuplicateIgnored => self.rescanned_duplicates += 1,
            IngestOutcome::UnresolvedAddress
            | IngestOutcome::UnresolvedCurrency
            | IngestOutcome::Rejected => self.unresolved += 1,
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.interrupted && self.achieved_end == Some(self.end)
    }
}

/// Walks a block range for one network in adaptive chunks.
///
/// Chunks run strictly in increasing block order. Each matched transfer goes
/// to the handler before the chunk counts as done, and only done chunks
/// advance the checkpoint tracker.
pub struct ChainScanner {
    network: Network,
    source: Arc<dyn LogSource>,
    handler: Arc<dyn TransferHandler>,
    config: ScannerConfig,
    chunk_size: ChunkSizeController,
    progress: Arc<RwLock<ScanProgress>>,
    shutdown: Arc<AtomicBool>,
}

impl ChainScanner {
    pub fn new(
        network: Network,
        source: Arc<dyn LogSource>,
        handler: Arc<dyn TransferHandler>,
        config: ScannerConfig,
        progress: Arc<RwLock<ScanProgress>>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let chunk_size =
            ChunkSizeController::new(config.initial_chunk, config.min_chunk, config.max_chunk);
        Self {
            network,
            source,
            handler,
            config,
            chunk_size,
            progress,
            shutdown,
        }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size.get_size()
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Scan `start..=end` starting with `initial_chunk`-sized chunks.
    ///
    /// Returns only after the whole range was handled, or early on
    /// shutdown (`interrupted`). A chunk that keeps failing aborts with
    /// `RetriesExhausted`; the tracker then holds the last good chunk end.
    pub async fn scan(
        &self,
        start: u64,
        end: u64,
        initial_chunk: u64,
        registry: &RegistrySnapshot,
        tracker: &mut CheckpointTracker,
    ) -> Result<ScanReport, ScanError> {
        if start > end {
            return Err(ScanError::InvalidRange { start, end });
        }

        let label = self.network.label.as_str();
        let contracts = registry.contracts();
        let recipients = registry.recipient_filter(self.config.topic_filter_max);
        self.chunk_size.reset(initial_chunk);

        let mut report = ScanReport::new(start, end);
        let mut current = start;

        while current <= end {
            if self.is_shutdown() {
                info!(network = %label, block = current, "Shutdown requested, stopping scan");
                report.interrupted = true;
                break;
            }

            let chunk_end = current.saturating_add(self.chunk_size.get_size()).min(end);
            let query = TransferQuery {
                contracts: contracts.clone(),
                recipients: recipients.clone(),
                from_block: current,
                to_block: chunk_end,
            };

            let outcome = self.fetch_chunk(query).await?;
            let achieved = outcome.achieved_end();
            if let ChunkOutcome::Partial { requested_end, .. } = &outcome {
                debug!(
                    network = %label,
                    from = current,
                    requested_end = *requested_end,
                    achieved_end = achieved,
                    "Chunk narrowed after retries"
                );
            }

            let mut matched: Vec<TransferEvent> = outcome
                .into_events()
                .into_iter()
                .filter(|e| registry.is_watched(&e.to))
                .collect();
            matched.sort_by_key(|e| (e.block_number, e.log_index));

            for event in &matched {
                let result = self
                    .handler
                    .handle(self.network.id, event)
                    .await
                    .map_err(|source| ScanError::Ingest {
                        block: event.block_number,
                        tx_hash: event.proof(),
                        source,
                    })?;
                report.record(result);
                self.progress.write().await.record_outcome(result);
            }

            tracker.advance(achieved).await.map_err(ScanError::Checkpoint)?;
            let next_size = self.chunk_size.report_chunk(matched.len());

            self.progress.write().await.record_chunk(current, achieved);
            recon_metrics::counters::chunks_scanned(label, 1);
            recon_metrics::counters::transfers_matched(label, matched.len() as u64);
            recon_metrics::gauges::set_chunk_size(label, next_size);

            debug!(
                network = %label,
                from = current,
                to = achieved,
                matched = matched.len(),
                next_chunk = next_size,
                "Chunk scanned"
            );

            report.chunks_scanned += 1;
            report.achieved_end = Some(achieved);
            report.matched.extend(matched);
            current = achieved + 1;
        }

        Ok(report)
    }

    /// Fetch one chunk, halving the range on each failure.
    async fn fetch_chunk(&self, mut query: TransferQuery) -> Result<ChunkOutcome, ScanError> {
        let label = self.network.label.as_str();
        let from = query.from_block;
        let requested_end = query.to_block;
        let max_attempts = self.config.max_retries.max(1);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match self.source.transfer_logs(&query).await {
                Ok(events) => {
                    if attempts > 1 {
                        info!(
                            network = %label,
                            from = from,
                            to = query.to_block,
                            attempts = attempts,
                            "Chunk fetch succeeded after retry"
                        );
                    }
                    return Ok(if query.to_block == requested_end {
                        ChunkOutcome::Complete {
                            from,
                            to: requested_end,
                            events,
                        }
                    } else {
                        ChunkOutcome::Partial {
                            from,
                            requested_end,
                            achieved_end: query.to_block,
                            events,
                        }
                    });
                }
                Err(e) if attempts < max_attempts => {
                    let to = query.to_block;
                    let narrowed = from + (to - from) / 2;
                    let message = e.to_string();
                    let delay = Self::retry_delay_for(&message, self.config.retry_delay());
                    let reason = Self::retry_reason(&message);

                    warn!(
                        network = %label,
                        from = from,
                        to = to,
                        next_to = narrowed,
                        attempt = attempts,
                        max_retries = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        reason = reason,
                        error = %e,
                        "Chunk fetch failed, retrying with halved range"
                    );
                    recon_metrics::counters::chunk_retries(label, reason);

                    query.to_block = narrowed;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(
                        network = %label,
                        from = from,
                        to = requested_end,
                        attempts = attempts,
                        error = %e,
                        "Chunk fetch failed after max retries"
                    );
                    return Err(ScanError::RetriesExhausted {
                        from,
                        to: requested_end,
                        attempts,
                        last_error: e.to_string(),
                    });
                }
            }
        }
    }

    /// Rate-limited nodes often say how long to wait; honor that, bounded.
    /// An oversized result is fixed by the narrower range alone.
    fn retry_delay_for(msg: &str, default: Duration) -> Duration {
        let msg = msg.to_lowercase();
        if Self::is_rate_limit_error(&msg) {
            return Self::parse_retry_seconds(&msg)
                .map(Duration::from_secs)
                .unwrap_or(default)
                .min(MAX_RATE_LIMIT_WAIT);
        }
        if is_too_many_logs_message(&msg) {
            return Duration::ZERO;
        }
        default
    }

    fn retry_reason(msg: &str) -> &'static str {
        let lower = msg.to_lowercase();
        if Self::is_rate_limit_error(&lower) {
            "rate_limited"
        } else if is_too_many_logs_message(&lower) {
            "too_many_logs"
        } else {
            "rpc"
        }
    }

    fn is_rate_limit_error(msg: &str) -> bool {
        msg.contains("rate limit")
            || msg.contains("too many requests")
            || msg.contains("429")
            || msg.contains("resource exhausted")
    }

    /// Looks for "retry after 30 seconds", "wait 60s" and similar.
    fn parse_retry_seconds(msg: &str) -> Option<u64> {
        let patterns = [
            r"retry.{0,10}?(\d+)\s*(?:second|sec|s\b)",
            r"wait.{0,10}?(\d+)\s*(?:second|sec|s\b)",
            r"after\s+(\d+)\s*(?:second|sec|s\b)",
            r"(\d+)\s*(?:second|sec)s?\s*(?:delay|wait|retry)",
        ];

        for pattern in patterns {
            if let Ok(re) = regex::Regex::new(pattern) {
                if let Some(secs) = re
                    .captures(msg)
                    .and_then(|caps| caps.get(1))
                    .and_then(|num| num.as_str().parse::<u64>().ok())
                {
                    return Some(secs.max(1));
                }
            }
        }
        None
    }
}
