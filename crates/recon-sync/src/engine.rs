use dashmap::DashMap;
use recon_core::config::ScannerConfig;
use recon_core::traits::{CheckpointStore, LogSource, TransferHandler};
use recon_core::types::Network;
use recon_core::{ReconError, Result};
use recon_store::ScanProgress;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::select;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, error, info, warn};

use crate::checkpoint::{CheckpointTracker, ReorgPolicy};
use crate::provider::{ProviderManager, RpcLogSource};
use crate::registry::CachedRegistry;
use crate::scanner::{ChainScanner, ScanReport};

/// Outer pass loop for one network.
///
/// A pass reads the durable checkpoint, rewinds by the reorg window, scans
/// up to `head - 1` and flushes. A failed pass is logged and retried from
/// the checkpoint after the pass interval.
pub struct NetworkSupervisor {
    network: Network,
    source: Arc<dyn LogSource>,
    scanner: ChainScanner,
    checkpoints: Arc<dyn CheckpointStore>,
    registry: Arc<CachedRegistry>,
    config: ScannerConfig,
    policy: ReorgPolicy,
    progress: Arc<RwLock<ScanProgress>>,
    shutdown: Arc<AtomicBool>,
}

impl NetworkSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        network: Network,
        source: Arc<dyn LogSource>,
        handler: Arc<dyn TransferHandler>,
        checkpoints: Arc<dyn CheckpointStore>,
        registry: Arc<CachedRegistry>,
        config: ScannerConfig,
        progress: Arc<RwLock<ScanProgress>>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let scanner = ChainScanner::new(
            network.clone(),
            Arc::clone(&source),
            handler,
            config.clone(),
            Arc::clone(&progress),
            Arc::clone(&shutdown),
        );
        Self {
            policy: ReorgPolicy::new(network.reorg_window),
            network,
            source,
            scanner,
            checkpoints,
            registry,
            config,
            progress,
            shutdown,
        }
    }

    /// Run one pass. `Ok(None)` means there was nothing to scan.
    pub async fn run_pass(&self) -> Result<Option<ScanReport>> {
        let label = self.network.label.as_str();
        let pass_start = Instant::now();

        let head = self.source.head_block().await?;
        let end = head.saturating_sub(1);
        let persisted = self.checkpoints.load(label).await?.filter(|b| *b > 0);
        let checkpoint = match persisted {
            Some(block) => block,
            None => {
                info!(network = %label, head = head, "No checkpoint yet, seeding from chain head");
                end
            }
        };
        let start = self.policy.pass_start(checkpoint);

        self.progress.write().await.begin_pass(head);
        recon_metrics::gauges::set_head_block(label, head);

        if start > end {
            debug!(network = %label, start = start, end = end, "Nothing to scan");
            self.progress.write().await.complete_pass();
            return Ok(None);
        }

        let registry = self.registry.snapshot(self.network.id).await?;
        if registry.currencies.is_empty() || registry.watched.is_empty() {
            debug!(
                network = %label,
                currencies = registry.currencies.len(),
                watched = registry.watched.len(),
                "Nothing to watch, skipping pass"
            );
            self.progress.write().await.complete_pass();
            return Ok(None);
        }

        let mut tracker = CheckpointTracker::new(
            label,
            Arc::clone(&self.checkpoints),
            self.config.flush_interval(),
            checkpoint,
            persisted,
        );

        let report = match self
            .scanner
            .scan(start, end, self.config.initial_chunk, &registry, &mut tracker)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                // Chunks finished before the failure are safe to keep
                if let Err(flush_err) = tracker.flush().await {
                    warn!(network = %label, error = %flush_err, "Checkpoint flush after failed pass also failed");
                }
                return Err(e.into());
            }
        };

        tracker.flush().await?;
        self.progress.write().await.complete_pass();

        let duration = pass_start.elapsed();
        recon_metrics::histograms::pass_duration(label, duration);
        recon_metrics::counters::pass_finished(label, true);

        if report.rescanned_duplicates > 0 {
            info!(
                network = %label,
                duplicates = report.rescanned_duplicates,
                window = self.policy.window,
                "Reorg window replayed already-recorded transfers"
            );
        }
        info!(
            network = %label,
            from = start,
            to = report.achieved_end.unwrap_or(start),
            head = head,
            chunks = report.chunks_scanned,
            matched = report.matched.len(),
            applied = report.applied,
            checkpoint = tracker.current(),
            duration_ms = duration.as_millis() as u64,
            "Pass complete"
        );

        Ok(Some(report))
    }

    /// Loop passes until shutdown.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let label = self.network.label.as_str();
        info!(network = %label, reorg_window = self.policy.window, "Scanner started");

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            if let Err(e) = self.run_pass().await {
                error!(network = %label, error = %e, "Pass failed, restarting from checkpoint");
                self.progress.write().await.fail_pass(e.to_string());
                recon_metrics::counters::pass_finished(label, false);
                recon_metrics::counters::errors(1, "scan_pass");
            }

            select! {
                biased;
                _ = shutdown.recv() => {
                    info!(network = %label, "Shutdown signal received");
                    break;
                }
                _ = tokio::time::sleep(self.config.pass_interval()) => {}
            }
        }

        info!(network = %label, "Scanner stopped");
    }
}

/// Runs one supervisor per network, at most one per label at a time.
pub struct SyncEngine {
    config: ScannerConfig,
    checkpoints: Arc<dyn CheckpointStore>,
    registry: Arc<CachedRegistry>,
    handler: Arc<dyn TransferHandler>,
    networks: Vec<(Network, Arc<dyn LogSource>)>,
    leases: DashMap<String, Arc<Mutex<()>>>,
    progress: DashMap<String, Arc<RwLock<ScanProgress>>>,
    /// Shared shutdown flag for graceful termination
    shutdown_flag: Arc<AtomicBool>,
}

impl SyncEngine {
    pub fn new(
        config: ScannerConfig,
        checkpoints: Arc<dyn CheckpointStore>,
        registry: Arc<CachedRegistry>,
        handler: Arc<dyn TransferHandler>,
    ) -> Self {
        Self {
            config,
            checkpoints,
            registry,
            handler,
            networks: Vec::new(),
            leases: DashMap::new(),
            progress: DashMap::new(),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register a network with an explicit log source.
    pub fn add_network(&mut self, network: Network, source: Arc<dyn LogSource>) {
        self.networks.push((network, source));
    }

    /// Register a network reached over its configured HTTP RPC.
    pub fn connect_network(&mut self, network: Network) -> Result<()> {
        let provider = Arc::new(ProviderManager::new(&network.label, &network.rpc_url)?);
        let source = RpcLogSource::new(provider, self.config.rpc_timeout());
        info!(network = %network.label, chain = %network.chain_kind, "RPC provider ready");
        self.add_network(network, Arc::new(source));
        Ok(())
    }

    pub fn networks(&self) -> impl Iterator<Item = &Network> {
        self.networks.iter().map(|(n, _)| n)
    }

    fn progress_handle(&self, label: &str) -> Arc<RwLock<ScanProgress>> {
        self.progress
            .entry(label.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(ScanProgress::new(label))))
            .clone()
    }

    pub async fn progress(&self, label: &str) -> Option<ScanProgress> {
        let handle = self.progress.get(label).map(|p| Arc::clone(&p))?;
        let snapshot = handle.read().await.clone();
        Some(snapshot)
    }

    /// Take the single-flight lease for a network label.
    pub fn try_lease(&self, label: &str) -> Result<OwnedMutexGuard<()>> {
        let lease = self
            .leases
            .entry(label.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lease
            .try_lock_owned()
            .map_err(|_| ReconError::AlreadyRunning(label.to_string()))
    }

    pub fn supervisor(&self, network: &Network, source: Arc<dyn LogSource>) -> NetworkSupervisor {
        NetworkSupervisor::new(
            network.clone(),
            source,
            Arc::clone(&self.handler),
            Arc::clone(&self.checkpoints),
            Arc::clone(&self.registry),
            self.config.clone(),
            self.progress_handle(&network.label),
            Arc::clone(&self.shutdown_flag),
        )
    }

    /// Scan one network until shutdown. Fails fast with `AlreadyRunning`
    /// if another scanner holds the network's lease.
    pub async fn run_network(
        &self,
        network: &Network,
        source: Arc<dyn LogSource>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let _lease = self.try_lease(&network.label)?;
        self.supervisor(network, source).run(shutdown).await;
        Ok(())
    }

    /// Run every registered network until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: broadcast::Receiver<()>) -> Result<()> {
        // Spawn a task to set the shutdown flag when signal is received
        let shutdown_flag = Arc::clone(&self.shutdown_flag);
        let mut shutdown_listener = shutdown.resubscribe();
        tokio::spawn(async move {
            let _ = shutdown_listener.recv().await;
            shutdown_flag.store(true, Ordering::SeqCst);
            info!("Shutdown flag set");
        });

        let mut handles = Vec::with_capacity(self.networks.len());
        for (network, source) in &self.networks {
            let engine = Arc::clone(&self);
            let network = network.clone();
            let source = Arc::clone(source);
            let rx = shutdown.resubscribe();
            handles.push(tokio::spawn(async move {
                if let Err(e) = engine.run_network(&network, source, rx).await {
                    error!(network = %network.label, error = %e, "Scanner did not start");
                }
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Scanner task panicked");
            }
        }

        info!("Sync engine shutdown complete");
        Ok(())
    }

    /// Print current sync status
    pub async fn print_status(&self) {
        for (network, _) in &self.networks {
            let Some(state) = self.progress(&network.label).await else {
                continue;
            };
            info!(
                network = %network.label,
                mode = ?state.mode,
                last_block = ?state.last_scanned_block,
                head = ?state.head_block,
                lag = ?state.lag(),
                passes = state.stats.passes_completed,
                failed_passes = state.stats.passes_failed,
                deposits = state.stats.deposits_applied,
                duplicates = state.stats.duplicates_ignored,
                last_error = ?state.last_error,
                "Current status"
            );
        }
    }
}
