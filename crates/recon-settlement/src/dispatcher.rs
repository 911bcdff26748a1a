use crate::executor::Execution;
use crate::registry::HandlerRegistry;
use recon_core::traits::{JobQueue, LedgerStore};
use recon_core::types::{
    now_millis, BalanceEffect, ChangeType, JobKind, JobLease, LedgerEntry, LedgerStatus,
    Resolution, SettlementJob,
};
use recon_core::{ReconError, Result, SettlementConfig};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Result of an operator hold request.
#[derive(Debug, Clone, PartialEq)]
pub enum HoldOutcome {
    /// Job removed before it started; the entry is now BLOCKED
    Held(LedgerEntry),
    /// A worker already owns the job
    AlreadyRunning,
    /// Entry already terminal
    NotPending(LedgerStatus),
}

/// Turns PENDING outbound entries into queued jobs and drains them with a
/// bounded worker pool.
pub struct SettlementDispatcher {
    queue: Arc<dyn JobQueue>,
    ledger: Arc<dyn LedgerStore>,
    handlers: Arc<HandlerRegistry>,
    config: SettlementConfig,
    lease_renewal: Duration,
    busy: AtomicUsize,
    /// Shared shutdown flag for graceful termination
    shutdown_flag: Arc<AtomicBool>,
}

impl SettlementDispatcher {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        ledger: Arc<dyn LedgerStore>,
        handlers: Arc<HandlerRegistry>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            queue,
            ledger,
            handlers,
            lease_renewal: config.lease_renewal(),
            config,
            busy: AtomicUsize::new(0),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_lease_renewal(mut self, every: Duration) -> Self {
        self.lease_renewal = every;
        self
    }

    /// Queue settlement for a PENDING entry. Calling it again for the same
    /// entry is a no-op while the job is queued or running.
    pub async fn enqueue_settlement(&self, entry_id: i64, change_type: ChangeType) -> Result<bool> {
        let kind = JobKind::for_change_type(change_type).ok_or_else(|| {
            ReconError::PermanentData(format!("{} entries do not settle on chain", change_type))
        })?;
        self.enqueue(SettlementJob::new(kind, entry_id)).await
    }

    async fn enqueue(&self, job: SettlementJob) -> Result<bool> {
        let admitted = self.queue.enqueue_at(&job, now_millis()).await?;
        if admitted {
            recon_metrics::counters::jobs_enqueued(job.kind.as_str());
            debug!(job_id = %job.job_id(), retry_count = job.retry_count, "Settlement job queued");
        } else {
            debug!(job_id = %job.job_id(), "Settlement job already queued or running");
        }
        Ok(admitted)
    }

    /// Pull a queued job before it starts and block its entry.
    ///
    /// Funds stay debited on a held withdrawal until an operator decides.
    pub async fn hold(&self, entry_id: i64, kind: JobKind) -> Result<HoldOutcome> {
        let job_id = kind.job_id(entry_id);
        let removed = self.queue.cancel(&job_id).await?;
        if !removed && self.queue.is_running(&job_id).await? {
            info!(job_id = %job_id, "Hold refused, job already running");
            return Ok(HoldOutcome::AlreadyRunning);
        }

        let entry = self
            .ledger
            .entry(entry_id)
            .await?
            .ok_or(ReconError::EntryNotFound(entry_id))?;
        if entry.status != LedgerStatus::Pending {
            return Ok(HoldOutcome::NotPending(entry.status));
        }

        let resolution =
            Resolution::failed(LedgerStatus::Blocked, BalanceEffect::None, "Held by operator");
        match self.ledger.finalize(entry_id, resolution).await {
            Ok(blocked) => {
                warn!(job_id = %job_id, was_queued = removed, "Settlement held");
                recon_metrics::counters::settlement_outcome(kind.as_str(), LedgerStatus::Blocked.as_str());
                Ok(HoldOutcome::Held(blocked))
            }
            Err(ReconError::InvalidTransition { .. }) => {
                let status = self
                    .ledger
                    .entry(entry_id)
                    .await?
                    .map(|e| e.status)
                    .unwrap_or(LedgerStatus::Pending);
                Ok(HoldOutcome::NotPending(status))
            }
            Err(e) => Err(e),
        }
    }

    /// Queue every PENDING outbound entry. Job-key dedup keeps jobs that are
    /// already queued or running from being doubled.
    pub async fn recover_pending(&self) -> Result<usize> {
        let pending = self.ledger.pending_outbound().await?;
        let mut queued = 0;
        for entry in &pending {
            let Some(kind) = JobKind::for_change_type(entry.change_type) else {
                continue;
            };
            let job = SettlementJob::new(kind, entry.id).with_retry(entry.retry_count);
            if self.enqueue(job).await? {
                queued += 1;
            }
        }
        if queued > 0 {
            info!(pending = pending.len(), queued, "Recovered pending settlements");
        }
        Ok(queued)
    }

    /// Extend the lease while the job runs so recovery cannot hand the
    /// same job to a second worker.
    fn keep_alive(&self, lease: &JobLease) -> JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let lease = lease.clone();
        let every = self.lease_renewal;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;
                match queue.renew(&lease).await {
                    Ok(true) => debug!(job_id = %lease.job_id(), "Lease renewed"),
                    Ok(false) => {
                        warn!(job_id = %lease.job_id(), "Lease lost while the job was running");
                        break;
                    }
                    Err(e) => warn!(job_id = %lease.job_id(), error = %e, "Lease renewal failed"),
                }
            }
        })
    }

    /// Execute a claimed job and hand it back to the queue.
    pub async fn process(&self, lease: &JobLease) -> Result<Execution> {
        let job = &lease.job;
        let job_id = job.job_id();
        let Some(handler) = self.handlers.resolve(job.kind) else {
            self.queue.complete(lease).await?;
            return Err(ReconError::ConfigParse(format!(
                "No settlement handler for {}",
                job.kind.as_str()
            )));
        };

        let renewal = self.keep_alive(lease);
        let result = handler.execute(job).await;
        renewal.abort();

        let requeue = match &result {
            Ok(Execution::Retry { retry_count }) => Some(job.with_retry(*retry_count)),
            Ok(_) => None,
            Err(e) if e.is_transient() => {
                // Ledger unavailable before a terminal status was written
                warn!(job_id = %job_id, error = %e, "Settlement job failed, requeueing");
                Some(job.clone())
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Settlement job failed");
                recon_metrics::counters::errors(1, "settlement");
                None
            }
        };
        if let Some(next) = requeue {
            let run_at = now_millis() + self.config.retry_backoff().as_millis() as u64;
            if !self.queue.reschedule(lease, &next, run_at).await? {
                warn!(job_id = %job_id, "Lease lost before requeue, leaving the job to its new owner");
            }
        }
        self.queue.complete(lease).await?;
        result
    }

    /// Claim and run due jobs until none are left. Returns the number run.
    pub async fn drain(&self) -> Result<usize> {
        let mut executed = 0;
        loop {
            let leases = self.queue.claim_due(now_millis(), self.config.workers).await?;
            if leases.is_empty() {
                return Ok(executed);
            }
            for lease in &leases {
                if let Err(e) = self.process(lease).await {
                    warn!(job_id = %lease.job_id(), error = %e, "Drained job failed");
                }
                executed += 1;
            }
        }
    }

    async fn work(&self, worker: usize, mut shutdown: broadcast::Receiver<()>) {
        debug!(worker, "Settlement worker started");
        loop {
            if self.shutdown_flag.load(Ordering::Relaxed) {
                break;
            }

            let leases = match self.queue.claim_due(now_millis(), 1).await {
                Ok(leases) => leases,
                Err(e) => {
                    warn!(worker, error = %e, "Failed to claim settlement jobs");
                    Vec::new()
                }
            };

            if leases.is_empty() {
                select! {
                    biased;
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(self.config.poll_interval()) => {}
                }
                continue;
            }

            for lease in &leases {
                let busy = self.busy.fetch_add(1, Ordering::SeqCst) + 1;
                recon_metrics::gauges::set_workers_busy(busy);
                if let Err(e) = self.process(lease).await {
                    error!(worker, job_id = %lease.job_id(), error = %e, "Settlement job errored");
                }
                let busy = self.busy.fetch_sub(1, Ordering::SeqCst) - 1;
                recon_metrics::gauges::set_workers_busy(busy);
            }
        }
        debug!(worker, "Settlement worker stopped");
    }

    async fn recover_periodically(&self, mut shutdown: broadcast::Receiver<()>) {
        let interval = Duration::from_secs(self.config.recovery_interval_secs.max(1));
        loop {
            select! {
                biased;
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            if let Err(e) = self.recover_pending().await {
                warn!(error = %e, "Settlement recovery failed");
            }
        }
    }

    /// Run the worker pool until shutdown. In-flight jobs finish first.
    pub async fn run(self: Arc<Self>, shutdown: broadcast::Receiver<()>) -> Result<()> {
        self.handlers.ensure_complete()?;

        // Spawn a task to set the shutdown flag when signal is received
        let shutdown_flag = Arc::clone(&self.shutdown_flag);
        let mut shutdown_listener = shutdown.resubscribe();
        tokio::spawn(async move {
            let _ = shutdown_listener.recv().await;
            shutdown_flag.store(true, Ordering::SeqCst);
        });

        match self.recover_pending().await {
            Ok(queued) => info!(queued, "Startup settlement recovery complete"),
            Err(e) => warn!(error = %e, "Startup settlement recovery failed"),
        }

        info!(workers = self.config.workers, "Settlement dispatcher started");
        let mut handles = Vec::with_capacity(self.config.workers + 1);
        for worker in 0..self.config.workers {
            let dispatcher = Arc::clone(&self);
            let rx = shutdown.resubscribe();
            handles.push(tokio::spawn(async move { dispatcher.work(worker, rx).await }));
        }
        let dispatcher = Arc::clone(&self);
        let rx = shutdown.resubscribe();
        handles.push(tokio::spawn(async move { dispatcher.recover_periodically(rx).await }));

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Settlement task panicked");
            }
        }

        info!("Settlement dispatcher stopped");
        Ok(())
    }
}
