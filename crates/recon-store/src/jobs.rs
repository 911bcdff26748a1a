use async_trait::async_trait;
use parking_lot::Mutex;
use recon_core::error::Result;
use recon_core::traits::JobQueue;
use recon_core::types::{lease_token, now_millis, JobLease, SettlementJob};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

#[derive(Debug, Default)]
struct QueueState {
    /// (run_at_ms, job_id), ordered by due time
    schedule: BTreeSet<(u64, String)>,
    /// job_id -> (run_at_ms, job)
    queued: HashMap<String, (u64, SettlementJob)>,
    /// job_id -> (lease expiry, claim token)
    running: HashMap<String, (u64, String)>,
}

impl QueueState {
    fn is_running(&self, job_id: &str, now_ms: u64) -> bool {
        self.running.get(job_id).is_some_and(|(exp, _)| *exp > now_ms)
    }

    fn holds(&self, lease: &JobLease) -> bool {
        self.running
            .get(&lease.job_id())
            .is_some_and(|(_, token)| *token == lease.token)
    }

    fn push(&mut self, job: &SettlementJob, run_at_ms: u64) {
        let id = job.job_id();
        if let Some((old_at, _)) = self.queued.remove(&id) {
            self.schedule.remove(&(old_at, id.clone()));
        }
        self.schedule.insert((run_at_ms, id.clone()));
        self.queued.insert(id, (run_at_ms, job.clone()));
    }
}

/// Queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub admitted: u64,
    pub rejected: u64,
    pub rescheduled: u64,
    pub claimed: u64,
    /// Renew, reschedule or complete calls from a claim that was taken over
    pub stale: u64,
}

/// Process-local job queue with the same single-flight rules as the Redis one
#[derive(Debug)]
pub struct MemoryJobQueue {
    state: Mutex<QueueState>,
    stats: Mutex<QueueStats>,
    lease: Duration,
}

impl MemoryJobQueue {
    pub fn new(lease: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            stats: Mutex::new(QueueStats::default()),
            lease,
        }
    }

    pub fn stats(&self) -> QueueStats {
        *self.stats.lock()
    }

    /// Jobs waiting to run, soonest first.
    pub fn queued(&self) -> Vec<(u64, SettlementJob)> {
        let state = self.state.lock();
        state
            .schedule
            .iter()
            .filter_map(|(_, id)| state.queued.get(id).cloned())
            .collect()
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue_at(&self, job: &SettlementJob, run_at_ms: u64) -> Result<bool> {
        let id = job.job_id();
        let mut state = self.state.lock();
        if state.queued.contains_key(&id) || state.is_running(&id, now_millis()) {
            self.stats.lock().rejected += 1;
            return Ok(false);
        }
        state.push(job, run_at_ms);
        self.stats.lock().admitted += 1;
        Ok(true)
    }

    async fn claim_due(&self, now_ms: u64, limit: usize) -> Result<Vec<JobLease>> {
        let mut state = self.state.lock();
        let due: Vec<(u64, String)> = state
            .schedule
            .iter()
            .take_while(|(at, _)| *at <= now_ms)
            .take(limit)
            .cloned()
            .collect();

        let lease_until = now_ms + self.lease.as_millis() as u64;
        let token = lease_token();
        let mut claimed = Vec::with_capacity(due.len());
        for key in due {
            state.schedule.remove(&key);
            if let Some((_, job)) = state.queued.remove(&key.1) {
                state.running.insert(key.1, (lease_until, token.clone()));
                claimed.push(JobLease::new(job, token.clone()));
            }
        }
        self.stats.lock().claimed += claimed.len() as u64;
        Ok(claimed)
    }

    async fn renew(&self, lease: &JobLease) -> Result<bool> {
        let mut state = self.state.lock();
        if !state.holds(lease) {
            self.stats.lock().stale += 1;
            return Ok(false);
        }
        let lease_until = now_millis() + self.lease.as_millis() as u64;
        if let Some(held) = state.running.get_mut(&lease.job_id()) {
            held.0 = lease_until;
        }
        Ok(true)
    }

    async fn reschedule(
        &self,
        lease: &JobLease,
        job: &SettlementJob,
        run_at_ms: u64,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        if !state.holds(lease) {
            self.stats.lock().stale += 1;
            return Ok(false);
        }
        state.push(job, run_at_ms);
        self.stats.lock().rescheduled += 1;
        Ok(true)
    }

    async fn complete(&self, lease: &JobLease) -> Result<()> {
        let mut state = self.state.lock();
        if state.holds(lease) {
            state.running.remove(&lease.job_id());
        } else {
            self.stats.lock().stale += 1;
        }
        Ok(())
    }

    async fn cancel(&self, job_id: &str) -> Result<bool> {
        let mut state = self.state.lock();
        match state.queued.remove(job_id) {
            Some((at, _)) => {
                state.schedule.remove(&(at, job_id.to_string()));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn is_running(&self, job_id: &str) -> Result<bool> {
        Ok(self.state.lock().is_running(job_id, now_millis()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_core::types::JobKind;

    #[tokio::test]
    async fn test_enqueue_is_single_flight() {
        let queue = MemoryJobQueue::default();
        let job = SettlementJob::new(JobKind::Withdraw, 1);

        assert!(queue.enqueue_at(&job, 0).await.unwrap());
        assert!(!queue.enqueue_at(&job, 0).await.unwrap());
        assert_eq!(queue.queued().len(), 1);

        // Still rejected while a worker holds it
        let claimed = queue.claim_due(now_millis(), 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].job, job);
        assert!(!queue.enqueue_at(&job, 0).await.unwrap());

        queue.complete(&claimed[0]).await.unwrap();
        assert!(queue.enqueue_at(&job, 0).await.unwrap());
        assert_eq!(queue.stats().rejected, 2);
    }

    #[tokio::test]
    async fn test_claim_respects_due_time_and_order() {
        let queue = MemoryJobQueue::default();
        let a = SettlementJob::new(JobKind::Payout, 1);
        let b = SettlementJob::new(JobKind::Payout, 2);
        let later = SettlementJob::new(JobKind::Payout, 3);

        queue.enqueue_at(&b, 200).await.unwrap();
        queue.enqueue_at(&a, 100).await.unwrap();
        queue.enqueue_at(&later, 10_000).await.unwrap();

        let claimed: Vec<_> = queue
            .claim_due(500, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|lease| lease.job)
            .collect();
        assert_eq!(claimed, vec![a, b]);
        assert_eq!(queue.queued().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_only_hits_queued_jobs() {
        let queue = MemoryJobQueue::default();
        let queued = SettlementJob::new(JobKind::Withdraw, 1);
        let running = SettlementJob::new(JobKind::Withdraw, 2);

        queue.enqueue_at(&running, 0).await.unwrap();
        queue.claim_due(now_millis(), 1).await.unwrap();
        queue.enqueue_at(&queued, now_millis() + 60_000).await.unwrap();

        assert!(queue.cancel(&queued.job_id()).await.unwrap());
        assert!(!queue.cancel(&queued.job_id()).await.unwrap());
        assert!(!queue.cancel(&running.job_id()).await.unwrap());
        assert!(queue.is_running(&running.job_id()).await.unwrap());
    }

    #[tokio::test]
    async fn test_reschedule_by_holder() {
        let queue = MemoryJobQueue::default();
        let job = SettlementJob::new(JobKind::Withdraw, 7);
        queue.enqueue_at(&job, 0).await.unwrap();
        let lease = queue.claim_due(now_millis(), 1).await.unwrap().remove(0);

        assert!(queue.reschedule(&lease, &job.with_retry(1), 5_000).await.unwrap());
        queue.complete(&lease).await.unwrap();

        let queued = queue.queued();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0], (5_000, job.with_retry(1)));
        assert_eq!(queue.stats().rescheduled, 1);
    }

    #[tokio::test]
    async fn test_expired_lease_readmits() {
        let queue = MemoryJobQueue::new(Duration::from_millis(0));
        let job = SettlementJob::new(JobKind::Payout, 9);
        queue.enqueue_at(&job, 0).await.unwrap();
        queue.claim_due(now_millis(), 1).await.unwrap();

        assert!(!queue.is_running(&job.job_id()).await.unwrap());
        assert!(queue.enqueue_at(&job, 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_renewal_keeps_job_running() {
        let queue = MemoryJobQueue::new(Duration::from_secs(60));
        let job = SettlementJob::new(JobKind::Withdraw, 3);
        queue.enqueue_at(&job, 0).await.unwrap();
        let lease = queue.claim_due(now_millis(), 1).await.unwrap().remove(0);

        assert!(queue.renew(&lease).await.unwrap());
        assert!(queue.is_running(&job.job_id()).await.unwrap());
        assert!(!queue.enqueue_at(&job, 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_claim_cannot_touch_newer_claim() {
        let queue = MemoryJobQueue::new(Duration::from_millis(0));
        let job = SettlementJob::new(JobKind::Withdraw, 4);

        queue.enqueue_at(&job, 0).await.unwrap();
        let first = queue.claim_due(now_millis(), 1).await.unwrap().remove(0);

        // First lease lapsed; recovery requeues and a second worker claims
        assert!(queue.enqueue_at(&job, 0).await.unwrap());
        let second = queue.claim_due(now_millis(), 1).await.unwrap().remove(0);
        assert_ne!(first.token, second.token);

        assert!(!queue.renew(&first).await.unwrap());
        assert!(!queue.reschedule(&first, &job.with_retry(1), 0).await.unwrap());
        queue.complete(&first).await.unwrap();
        assert!(queue.queued().is_empty());
        assert_eq!(queue.stats().stale, 3);

        // The second claim is still the one that counts
        assert!(queue.renew(&second).await.unwrap());
        queue.complete(&second).await.unwrap();
        assert!(queue.enqueue_at(&job, 0).await.unwrap());
    }
}
