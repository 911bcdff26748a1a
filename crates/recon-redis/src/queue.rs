use crate::connection::RedisConnection;
use crate::keys::{job_key, job_key_prefix, running_key, running_key_prefix, schedule_key};
use crate::RedisError;
use async_trait::async_trait;
use recon_core::error::Result;
use recon_core::traits::JobQueue;
use recon_core::types::{lease_token, JobLease, SettlementJob};
use redis::Script;
use std::sync::Arc;
use tracing::{debug, warn};

/// Admit a job only if its id is neither queued nor leased.
const ENQUEUE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[2]) == 1 or redis.call('EXISTS', KEYS[3]) == 1 then
    return 0
end
redis.call('SET', KEYS[2], ARGV[3])
redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])
return 1
"#;

/// Move due jobs from the schedule to running markers holding the claim token.
const CLAIM_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
local claimed = {}
for _, id in ipairs(ids) do
    redis.call('ZREM', KEYS[1], id)
    local payload = redis.call('GET', ARGV[3] .. id)
    if payload then
        redis.call('DEL', ARGV[3] .. id)
        redis.call('SET', ARGV[4] .. id, ARGV[6], 'PX', ARGV[5])
        table.insert(claimed, payload)
    end
end
return claimed
"#;

const RENEW_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    return 1
end
return 0
"#;

const RESCHEDULE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) ~= ARGV[1] then
    return 0
end
redis.call('SET', KEYS[2], ARGV[2])
redis.call('ZADD', KEYS[3], ARGV[3], ARGV[4])
return 1
"#;

const COMPLETE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

const CANCEL_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 1 then
    redis.call('DEL', KEYS[2])
    return 1
end
return 0
"#;

/// Durable delayed queue on a sorted set. A job id is either queued
/// (payload key + schedule member) or leased (running key with TTL holding
/// the claim token), never both, and never twice.
pub struct RedisJobQueue {
    connection: Arc<RedisConnection>,
    enqueue: Script,
    claim: Script,
    renew: Script,
    reschedule: Script,
    complete: Script,
    cancel: Script,
}

impl RedisJobQueue {
    pub fn new(connection: Arc<RedisConnection>) -> Self {
        Self {
            connection,
            enqueue: Script::new(ENQUEUE_SCRIPT),
            claim: Script::new(CLAIM_SCRIPT),
            renew: Script::new(RENEW_SCRIPT),
            reschedule: Script::new(RESCHEDULE_SCRIPT),
            complete: Script::new(COMPLETE_SCRIPT),
            cancel: Script::new(CANCEL_SCRIPT),
        }
    }

    fn prefix(&self) -> &str {
        &self.connection.config().key_prefix
    }

    fn lease_ms(&self) -> u64 {
        self.connection.config().lease_secs.saturating_mul(1000)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue_at(&self, job: &SettlementJob, run_at_ms: u64) -> Result<bool> {
        let mut conn = self.connection.get_connection();
        let id = job.job_id();
        let payload = serde_json::to_string(job).map_err(RedisError::from)?;

        let admitted: i64 = self
            .enqueue
            .key(schedule_key(self.prefix()))
            .key(job_key(self.prefix(), &id))
            .key(running_key(self.prefix(), &id))
            .arg(&id)
            .arg(run_at_ms)
            .arg(payload)
            .invoke_async(&mut conn)
            .await
            .map_err(RedisError::from)?;

        debug!(job_id = %id, run_at_ms, admitted = admitted == 1, "Enqueue settlement job");
        Ok(admitted == 1)
    }

    async fn claim_due(&self, now_ms: u64, limit: usize) -> Result<Vec<JobLease>> {
        let mut conn = self.connection.get_connection();
        let token = lease_token();
        let payloads: Vec<String> = self
            .claim
            .key(schedule_key(self.prefix()))
            .arg(now_ms)
            .arg(limit)
            .arg(job_key_prefix(self.prefix()))
            .arg(running_key_prefix(self.prefix()))
            .arg(self.lease_ms())
            .arg(&token)
            .invoke_async(&mut conn)
            .await
            .map_err(RedisError::from)?;

        let mut leases = Vec::with_capacity(payloads.len());
        for payload in payloads {
            match serde_json::from_str::<SettlementJob>(&payload) {
                Ok(job) => leases.push(JobLease::new(job, token.clone())),
                Err(e) => warn!(error = %e, payload = %payload, "Dropping undecodable job payload"),
            }
        }
        Ok(leases)
    }

    async fn renew(&self, lease: &JobLease) -> Result<bool> {
        let mut conn = self.connection.get_connection();
        let renewed: i64 = self
            .renew
            .key(running_key(self.prefix(), &lease.job_id()))
            .arg(&lease.token)
            .arg(self.lease_ms())
            .invoke_async(&mut conn)
            .await
            .map_err(RedisError::from)?;
        Ok(renewed == 1)
    }

    async fn reschedule(
        &self,
        lease: &JobLease,
        job: &SettlementJob,
        run_at_ms: u64,
    ) -> Result<bool> {
        let mut conn = self.connection.get_connection();
        let id = job.job_id();
        let payload = serde_json::to_string(job).map_err(RedisError::from)?;

        let requeued: i64 = self
            .reschedule
            .key(running_key(self.prefix(), &id))
            .key(job_key(self.prefix(), &id))
            .key(schedule_key(self.prefix()))
            .arg(&lease.token)
            .arg(payload)
            .arg(run_at_ms)
            .arg(&id)
            .invoke_async(&mut conn)
            .await
            .map_err(RedisError::from)?;
        Ok(requeued == 1)
    }

    async fn complete(&self, lease: &JobLease) -> Result<()> {
        let mut conn = self.connection.get_connection();
        let released: i64 = self
            .complete
            .key(running_key(self.prefix(), &lease.job_id()))
            .arg(&lease.token)
            .invoke_async(&mut conn)
            .await
            .map_err(RedisError::from)?;
        if released == 0 {
            debug!(job_id = %lease.job_id(), "Lease already gone at completion");
        }
        Ok(())
    }

    async fn cancel(&self, job_id: &str) -> Result<bool> {
        let mut conn = self.connection.get_connection();
        let removed: i64 = self
            .cancel
            .key(schedule_key(self.prefix()))
            .key(job_key(self.prefix(), job_id))
            .arg(job_id)
            .invoke_async(&mut conn)
            .await
            .map_err(RedisError::from)?;
        Ok(removed == 1)
    }

    async fn is_running(&self, job_id: &str) -> Result<bool> {
        let mut conn = self.connection.get_connection();
        let exists: i64 = redis::cmd("EXISTS")
            .arg(running_key(self.prefix(), job_id))
            .query_async(&mut conn)
            .await
            .map_err(RedisError::from)?;
        Ok(exists == 1)
    }
}

/// These run against a live server: `REDIS_URL=redis://127.0.0.1 cargo test -- --ignored`
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedisConfig;
    use recon_core::types::{now_millis, JobKind};

    async fn queue() -> (RedisJobQueue, Arc<RedisConnection>) {
        let url = std::env::var("REDIS_URL").expect("REDIS_URL must be set for Redis tests");
        let config = RedisConfig {
            url,
            key_prefix: format!("RECON_TEST_{}", lease_token()),
            lease_secs: 60,
        };
        let connection = Arc::new(RedisConnection::new(config).await.unwrap());
        connection.health_check().await.unwrap();
        (RedisJobQueue::new(connection.clone()), connection)
    }

    #[tokio::test]
    #[ignore]
    async fn test_enqueue_is_single_flight() {
        let (queue, _) = queue().await;
        let job = SettlementJob::new(JobKind::Withdraw, 1);

        assert!(queue.enqueue_at(&job, 0).await.unwrap());
        assert!(!queue.enqueue_at(&job, 0).await.unwrap());

        let claimed = queue.claim_due(now_millis(), 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].job, job);
        assert!(queue.is_running(&job.job_id()).await.unwrap());
        assert!(!queue.enqueue_at(&job, 0).await.unwrap());

        queue.complete(&claimed[0]).await.unwrap();
        assert!(!queue.is_running(&job.job_id()).await.unwrap());
        assert!(queue.enqueue_at(&job, 0).await.unwrap());
    }

    #[tokio::test]
    #[ignore]
    async fn test_reschedule_and_cancel() {
        let (queue, _) = queue().await;
        let job = SettlementJob::new(JobKind::Payout, 2);
        queue.enqueue_at(&job, 0).await.unwrap();
        let lease = queue.claim_due(now_millis(), 1).await.unwrap().remove(0);

        let later = now_millis() + 60_000;
        assert!(queue.reschedule(&lease, &job.with_retry(1), later).await.unwrap());
        queue.complete(&lease).await.unwrap();

        // Not due yet, but cancellable
        assert!(queue.claim_due(now_millis(), 1).await.unwrap().is_empty());
        assert!(queue.cancel(&job.job_id()).await.unwrap());
        assert!(!queue.cancel(&job.job_id()).await.unwrap());
        assert!(queue.claim_due(later, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore]
    async fn test_stale_claim_cannot_touch_newer_claim() {
        let (queue, connection) = queue().await;
        let job = SettlementJob::new(JobKind::Withdraw, 3);
        queue.enqueue_at(&job, 0).await.unwrap();
        let first = queue.claim_due(now_millis(), 1).await.unwrap().remove(0);

        // Let the first lease lapse, then a second worker claims the job
        let mut conn = connection.get_connection();
        let _: i64 = redis::cmd("DEL")
            .arg(running_key(queue.prefix(), &job.job_id()))
            .query_async(&mut conn)
            .await
            .unwrap();
        assert!(queue.enqueue_at(&job, 0).await.unwrap());
        let second = queue.claim_due(now_millis(), 1).await.unwrap().remove(0);

        assert!(!queue.renew(&first).await.unwrap());
        assert!(!queue.reschedule(&first, &job.with_retry(1), 0).await.unwrap());
        queue.complete(&first).await.unwrap();
        assert!(queue.is_running(&job.job_id()).await.unwrap());

        assert!(queue.renew(&second).await.unwrap());
        queue.complete(&second).await.unwrap();
        assert!(!queue.is_running(&job.job_id()).await.unwrap());
    }
}
