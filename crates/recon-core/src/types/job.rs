use crate::types::{now_millis, ChangeType};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Which settlement handler runs a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Withdraw,
    Payout,
}

impl JobKind {
    pub const ALL: [JobKind; 2] = [JobKind::Withdraw, JobKind::Payout];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Withdraw => "withdraw",
            JobKind::Payout => "payout",
        }
    }

    pub fn for_change_type(change_type: ChangeType) -> Option<Self> {
        match change_type {
            ChangeType::Withdraw => Some(JobKind::Withdraw),
            ChangeType::Payout => Some(JobKind::Payout),
            _ => None,
        }
    }

    pub fn job_id(&self, entry_id: i64) -> String {
        format!("{}_{}", self.as_str(), entry_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementJob {
    pub kind: JobKind,
    pub entry_id: i64,
    pub retry_count: u32,
}

impl SettlementJob {
    pub fn new(kind: JobKind, entry_id: i64) -> Self {
        Self {
            kind,
            entry_id,
            retry_count: 0,
        }
    }

    /// Deterministic per entry, so enqueueing twice cannot create two jobs.
    pub fn job_id(&self) -> String {
        self.kind.job_id(self.entry_id)
    }

    pub fn with_retry(&self, retry_count: u32) -> Self {
        Self {
            retry_count,
            ..self.clone()
        }
    }
}

/// A claimed job plus the token naming this claim.
///
/// Renewing, rescheduling and completing only act while the token still
/// matches, so a worker whose lease lapsed cannot release a newer claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLease {
    pub job: SettlementJob,
    pub token: String,
}

impl JobLease {
    pub fn new(job: SettlementJob, token: impl Into<String>) -> Self {
        Self {
            job,
            token: token.into(),
        }
    }

    pub fn job_id(&self) -> String {
        self.job.job_id()
    }
}

static LEASE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Fresh claim token, unique per process and call.
pub fn lease_token() -> String {
    format!(
        "{}-{}-{}",
        std::process::id(),
        now_millis(),
        LEASE_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}
