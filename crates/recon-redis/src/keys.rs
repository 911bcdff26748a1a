//! Key builders. Every key lives under the configured prefix.

/// Scanner checkpoint for a network
pub fn state_key(prefix: &str, network: &str) -> String {
    format!("{}:STATE:{}", prefix, network)
}

/// Sorted set of job ids scored by due time (ms)
pub fn schedule_key(prefix: &str) -> String {
    format!("{}:JOBS:SCHEDULE", prefix)
}

/// Payload of a queued job
pub fn job_key(prefix: &str, job_id: &str) -> String {
    format!("{}:JOBS:QUEUED:{}", prefix, job_id)
}

/// Lease marker of a running job
pub fn running_key(prefix: &str, job_id: &str) -> String {
    format!("{}:JOBS:RUNNING:{}", prefix, job_id)
}

/// Prefix shared by queued payload keys, for the claim script
pub fn job_key_prefix(prefix: &str) -> String {
    job_key(prefix, "")
}

pub fn running_key_prefix(prefix: &str) -> String {
    running_key(prefix, "")
}
