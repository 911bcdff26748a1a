use metrics::{counter, describe_counter};

/// Initialize counter descriptions
pub fn init() {
    describe_counter!(
        "recon_chunks_scanned_total",
        "Block chunks fetched and handed to the ledger"
    );
    describe_counter!(
        "recon_chunk_retries_total",
        "Chunk fetches retried with a halved range"
    );
    describe_counter!(
        "recon_transfers_matched_total",
        "Transfers whose recipient is a watched address"
    );
    describe_counter!(
        "recon_ingest_outcomes_total",
        "Ledger ingest results by outcome"
    );
    describe_counter!(
        "recon_passes_total",
        "Scanner passes by result"
    );
    describe_counter!(
        "recon_settlement_outcomes_total",
        "Settlement executions by resulting status"
    );
    describe_counter!(
        "recon_settlement_review_total",
        "Entries flagged for manual review (WEB3_ERROR)"
    );
    describe_counter!(
        "recon_jobs_enqueued_total",
        "Settlement jobs admitted to the queue"
    );
    describe_counter!(
        "recon_errors_total",
        "Total number of errors"
    );
}

pub fn chunks_scanned(network: &str, count: u64) {
    counter!("recon_chunks_scanned_total", "network" => network.to_string()).increment(count);
}

/// `reason` is `too_many_logs`, `rate_limited` or `rpc`
pub fn chunk_retries(network: &str, reason: &'static str) {
    counter!("recon_chunk_retries_total", "network" => network.to_string(), "reason" => reason)
        .increment(1);
}

pub fn transfers_matched(network: &str, count: u64) {
    counter!("recon_transfers_matched_total", "network" => network.to_string()).increment(count);
}

/// Increment ingest outcome counter (`applied`, `duplicate`, `unresolved_*`)
pub fn ingest_outcome(network: &str, outcome: &str) {
    counter!(
        "recon_ingest_outcomes_total",
        "network" => network.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn pass_finished(network: &str, ok: bool) {
    let result = if ok { "ok" } else { "failed" };
    counter!("recon_passes_total", "network" => network.to_string(), "result" => result)
        .increment(1);
}

pub fn settlement_outcome(kind: &str, status: &str) {
    counter!(
        "recon_settlement_outcomes_total",
        "kind" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn flagged_for_review(kind: &str) {
    counter!("recon_settlement_review_total", "kind" => kind.to_string()).increment(1);
}

pub fn jobs_enqueued(kind: &str) {
    counter!("recon_jobs_enqueued_total", "kind" => kind.to_string()).increment(1);
}

/// Increment errors counter
pub fn errors(count: u64, error_type: &str) {
    counter!("recon_errors_total", "type" => error_type.to_string()).increment(count);
}
