use metrics::{describe_histogram, histogram};
use std::time::Duration;

/// Initialize histogram descriptions
pub fn init() {
    describe_histogram!(
        "recon_rpc_request_duration_seconds",
        "Time for RPC requests"
    );
    describe_histogram!(
        "recon_pass_duration_seconds",
        "Time for one full scanner pass"
    );
    describe_histogram!(
        "recon_settlement_duration_seconds",
        "Time for one settlement execution"
    );
}

/// Record RPC request duration
pub fn rpc_request_duration(duration: Duration, method: &str) {
    histogram!("recon_rpc_request_duration_seconds", "method" => method.to_string())
        .record(duration.as_secs_f64());
}

pub fn pass_duration(network: &str, duration: Duration) {
    histogram!("recon_pass_duration_seconds", "network" => network.to_string())
        .record(duration.as_secs_f64());
}

pub fn settlement_duration(kind: &str, duration: Duration) {
    histogram!("recon_settlement_duration_seconds", "kind" => kind.to_string())
        .record(duration.as_secs_f64());
}
