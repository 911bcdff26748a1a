use metrics::{describe_gauge, gauge};

/// Initialize gauge descriptions
pub fn init() {
    describe_gauge!("recon_checkpoint_block", "Last flushed checkpoint per network");
    describe_gauge!("recon_head_block", "Chain head seen at the start of the last pass");
    describe_gauge!("recon_chunk_size", "Current adaptive chunk size per network");
    describe_gauge!("recon_watched_addresses", "Size of the cached watched-address set");
    describe_gauge!("recon_settlement_workers_busy", "Workers currently executing a job");
}

pub fn set_checkpoint(network: &str, block: u64) {
    gauge!("recon_checkpoint_block", "network" => network.to_string()).set(block as f64);
}

pub fn set_head_block(network: &str, block: u64) {
    gauge!("recon_head_block", "network" => network.to_string()).set(block as f64);
}

pub fn set_chunk_size(network: &str, size: u64) {
    gauge!("recon_chunk_size", "network" => network.to_string()).set(size as f64);
}

pub fn set_watched_addresses(count: usize) {
    gauge!("recon_watched_addresses").set(count as f64);
}

pub fn set_workers_busy(count: usize) {
    gauge!("recon_settlement_workers_busy").set(count as f64);
}
