pub mod config;
pub mod counters;
pub mod gauges;
pub mod histograms;
pub mod server;

pub use config::MetricsConfig;
pub use server::MetricsServer;

use recon_core::ReconError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Server error: {0}")]
    Server(String),

    #[error("Recorder error: {0}")]
    Recorder(String),
}

impl From<MetricsError> for ReconError {
    fn from(err: MetricsError) -> Self {
        ReconError::Io(std::io::Error::other(err.to_string()))
    }
}

pub type Result<T> = std::result::Result<T, MetricsError>;

/// Register descriptions for every metric the reconciler emits.
pub fn describe_all() {
    counters::init();
    gauges::init();
    histograms::init();
}
