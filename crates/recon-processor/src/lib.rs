mod handlers;
mod pipeline;

pub use handlers::LedgerIngestHandler;
pub use pipeline::{EventProcessor, ProcessorStats};
