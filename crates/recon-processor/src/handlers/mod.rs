mod deposit;

pub use deposit::LedgerIngestHandler;
