use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Networks file not found: {0}")]
    NetworksFileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    #[error("RPC error: {0}")]
    TransientRpc(String),

    #[error("Permanent data error: {0}")]
    PermanentData(String),

    #[error("Duplicate proof: {0}")]
    DuplicateProof(String),

    #[error("Max retries exceeded for blocks {from}..={to} after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded {
        from: u64,
        to: u64,
        attempts: u32,
        last_error: String,
    },

    #[error("Event decode error: {0}")]
    EventDecode(String),

    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: String, requested: String },

    #[error("Ledger entry {id} cannot move from {from} to {to}")]
    InvalidTransition { id: i64, from: String, to: String },

    #[error("Ledger entry {id} already carries proof {existing}")]
    ProofConflict { id: i64, existing: String },

    #[error("Ledger entry not found: {0}")]
    EntryNotFound(i64),

    #[error("Network {0} is already being scanned")]
    AlreadyRunning(String),

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReconError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ReconError::TransientRpc(_) | ReconError::Chain(_) => true,
            ReconError::Database(msg) | ReconError::Queue(msg) => is_retryable_message(msg),
            _ => false,
        }
    }
}

/// Heuristic classification of provider and transport error strings.
pub fn is_retryable_message(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("connection")
        || msg.contains("rate limit")
        || msg.contains("too many requests")
        || msg.contains("429")
        || msg.contains("502")
        || msg.contains("503")
        || msg.contains("504")
        || msg.contains("temporarily unavailable")
        || msg.contains("reset by peer")
        || msg.contains("broken pipe")
}

/// Provider rejected the query because the result set is too large.
pub fn is_too_many_logs_message(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    msg.contains("too many logs")
        || msg.contains("query returned more than")
        || msg.contains("response size exceeded")
        || msg.contains("block range")
        || msg.contains("limit exceeded")
}

pub type Result<T> = std::result::Result<T, ReconError>;
