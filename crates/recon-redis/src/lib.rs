pub mod checkpoints;
pub mod config;
pub mod connection;
pub mod keys;
pub mod queue;

pub use checkpoints::RedisCheckpointStore;
pub use config::RedisConfig;
pub use connection::RedisConnection;
pub use queue::RedisJobQueue;

use recon_core::ReconError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RedisError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Command error: {0}")]
    Command(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<redis::RedisError> for RedisError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
            RedisError::Connection(err.to_string())
        } else {
            RedisError::Command(err.to_string())
        }
    }
}

impl From<serde_json::Error> for RedisError {
    fn from(err: serde_json::Error) -> Self {
        RedisError::Serialization(err.to_string())
    }
}

impl From<RedisError> for ReconError {
    fn from(err: RedisError) -> Self {
        match err {
            RedisError::Connection(msg) => ReconError::Queue(format!("connection: {}", msg)),
            other => ReconError::Queue(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RedisError>;
