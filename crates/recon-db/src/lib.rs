pub mod checkpoints;
pub mod config;
pub mod ledger;
pub mod models;
pub mod pool;
pub mod repositories;

pub use checkpoints::PgCheckpointStore;
pub use config::DatabaseConfig;
pub use ledger::PgLedger;
pub use pool::DatabasePool;

use recon_core::ReconError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DatabaseError::UniqueViolation(db.message().to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::Connection(err.to_string())
            }
            _ => DatabaseError::Query(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DatabaseError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DatabaseError::Migration(err.to_string())
    }
}

impl From<DatabaseError> for ReconError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::UniqueViolation(msg) => ReconError::DuplicateProof(msg),
            DatabaseError::Serialization(msg) => ReconError::PermanentData(msg),
            DatabaseError::Connection(msg) => ReconError::Database(format!("connection: {}", msg)),
            other => ReconError::Database(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DatabaseError>;
