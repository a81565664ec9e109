//! # Seedbase - Session manager for seed-bootstrapped SQLite databases
//!
//! Manages concurrent access to independently named, file-backed databases.
//!
//! Seedbase provides:
//! - A process-wide session registry with idempotent open
//! - One serialized command queue and worker thread per open database
//! - Bootstrap resolution: locate a valid database file among ranked
//!   candidate locations, or materialize one from a bundled seed asset,
//!   validating every file by its expected byte size
//! - A rusqlite-backed engine executing statement batches

pub mod command;
pub mod engine;
pub mod bootstrap;
pub mod locator;
pub mod session;
pub mod manager;
pub mod diagnostics;
pub mod config;
pub mod ui;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use command::{Pending, QueryOutput, SqlValue, Statement, StatementResult};
pub use engine::{DatabaseEngine, DatabaseHandle, SqliteEngine};
pub use bootstrap::{BootstrapResolver, CandidateLocation};
pub use locator::{DirectoryLocator, StorageLocator};
pub use session::{SessionState, registry::SessionRegistry};
pub use manager::SessionManager;
pub use config::{OpenOptions, SeedbaseConfig};

/// Result type alias for Seedbase operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Seedbase operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Database not open: {0}")]
    NotOpen(String),

    #[error("Bootstrap failed for {name}: {}", trail.join("; "))]
    BootstrapFailed { name: String, trail: Vec<String> },

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Session terminated before the command could run: {0}")]
    SessionTerminated(String),

    #[error("Database is already closing: {0}")]
    AlreadyClosing(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid database name: {0}")]
    InvalidName(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Engine(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
