//! Database Engine - opens handles and executes statement batches
//!
//! The session loop is the only caller of these traits; a handle is owned
//! by exactly one session and never shared.

pub mod sqlite;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::Result;
use crate::command::{Statement, StatementResult};

pub use sqlite::SqliteEngine;

/// Options passed to the engine when a handle is opened
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineOptions {
    pub read_only: bool,
}

/// Opens database handles for resolved file paths
pub trait DatabaseEngine: Send + Sync {
    /// Open a handle on an existing, already validated file
    fn open(&self, path: &Path, options: &EngineOptions) -> Result<Box<dyn DatabaseHandle>>;

    /// Delete a database file and its companion files
    fn delete_file(&self, path: &Path) -> Result<()> {
        delete_database_files(path)
    }
}

/// An open database, exclusively owned by one session
pub trait DatabaseHandle: Send {
    fn path(&self) -> &Path;

    /// Execute statements in order, reporting one result per statement.
    ///
    /// Statement failures are reported inside the returned results. An `Err`
    /// means the handle itself is unusable and the owning session must stop.
    fn execute_batch(&mut self, statements: &[Statement]) -> Result<Vec<StatementResult>>;

    fn close(self: Box<Self>) -> Result<()>;
}

/// SQLite companion files that belong to a database file
pub fn companion_paths(path: &Path) -> Vec<PathBuf> {
    ["-journal", "-wal", "-shm"]
        .iter()
        .map(|suffix| {
            let mut os = path.as_os_str().to_owned();
            os.push(suffix);
            PathBuf::from(os)
        })
        .collect()
}

/// Remove a database file, then any companion files left beside it.
///
/// Fails if the database file itself does not exist.
pub fn delete_database_files(path: &Path) -> Result<()> {
    fs::remove_file(path)?;
    for companion in companion_paths(path) {
        match fs::remove_file(&companion) {
            Ok(()) => tracing::debug!(path = %companion.display(), "removed companion file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %companion.display(), "could not remove companion file: {}", e),
        }
    }
    Ok(())
}
