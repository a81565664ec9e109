//! Fixtures shared by unit tests

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crossbeam::channel::{Receiver, Sender};
use tempfile::TempDir;

use crate::bootstrap::Materializer;
use crate::command::{QueryOutput, Statement, StatementResult};
use crate::engine::{DatabaseEngine, DatabaseHandle, EngineOptions, delete_database_files};
use crate::locator::DirectoryLocator;
use crate::{Error, Result};

pub const SEED: &[u8] = b"seed";
pub const SEED_SIZE: u64 = SEED.len() as u64;

/// Temp directory with a seed asset and two candidate directories
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("assets")).unwrap();
        fs::write(dir.path().join("assets").join("dict.db"), SEED).unwrap();
        Self { dir }
    }

    pub fn external(&self) -> PathBuf {
        self.dir.path().join("external")
    }

    pub fn internal(&self) -> PathBuf {
        self.dir.path().join("internal")
    }

    pub fn locator(&self) -> DirectoryLocator {
        DirectoryLocator::new(vec![self.external(), self.internal()]).with_seed_dir(self.dir.path().join("assets"))
    }
}

/// Engine that records every call instead of touching a database.
///
/// A statement `BLOCK` waits for the gate to be released, `FAIL` makes the
/// handle report a fatal error.
#[derive(Clone)]
pub struct RecordingEngine {
    events: Arc<Mutex<Vec<String>>>,
    gate: Receiver<()>,
    release: Sender<()>,
    held_deletes: Option<(Sender<()>, Receiver<()>)>,
}

/// Controls a held `delete_file`: `started` fires when a deletion begins,
/// sending on `release` lets it proceed
pub struct DeleteGate {
    pub started: Receiver<()>,
    pub release: Sender<()>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        let (release, gate) = crossbeam::channel::unbounded();
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            gate,
            release,
            held_deletes: None,
        }
    }

    /// Engine whose file deletions wait for the returned gate
    pub fn with_held_deletes() -> (Self, DeleteGate) {
        let (started_tx, started) = crossbeam::channel::unbounded();
        let (release, held) = crossbeam::channel::unbounded();
        let engine = Self { held_deletes: Some((started_tx, held)), ..Self::new() };
        (engine, DeleteGate { started, release })
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| e.as_str() == event).count()
    }

    /// Let one blocked `BLOCK` statement continue
    pub fn release(&self) {
        self.release.send(()).unwrap();
    }
}

impl DatabaseEngine for RecordingEngine {
    fn open(&self, path: &Path, _options: &EngineOptions) -> Result<Box<dyn DatabaseHandle>> {
        self.events.lock().unwrap().push("open".to_string());
        Ok(Box::new(RecordingHandle {
            path: path.to_path_buf(),
            events: self.events.clone(),
            gate: self.gate.clone(),
        }))
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        self.events.lock().unwrap().push("delete".to_string());
        if let Some((started, held)) = &self.held_deletes {
            let _ = started.send(());
            let _ = held.recv();
        }
        delete_database_files(path)
    }
}

/// Materializer that waits for its gate to close, then fails every copy
pub struct HeldFailingCopy {
    pub gate: Receiver<()>,
}

impl Materializer for HeldFailingCopy {
    fn materialize(&self, _seed: &Path, _dest: &Path) -> io::Result<u64> {
        let _ = self.gate.recv();
        Err(io::Error::other("no space left on device"))
    }
}

struct RecordingHandle {
    path: PathBuf,
    events: Arc<Mutex<Vec<String>>>,
    gate: Receiver<()>,
}

impl DatabaseHandle for RecordingHandle {
    fn path(&self) -> &Path {
        &self.path
    }

    fn execute_batch(&mut self, statements: &[Statement]) -> Result<Vec<StatementResult>> {
        let mut results = Vec::new();
        for statement in statements {
            match statement.sql.as_str() {
                "BLOCK" => {
                    let _ = self.gate.recv();
                }
                "FAIL" => return Err(Error::Engine("disk I/O error".to_string())),
                _ => {}
            }
            self.events.lock().unwrap().push(format!("exec {}", statement.sql));
            results.push(StatementResult::Success { result: QueryOutput::default() });
        }
        Ok(results)
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.events.lock().unwrap().push("close".to_string());
        Ok(())
    }
}
