//! Session manager - the caller-facing surface
//!
//! Wraps the registry with the operations a host application uses:
//! `open`, `execute_batch`, `close`, `delete`, `stop` and `shutdown_all`.
//! Every operation resolves with a definite result; none is left pending.

use std::sync::Arc;

use crate::bootstrap::{BootstrapResolver, Resolution};
use crate::command::{Command, Pending, Responder, Statement, StatementResult};
use crate::config::{OpenOptions, SeedbaseConfig};
use crate::diagnostics::{DEFAULT_CAPACITY, DiagnosticLog};
use crate::engine::{DatabaseEngine, SqliteEngine};
use crate::locator::StorageLocator;
use crate::session::registry::{Admission, SessionRegistry};
use crate::session::{Session, SessionContext, SessionState};
use crate::{Error, Result};

/// Builder for a [`SessionManager`]
pub struct SessionManagerBuilder {
    locator: Arc<dyn StorageLocator>,
    engine: Arc<dyn DatabaseEngine>,
    resolver: BootstrapResolver,
    log_capacity: usize,
}

impl SessionManagerBuilder {
    pub fn engine(mut self, engine: impl DatabaseEngine + 'static) -> Self {
        self.engine = Arc::new(engine);
        self
    }

    pub fn resolver(mut self, resolver: BootstrapResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    pub fn build(self) -> SessionManager {
        let context = Arc::new(SessionContext {
            engine: self.engine,
            resolver: self.resolver,
            locator: self.locator,
            diagnostics: DiagnosticLog::with_capacity(self.log_capacity),
        });
        SessionManager { registry: SessionRegistry::new(context) }
    }
}

/// Owns the session registry; shuts every session down when dropped
pub struct SessionManager {
    registry: SessionRegistry,
}

impl SessionManager {
    /// Manager using the SQLite engine and plain file copies
    pub fn new(locator: impl StorageLocator + 'static) -> Self {
        Self::builder(locator).build()
    }

    pub fn builder(locator: impl StorageLocator + 'static) -> SessionManagerBuilder {
        SessionManagerBuilder {
            locator: Arc::new(locator),
            engine: Arc::new(SqliteEngine::new()),
            resolver: BootstrapResolver::new(),
            log_capacity: DEFAULT_CAPACITY,
        }
    }

    pub fn from_config(config: &SeedbaseConfig) -> Self {
        Self::new(config.locator())
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    fn context(&self) -> &Arc<SessionContext> {
        self.registry.context()
    }

    /// Open `name`, bootstrapping its file if needed.
    ///
    /// Opening a name that is already open succeeds once the existing session
    /// is ready. If that session is shutting down, the returned result waits
    /// for it to exit and for a fresh session to open; the caller never blocks.
    pub fn open(&self, name: &str, options: OpenOptions) -> Pending<()> {
        if let Err(e) = validate_name(name) {
            return Pending::ready(name, Err(e));
        }
        open_session(&self.registry, name, options)
    }

    /// Run a batch of statements on an open database
    pub fn execute_batch(&self, name: &str, statements: Vec<Statement>) -> Pending<Vec<StatementResult>> {
        let (respond, pending) = Responder::channel(name);
        match self.registry.submit(name, Command::ExecuteBatch { statements, respond }) {
            Ok(()) => pending,
            Err(e) => Pending::ready(name, Err(e)),
        }
    }

    /// Close `name`. Closing a database that is not open, or already closing, succeeds.
    pub fn close(&self, name: &str) -> Pending<()> {
        let Some(session) = self.registry.get(name) else {
            return Pending::ready(name, Ok(()));
        };

        let (respond, pending) = Responder::channel(name);
        match session.seal(Command::Close { also_delete: false, respond }) {
            Ok(()) => pending,
            Err(_) => {
                tracing::debug!(db = name, "{}", Error::AlreadyClosing(name.to_string()));
                after_exit(session, name, || Ok(()))
            }
        }
    }

    /// Close `name` if open, then delete its database file.
    ///
    /// When the database is not open, every copy found in the candidate
    /// locations is deleted directly and the result is ready immediately.
    pub fn delete(&self, name: &str) -> Pending<()> {
        if let Err(e) = validate_name(name) {
            return Pending::ready(name, Err(e));
        }

        let Some(session) = self.registry.get(name) else {
            return Pending::ready(name, delete_files(self.context(), name));
        };

        let (respond, pending) = Responder::channel(name);
        match session.seal(Command::Close { also_delete: true, respond }) {
            Ok(()) => pending,
            Err(_) => {
                tracing::debug!(db = name, "{}", Error::AlreadyClosing(name.to_string()));
                if session.is_deleting() {
                    return after_exit(session, name, || Ok(()));
                }
                let context = self.context().clone();
                let owned = name.to_string();
                after_exit(session, name, move || delete_files(&context, &owned))
            }
        }
    }

    /// Force the session for `name` to exit without closing its handle
    pub fn stop(&self, name: &str) -> Result<()> {
        self.registry.stop(name)
    }

    /// Close every open database, blocking until all sessions have exited
    pub fn shutdown_all(&self) {
        self.registry.shutdown_all();
    }

    /// Run bootstrap for `name` without opening it
    pub fn resolve(&self, name: &str, options: &OpenOptions) -> Result<Resolution> {
        validate_name(name)?;
        self.context().bootstrap(name, options)
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    pub fn state(&self, name: &str) -> Option<SessionState> {
        self.registry.state(name)
    }

    pub fn open_databases(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Diagnostic trail of bootstrap and session events, oldest first
    pub fn diagnostics(&self) -> String {
        self.context().diagnostics.render()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if !self.registry.is_empty() {
            tracing::debug!("session manager dropped, closing open databases");
            self.shutdown_all();
        }
    }
}

fn open_session(registry: &SessionRegistry, name: &str, options: OpenOptions) -> Pending<()> {
    let session = match registry.open_or_reuse(name, options) {
        Ok(Admission::Created(pending)) => return pending,
        Ok(Admission::Existing(session)) => session,
        Err(e) => return Pending::ready(name, Err(e)),
    };

    let (respond, pending) = Responder::channel(name);
    if session.enqueue(Command::Open { options, respond }).is_ok() {
        tracing::debug!(db = name, "database already open, re-attaching");
        return pending;
    }

    tracing::debug!(db = name, "session is shutting down, opening again once it exits");
    let registry = registry.clone();
    let owned = name.to_string();
    after_exit(session, name, move || open_session(&registry, &owned, options).wait())
}

/// Resolve with the result of `then`, run once `session` has exited.
///
/// The wait happens on a helper thread so the caller can await the result
/// from inside an async runtime.
fn after_exit<T, F>(session: Arc<Session>, name: &str, then: F) -> Pending<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (respond, pending) = Responder::channel(name);
    let spawned = std::thread::Builder::new()
        .name(format!("seedbase-wait-{}", name))
        .spawn(move || {
            session.wait_exited();
            respond.send(then());
        });
    match spawned {
        Ok(_) => pending,
        Err(e) => Pending::ready(name, Err(e.into())),
    }
}

/// Delete every existing copy of `name` in the candidate locations
fn delete_files(context: &SessionContext, name: &str) -> Result<()> {
    let mut deleted = 0;
    let mut failure = None;
    for candidate in context.locator.list_candidates(name, 0) {
        if !candidate.path.exists() {
            continue;
        }
        match context.engine.delete_file(&candidate.path) {
            Ok(()) => {
                tracing::info!(db = name, path = %candidate.path.display(), "deleted database file");
                deleted += 1;
            }
            Err(e) => {
                tracing::error!(db = name, path = %candidate.path.display(), "couldn't delete database: {}", e);
                context.diagnostics.error(format!("couldn't delete {}: {}", candidate.path.display(), e));
                failure.get_or_insert(e);
            }
        }
    }

    match (deleted, failure) {
        (_, Some(e)) => Err(e),
        (0, None) => Err(Error::Io(format!("couldn't delete database {}: no database file found", name))),
        _ => Ok(()),
    }
}

/// Database names become file names; reject anything that could escape a directory
fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::BootstrapOutcome;
    use crate::testing::{Fixture, HeldFailingCopy, RecordingEngine, SEED_SIZE};

    fn manager(fixture: &Fixture, engine: &RecordingEngine) -> SessionManager {
        SessionManager::builder(fixture.locator()).engine(engine.clone()).build()
    }

    fn batch(sql: &[&str]) -> Vec<Statement> {
        sql.iter().map(|s| Statement::new(*s)).collect()
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("dict").is_ok());
        assert!(validate_name("dict.v2").is_ok());
        for bad in ["", ".", "..", "a/b", "a\\b", "nul\0"] {
            assert_eq!(validate_name(bad), Err(Error::InvalidName(bad.to_string())));
        }
    }

    #[test]
    fn test_open_materializes_and_runs_batches_in_order() {
        let fixture = Fixture::new();
        let engine = RecordingEngine::new();
        let manager = manager(&fixture, &engine);

        manager.open("dict", OpenOptions::new(SEED_SIZE)).wait().unwrap();
        assert!(fixture.external().join("dict.db").exists());
        assert_eq!(manager.state("dict"), Some(SessionState::Ready));

        let first = manager.execute_batch("dict", batch(&["A", "B"]));
        let second = manager.execute_batch("dict", batch(&["C"]));
        assert_eq!(second.wait().unwrap().len(), 1);
        assert_eq!(first.wait().unwrap().len(), 2);

        manager.close("dict").wait().unwrap();
        assert!(!manager.is_open("dict"));
        assert_eq!(engine.events(), vec!["open", "exec A", "exec B", "exec C", "close"]);
    }

    #[test]
    fn test_concurrent_open_creates_one_session() {
        let fixture = Fixture::new();
        let engine = RecordingEngine::new();
        let manager = manager(&fixture, &engine);

        let shared = &manager;
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(move || shared.open("dict", OpenOptions::new(SEED_SIZE)).wait()))
                .collect();
            for handle in handles {
                handle.join().unwrap().unwrap();
            }
        });

        assert_eq!(engine.count("open"), 1);
        assert_eq!(manager.open_databases(), vec!["dict"]);
    }

    #[test]
    fn test_open_without_seed_leaves_no_session() {
        let fixture = Fixture::new();
        let engine = RecordingEngine::new();
        let manager = manager(&fixture, &engine);

        let err = manager.open("missing", OpenOptions::new(SEED_SIZE)).wait().unwrap_err();
        assert!(matches!(err, Error::BootstrapFailed { .. }));
        assert!(!manager.is_open("missing"));
        assert_eq!(engine.count("open"), 0);
        assert!(manager.diagnostics().contains("Error: no valid database file for missing"));

        // The failed session must not block a later attempt
        let err = manager.open("missing", OpenOptions::new(SEED_SIZE)).wait().unwrap_err();
        assert!(matches!(err, Error::BootstrapFailed { .. }));
    }

    #[test]
    fn test_invalid_name_is_rejected() {
        let fixture = Fixture::new();
        let manager = manager(&fixture, &RecordingEngine::new());

        let err = manager.open("../dict", OpenOptions::new(SEED_SIZE)).wait().unwrap_err();
        assert_eq!(err, Error::InvalidName("../dict".to_string()));
        assert!(manager.delete("").wait().is_err());
    }

    #[test]
    fn test_execute_on_unopened_database() {
        let fixture = Fixture::new();
        let manager = manager(&fixture, &RecordingEngine::new());

        let err = manager.execute_batch("dict", batch(&["A"])).wait().unwrap_err();
        assert_eq!(err, Error::NotOpen("dict".to_string()));
        manager.close("dict").wait().unwrap();
    }

    #[test]
    fn test_commands_after_close_are_terminated() {
        let fixture = Fixture::new();
        let engine = RecordingEngine::new();
        let manager = manager(&fixture, &engine);
        manager.open("dict", OpenOptions::new(SEED_SIZE)).wait().unwrap();

        let blocked = manager.execute_batch("dict", batch(&["BLOCK"]));
        let queued = manager.execute_batch("dict", batch(&["A"]));
        let closed = manager.close("dict");
        let late = manager.execute_batch("dict", batch(&["B"]));

        assert_eq!(late.wait().unwrap_err(), Error::SessionTerminated("dict".to_string()));

        engine.release();
        blocked.wait().unwrap();
        queued.wait().unwrap();
        closed.wait().unwrap();
        assert_eq!(engine.events(), vec!["open", "exec BLOCK", "exec A", "close"]);
    }

    #[test]
    fn test_fatal_error_terminates_queued_commands() {
        let fixture = Fixture::new();
        let engine = RecordingEngine::new();
        let manager = manager(&fixture, &engine);
        manager.open("dict", OpenOptions::new(SEED_SIZE)).wait().unwrap();

        let blocked = manager.execute_batch("dict", batch(&["BLOCK"]));
        let failing = manager.execute_batch("dict", batch(&["FAIL"]));
        let queued = manager.execute_batch("dict", batch(&["A"]));

        engine.release();
        blocked.wait().unwrap();
        assert!(matches!(failing.wait(), Err(Error::Engine(_))));
        assert_eq!(queued.wait().unwrap_err(), Error::SessionTerminated("dict".to_string()));
        assert!(!manager.is_open("dict"));
        assert!(manager.diagnostics().contains("unexpected error, stopping dict"));
    }

    #[test]
    fn test_reopen_after_lone_commit() {
        let fixture = Fixture::new();
        let engine = RecordingEngine::new();
        let manager = manager(&fixture, &engine);
        let options = OpenOptions::new(SEED_SIZE).reopen_after_commit(true);
        manager.open("dict", options).wait().unwrap();

        manager.execute_batch("dict", batch(&["COMMIT"])).wait().unwrap();
        manager.execute_batch("dict", batch(&["COMMIT", "A"])).wait().unwrap();

        assert_eq!(engine.events(), vec!["open", "exec COMMIT", "close", "open", "exec COMMIT", "exec A"]);
    }

    #[test]
    fn test_open_twice_reattaches() {
        let fixture = Fixture::new();
        let engine = RecordingEngine::new();
        let manager = manager(&fixture, &engine);

        manager.open("dict", OpenOptions::new(SEED_SIZE)).wait().unwrap();
        manager.open("dict", OpenOptions::new(SEED_SIZE).read_only(true)).wait().unwrap();
        assert_eq!(engine.count("open"), 1);

        manager.close("dict").wait().unwrap();
        // A closed database opens again through a fresh session, reusing the file
        manager.open("dict", OpenOptions::new(SEED_SIZE)).wait().unwrap();
        assert_eq!(engine.count("open"), 2);
        let resolution = manager.resolve("dict", &OpenOptions::new(SEED_SIZE)).unwrap();
        assert_eq!(resolution.outcome, BootstrapOutcome::Reused);
    }

    #[test]
    fn test_delete_open_database() {
        let fixture = Fixture::new();
        let engine = RecordingEngine::new();
        let manager = manager(&fixture, &engine);
        manager.open("dict", OpenOptions::new(SEED_SIZE)).wait().unwrap();
        let path = fixture.external().join("dict.db");
        assert!(path.exists());

        manager.delete("dict").wait().unwrap();
        assert!(!path.exists());
        assert!(!manager.is_open("dict"));
        assert_eq!(engine.count("close"), 1);
    }

    #[test]
    fn test_delete_unopened_removes_every_copy() {
        let fixture = Fixture::new();
        let manager = manager(&fixture, &RecordingEngine::new());
        for dir in [fixture.external(), fixture.internal()] {
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("dict.db"), b"stale copy").unwrap();
        }

        manager.delete("dict").wait().unwrap();
        assert!(!fixture.external().join("dict.db").exists());
        assert!(!fixture.internal().join("dict.db").exists());

        assert!(matches!(manager.delete("dict").wait(), Err(Error::Io(_))));
    }

    #[test]
    fn test_stop_exits_without_closing() {
        let fixture = Fixture::new();
        let engine = RecordingEngine::new();
        let manager = manager(&fixture, &engine);
        manager.open("dict", OpenOptions::new(SEED_SIZE)).wait().unwrap();

        let session = manager.registry().get("dict").unwrap();
        manager.stop("dict").unwrap();
        session.wait_exited();

        assert!(!manager.is_open("dict"));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(engine.count("close"), 0);
        assert_eq!(manager.stop("dict"), Err(Error::NotOpen("dict".to_string())));
    }

    #[test]
    fn test_shutdown_all_closes_everything() {
        let fixture = Fixture::new();
        let assets = fixture.dir.path().join("assets");
        for name in ["notes", "words"] {
            std::fs::copy(assets.join("dict.db"), assets.join(format!("{}.db", name))).unwrap();
        }
        let engine = RecordingEngine::new();
        let manager = manager(&fixture, &engine);

        let mut sessions = Vec::new();
        for name in ["dict", "notes", "words"] {
            manager.open(name, OpenOptions::new(SEED_SIZE)).wait().unwrap();
            sessions.push(manager.registry().get(name).unwrap());
        }
        assert_eq!(manager.open_databases(), vec!["dict", "notes", "words"]);

        manager.shutdown_all();
        assert!(manager.open_databases().is_empty());
        assert!(sessions.iter().all(|s| s.state() == SessionState::Closed));
        assert_eq!(engine.count("close"), 3);
    }

    #[test]
    fn test_open_while_closing_starts_fresh_session() {
        let fixture = Fixture::new();
        let engine = RecordingEngine::new();
        let manager = manager(&fixture, &engine);
        manager.open("dict", OpenOptions::new(SEED_SIZE)).wait().unwrap();
        let old = manager.registry().get("dict").unwrap();

        let blocked = manager.execute_batch("dict", batch(&["BLOCK"]));
        let closed = manager.close("dict");
        assert!(old.is_sealed());

        // Returns at once; the new session starts only after the old one exits
        let reopened = manager.open("dict", OpenOptions::new(SEED_SIZE));
        assert_eq!(engine.count("open"), 1);

        engine.release();
        blocked.wait().unwrap();
        closed.wait().unwrap();
        reopened.wait().unwrap();

        let fresh = manager.registry().get("dict").unwrap();
        assert_ne!(fresh.id(), old.id());
        assert_eq!(fresh.state(), SessionState::Ready);
        assert_eq!(engine.events(), vec!["open", "exec BLOCK", "close", "open"]);
    }

    #[test]
    fn test_reattach_to_failing_open_is_terminated() {
        let fixture = Fixture::new();
        let engine = RecordingEngine::new();
        let (release, gate) = crossbeam::channel::bounded::<()>(0);
        let manager = SessionManager::builder(fixture.locator())
            .engine(engine.clone())
            .resolver(BootstrapResolver::with_materializer(HeldFailingCopy { gate }))
            .build();

        let first = manager.open("dict", OpenOptions::new(SEED_SIZE));
        assert_eq!(manager.state("dict"), Some(SessionState::Opening));
        let second = manager.open("dict", OpenOptions::new(SEED_SIZE));

        drop(release);
        assert!(matches!(first.wait(), Err(Error::BootstrapFailed { .. })));
        assert_eq!(second.wait(), Err(Error::SessionTerminated("dict".to_string())));
        assert!(!manager.is_open("dict"));
        assert_eq!(engine.count("open"), 0);
    }

    #[test]
    fn test_open_during_delete_waits_for_file_removal() {
        let fixture = Fixture::new();
        let (engine, deletes) = RecordingEngine::with_held_deletes();
        let manager = manager(&fixture, &engine);
        manager.open("dict", OpenOptions::new(SEED_SIZE)).wait().unwrap();
        let path = fixture.external().join("dict.db");

        let deleted = manager.delete("dict");
        deletes.started.recv().unwrap();
        // Still registered while its file is being removed
        assert!(manager.is_open("dict"));

        let reopened = manager.open("dict", OpenOptions::new(SEED_SIZE));
        deletes.release.send(()).unwrap();
        deleted.wait().unwrap();
        reopened.wait().unwrap();

        // The fresh session sits on a newly materialized file
        assert_eq!(manager.state("dict"), Some(SessionState::Ready));
        assert!(path.exists());
        assert_eq!(engine.events(), vec!["open", "close", "delete", "open"]);
    }

    #[tokio::test]
    async fn test_close_while_closing_does_not_block_the_caller() {
        let fixture = Fixture::new();
        let engine = RecordingEngine::new();
        let manager = manager(&fixture, &engine);
        manager.open("dict", OpenOptions::new(SEED_SIZE)).await.unwrap();

        let blocked = manager.execute_batch("dict", batch(&["BLOCK"]));
        let first = manager.close("dict");
        let second = manager.close("dict");
        let deleted = manager.delete("dict");

        engine.release();
        blocked.await.unwrap();
        first.await.unwrap();
        second.await.unwrap();
        deleted.await.unwrap();

        assert!(!manager.is_open("dict"));
        assert!(!fixture.external().join("dict.db").exists());
    }

    #[tokio::test]
    async fn test_results_can_be_awaited() {
        let fixture = Fixture::new();
        let engine = RecordingEngine::new();
        let manager = manager(&fixture, &engine);

        manager.open("dict", OpenOptions::new(SEED_SIZE)).await.unwrap();
        let results = manager.execute_batch("dict", batch(&["A"])).await.unwrap();
        assert_eq!(results.len(), 1);
        manager.close("dict").await.unwrap();
    }
}
