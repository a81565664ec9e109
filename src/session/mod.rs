//! Sessions - one open database handle and its serialized command queue
//!
//! Every session runs a dedicated worker thread that is the single consumer
//! of its queue. The first command of a session is always `Open`, which runs
//! bootstrap and opens the engine handle. `Close` and `Stop` end the loop.
//! However the loop ends, the worker seals the queue, removes the session
//! from the registry and resolves every command still queued with
//! `SessionTerminated`.

pub mod registry;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};

use crate::bootstrap::{BootstrapResolver, Resolution};
use crate::command::{Command, Responder, Statement, StatementResult};
use crate::config::OpenOptions;
use crate::diagnostics::DiagnosticLog;
use crate::engine::{DatabaseEngine, DatabaseHandle, EngineOptions};
use crate::locator::StorageLocator;
use crate::{Error, Result};

use registry::SessionRegistry;

/// Lifecycle of a session
///
/// `Opening -> Ready -> Draining -> Closed`, or `Opening -> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opening,
    Ready,
    Draining,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Opening => "opening",
            SessionState::Ready => "ready",
            SessionState::Draining => "draining",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        }
    }
}

/// Collaborators shared by all sessions of one manager
pub struct SessionContext {
    pub engine: Arc<dyn DatabaseEngine>,
    pub resolver: BootstrapResolver,
    pub locator: Arc<dyn StorageLocator>,
    pub diagnostics: DiagnosticLog,
}

impl SessionContext {
    /// Run bootstrap for `name`, copying the trail into the diagnostic log
    pub fn bootstrap(&self, name: &str, options: &OpenOptions) -> Result<Resolution> {
        let candidates = self.locator.list_candidates(name, options.expected_size);
        let seed = self.locator.seed_path(name);
        let obsolete = self.locator.obsolete_paths(name);

        self.diagnostics.record(format!("Initializing database {}", name));
        let result = self.resolver.resolve(name, &seed, &candidates, &obsolete);
        match &result {
            Ok(resolution) => {
                for line in &resolution.trail {
                    self.diagnostics.record(line.as_str());
                }
            }
            Err(Error::BootstrapFailed { trail, .. }) => {
                for line in trail {
                    self.diagnostics.record(line.as_str());
                }
                self.diagnostics.error(format!("no valid database file for {}", name));
            }
            Err(e) => self.diagnostics.error(e.to_string()),
        }
        result
    }
}

enum Inbox {
    Open(Sender<Command>),
    Sealed { deleting: bool },
}

/// Registry-visible part of a session: its queue entrance and state
pub struct Session {
    id: u64,
    name: String,
    inbox: Mutex<Inbox>,
    state: Mutex<SessionState>,
    exited: Receiver<()>,
}

impl Session {
    fn new(id: u64, name: &str, sender: Sender<Command>, exited: Receiver<()>) -> Self {
        Self {
            id,
            name: name.to_string(),
            inbox: Mutex::new(Inbox::Open(sender)),
            state: Mutex::new(SessionState::Opening),
            exited,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    fn set_state(&self, state: SessionState) {
        let mut current = lock(&self.state);
        tracing::debug!(db = %self.name, "state {} -> {}", current.as_str(), state.as_str());
        *current = state;
    }

    /// Append a command to the queue; hands it back if the queue is sealed
    pub fn enqueue(&self, command: Command) -> std::result::Result<(), Command> {
        match &*lock(&self.inbox) {
            Inbox::Open(sender) => sender.send(command).map_err(|e| e.into_inner()),
            Inbox::Sealed { .. } => Err(command),
        }
    }

    /// Append a final command and stop accepting any further ones.
    ///
    /// Hands the command back if the queue was already sealed.
    pub fn seal(&self, command: Command) -> std::result::Result<(), Command> {
        let deleting = matches!(command, Command::Close { also_delete: true, .. });
        let mut inbox = lock(&self.inbox);
        match std::mem::replace(&mut *inbox, Inbox::Sealed { deleting }) {
            Inbox::Open(sender) => sender.send(command).map_err(|e| e.into_inner()),
            sealed => {
                *inbox = sealed;
                Err(command)
            }
        }
    }

    /// Stop accepting commands without sending anything
    fn seal_quietly(&self) {
        let mut inbox = lock(&self.inbox);
        if let Inbox::Open(_) = &*inbox {
            *inbox = Inbox::Sealed { deleting: false };
        }
    }

    /// Whether a close, delete or stop has already been accepted
    pub fn is_sealed(&self) -> bool {
        matches!(&*lock(&self.inbox), Inbox::Sealed { .. })
    }

    /// Whether the accepted final command also deletes the database file
    pub fn is_deleting(&self) -> bool {
        matches!(&*lock(&self.inbox), Inbox::Sealed { deleting: true })
    }

    /// Block until the worker thread has finished
    pub fn wait_exited(&self) {
        // Nothing is ever sent; recv returns once the worker drops its end
        let _ = self.exited.recv();
    }

    /// Like `wait_exited`, giving up after `timeout`. Returns whether it exited.
    pub fn wait_exited_timeout(&self, timeout: Duration) -> bool {
        matches!(self.exited.recv_timeout(timeout), Err(RecvTimeoutError::Disconnected))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

enum Flow {
    Continue,
    Exit,
    Fatal(Error),
}

/// The execution loop: sole owner of the session's database handle
pub(crate) struct Worker {
    session: Arc<Session>,
    queue: Receiver<Command>,
    context: Arc<SessionContext>,
    registry: SessionRegistry,
    handle: Option<Box<dyn DatabaseHandle>>,
    options: OpenOptions,
    _exit: Sender<()>,
}

impl Worker {
    pub(crate) fn new(
        session: Arc<Session>,
        queue: Receiver<Command>,
        context: Arc<SessionContext>,
        registry: SessionRegistry,
        exit: Sender<()>,
    ) -> Self {
        Self {
            session,
            queue,
            context,
            registry,
            handle: None,
            options: OpenOptions::default(),
            _exit: exit,
        }
    }

    pub(crate) fn run(mut self) {
        let _span = tracing::info_span!("session", db = %self.session.name).entered();
        tracing::debug!("session worker started");

        while let Ok(command) = self.queue.recv() {
            tracing::debug!(command = command.kind(), "processing command");
            match self.process(command) {
                Flow::Continue => {}
                Flow::Exit => break,
                Flow::Fatal(err) => {
                    tracing::error!("unexpected error, stopping session: {}", err);
                    self.context
                        .diagnostics
                        .error(format!("unexpected error, stopping {}: {}", self.session.name, err));
                    break;
                }
            }
        }
        // Cleanup runs in Drop so that it also happens if the engine panics
    }

    fn process(&mut self, command: Command) -> Flow {
        match command {
            Command::Open { options, respond } => self.open(options, respond),
            Command::ExecuteBatch { statements, respond } => self.execute(statements, respond),
            Command::Close { also_delete, respond } => self.close(also_delete, respond),
            Command::Stop => {
                tracing::debug!("stop requested");
                Flow::Exit
            }
        }
    }

    fn open(&mut self, options: OpenOptions, respond: Responder<()>) -> Flow {
        if self.handle.is_some() {
            if options != self.options {
                tracing::debug!("database already open, keeping the options it was opened with");
            }
            respond.send(Ok(()));
            return Flow::Continue;
        }

        match self.open_handle(&options) {
            Ok(handle) => {
                tracing::info!(path = %handle.path().display(), "database opened");
                self.context
                    .diagnostics
                    .record(format!("DB opened successfully: {}", handle.path().display()));
                self.handle = Some(handle);
                self.options = options;
                self.session.set_state(SessionState::Ready);
                respond.send(Ok(()));
                Flow::Continue
            }
            Err(err) => {
                tracing::error!("error opening database: {}", err);
                self.context
                    .diagnostics
                    .error(format!("error opening {}: {}", self.session.name, err));
                self.session.set_state(SessionState::Failed);
                self.session.seal_quietly();
                self.registry.remove(&self.session);
                respond.send(Err(err));
                Flow::Exit
            }
        }
    }

    fn open_handle(&self, options: &OpenOptions) -> Result<Box<dyn DatabaseHandle>> {
        let resolution = self.context.bootstrap(&self.session.name, options)?;
        self.context.engine.open(&resolution.path, &engine_options(options))
    }

    fn execute(&mut self, statements: Vec<Statement>, respond: Responder<Vec<StatementResult>>) -> Flow {
        let Some(handle) = self.handle.as_mut() else {
            respond.send(Err(Error::NotOpen(self.session.name.clone())));
            return Flow::Continue;
        };

        match handle.execute_batch(&statements) {
            Ok(results) => {
                respond.send(Ok(results));
                if self.options.reopen_after_commit && is_lone_commit(&statements) {
                    if let Err(err) = self.reopen() {
                        return Flow::Fatal(err);
                    }
                }
                Flow::Continue
            }
            Err(err) => {
                respond.send(Err(err.clone()));
                Flow::Fatal(err)
            }
        }
    }

    /// Close and re-open the handle on the same file
    fn reopen(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let path = handle.path().to_path_buf();
        handle.close()?;
        self.handle = Some(self.context.engine.open(&path, &engine_options(&self.options))?);
        tracing::debug!(path = %path.display(), "re-opened database after commit");
        Ok(())
    }

    fn close(&mut self, also_delete: bool, respond: Responder<()>) -> Flow {
        self.session.set_state(SessionState::Draining);
        self.session.seal_quietly();

        let path = self.handle.as_ref().map(|h| h.path().to_path_buf());
        let closed = match self.handle.take() {
            Some(handle) => handle.close(),
            None => Ok(()),
        };

        let result = if also_delete {
            let deleted = match &path {
                Some(path) => self.context.engine.delete_file(path),
                None => Err(Error::NotOpen(self.session.name.clone())),
            };
            closed.and(deleted)
        } else {
            closed
        };

        // Stay registered until the file is gone, so a racing open waits for this exit
        self.registry.remove(&self.session);

        match &result {
            Ok(()) if also_delete => tracing::info!("database closed and deleted"),
            Ok(()) => tracing::info!("database closed"),
            Err(err) => {
                tracing::error!("couldn't close database: {}", err);
                self.context
                    .diagnostics
                    .error(format!("couldn't close {}: {}", self.session.name, err));
            }
        }

        self.session.set_state(SessionState::Closed);
        respond.send(result);
        Flow::Exit
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.session.seal_quietly();
        self.registry.remove(&self.session);

        if let Some(handle) = self.handle.take() {
            tracing::debug!("releasing database handle without close");
            drop(handle);
        }
        if !self.session.state().is_terminal() {
            self.session.set_state(SessionState::Closed);
        }

        let mut terminated = 0;
        while let Ok(command) = self.queue.try_recv() {
            command.terminate(&self.session.name);
            terminated += 1;
        }
        if terminated > 0 {
            tracing::debug!(db = %self.session.name, "{} queued commands terminated", terminated);
        }
        tracing::debug!(db = %self.session.name, "session worker exited");
    }
}

fn engine_options(options: &OpenOptions) -> EngineOptions {
    EngineOptions { read_only: options.read_only }
}

fn is_lone_commit(statements: &[Statement]) -> bool {
    matches!(statements, [only] if only.sql.trim().trim_end_matches(';').eq_ignore_ascii_case("COMMIT"))
}
