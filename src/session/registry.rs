//! Session registry
//!
//! Process-wide map from database name to its live session. Uses [`DashMap`]
//! so unrelated sessions never contend on a single lock; insert-if-absent
//! goes through the entry API so concurrent opens of one name create exactly
//! one session. No map reference is ever held while waiting on a session.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{Session, SessionContext, SessionState, Worker};
use crate::command::{Command, Pending, Responder};
use crate::config::OpenOptions;
use crate::{Error, Result};

/// Outcome of `open_or_reuse`
pub enum Admission {
    /// A new session was started; resolves once bootstrap and open finish
    Created(Pending<()>),
    /// A session for the name already existed
    Existing(Arc<Session>),
}

/// Registry of live sessions, cheap to clone and shared with every worker
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Arc<Session>>>,
    context: Arc<SessionContext>,
    next_id: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new(context: Arc<SessionContext>) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            context,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    /// Return the existing session for `name`, or atomically create one and
    /// start its worker.
    ///
    /// Creation does not wait for bootstrap; the returned pending result does.
    pub fn open_or_reuse(&self, name: &str, options: OpenOptions) -> Result<Admission> {
        let (session, queue, exit, pending) = match self.sessions.entry(name.to_string()) {
            Entry::Occupied(entry) => return Ok(Admission::Existing(entry.get().clone())),
            Entry::Vacant(entry) => {
                let (sender, queue) = crossbeam::channel::unbounded();
                let (exit, exited) = crossbeam::channel::bounded(0);
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let session = Arc::new(Session::new(id, name, sender, exited));

                // Queued before the session becomes visible, so it is always first
                let (respond, pending) = Responder::channel(name);
                if session.enqueue(Command::Open { options, respond }).is_err() {
                    return Err(Error::SessionTerminated(name.to_string()));
                }

                entry.insert(session.clone());
                (session, queue, exit, pending)
            }
        };

        tracing::debug!(db = name, id = session.id(), "starting session");
        let worker = Worker::new(session, queue, self.context.clone(), self.clone(), exit);
        std::thread::Builder::new()
            .name(format!("seedbase-{}", name))
            .spawn(move || worker.run())?;

        Ok(Admission::Created(pending))
    }

    pub fn get(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sessions.contains_key(name)
    }

    pub fn state(&self, name: &str) -> Option<SessionState> {
        self.get(name).map(|session| session.state())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Enqueue a command on the session for `name`.
    ///
    /// Returns once the command is queued, not once it has run.
    pub fn submit(&self, name: &str, command: Command) -> Result<()> {
        let session = self.get(name).ok_or_else(|| Error::NotOpen(name.to_string()))?;
        session.enqueue(command).map_err(|rejected| {
            tracing::debug!(db = name, command = rejected.kind(), "session no longer accepts commands");
            Error::SessionTerminated(name.to_string())
        })
    }

    /// Queue the stop pill for `name`; the worker exits without closing its handle
    pub fn stop(&self, name: &str) -> Result<()> {
        let session = self.get(name).ok_or_else(|| Error::NotOpen(name.to_string()))?;
        if session.seal(Command::Stop).is_err() {
            tracing::debug!(db = name, "session already shutting down");
        }
        Ok(())
    }

    /// Remove `session` if it is still the registered one for its name
    pub(crate) fn remove(&self, session: &Session) {
        let removed = self
            .sessions
            .remove_if(session.name(), |_, registered| registered.id() == session.id());
        if removed.is_some() {
            tracing::debug!(db = session.name(), id = session.id(), "session removed from registry");
        }
    }

    /// Close every session and block until all of them have exited.
    ///
    /// Sessions already shutting down are waited for, not closed twice.
    pub fn shutdown_all(&self) {
        loop {
            let sessions: Vec<Arc<Session>> = self.sessions.iter().map(|entry| entry.value().clone()).collect();
            if sessions.is_empty() {
                break;
            }

            tracing::info!("shutting down {} sessions", sessions.len());
            for session in &sessions {
                let (respond, _pending) = Responder::channel(session.name());
                if session.seal(Command::Close { also_delete: false, respond }).is_err() {
                    tracing::debug!(db = session.name(), "session already shutting down");
                }
            }
            for session in &sessions {
                session.wait_exited();
            }
        }
    }
}
