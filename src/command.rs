//! Session commands, statement batches and their completion sinks

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::config::OpenOptions;
use crate::{Error, Result};

/// A value bound to a statement parameter or read back from a result row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Convert a JSON parameter into a bindable value.
    ///
    /// Booleans bind as 0/1 and arrays of bytes bind as blobs; objects are rejected.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        use serde_json::Value;
        match value {
            Value::Null => Ok(SqlValue::Null),
            Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(SqlValue::Integer(i)),
                None => n
                    .as_f64()
                    .map(SqlValue::Real)
                    .ok_or_else(|| Error::Engine(format!("unsupported number parameter: {}", n))),
            },
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|b| u8::try_from(b).ok())
                        .ok_or_else(|| Error::Engine("blob parameters must be arrays of bytes".to_string()))
                })
                .collect::<Result<Vec<u8>>>()
                .map(SqlValue::Blob),
            Value::Object(_) => Err(Error::Engine("object parameters are not supported".to_string())),
        }
    }

    /// Render the value for terminal output
    pub fn display(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Integer(i) => i.to_string(),
            SqlValue::Real(f) => f.to_string(),
            SqlValue::Text(s) => s.clone(),
            SqlValue::Blob(b) => format!("<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

/// One SQL statement of a batch with its bound parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into(), params: Vec::new() }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self { sql: sql.into(), params }
    }
}

/// Rows and counters produced by one successful statement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
    pub rows_affected: usize,
    pub insert_id: Option<i64>,
}

/// Per-statement outcome reported by the engine, in statement order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatementResult {
    Success { result: QueryOutput },
    Error { message: String, code: Option<i32> },
}

impl StatementResult {
    pub fn is_error(&self) -> bool {
        matches!(self, StatementResult::Error { .. })
    }

    pub fn output(&self) -> Option<&QueryOutput> {
        match self {
            StatementResult::Success { result } => Some(result),
            StatementResult::Error { .. } => None,
        }
    }
}

/// A command consumed by a session's execution loop
pub enum Command {
    /// First command of every session; later ones re-attach to the open handle
    Open {
        options: OpenOptions,
        respond: Responder<()>,
    },
    ExecuteBatch {
        statements: Vec<Statement>,
        respond: Responder<Vec<StatementResult>>,
    },
    Close {
        also_delete: bool,
        respond: Responder<()>,
    },
    /// Exit the loop without touching the engine
    Stop,
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Open { .. } => "open",
            Command::ExecuteBatch { .. } => "execute_batch",
            Command::Close { also_delete: false, .. } => "close",
            Command::Close { also_delete: true, .. } => "delete",
            Command::Stop => "stop",
        }
    }

    /// Resolve the command's sink with `SessionTerminated` without running it
    pub fn terminate(self, name: &str) {
        let err = Error::SessionTerminated(name.to_string());
        match self {
            Command::Open { respond, .. } => respond.send(Err(err)),
            Command::ExecuteBatch { respond, .. } => respond.send(Err(err)),
            Command::Close { respond, .. } => respond.send(Err(err)),
            Command::Stop => {}
        }
    }
}

/// Single-use completion sink handed to a session along with a command
pub struct Responder<T> {
    tx: oneshot::Sender<Result<T>>,
}

impl<T> Responder<T> {
    /// Create a sink and the pending result its caller waits on
    pub fn channel(name: &str) -> (Self, Pending<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self { tx },
            Pending {
                name: name.to_string(),
                rx,
            },
        )
    }

    pub fn send(self, result: Result<T>) {
        if self.tx.send(result).is_err() {
            tracing::debug!("caller stopped waiting for the result");
        }
    }
}

/// Result of a submitted command, resolved by the session loop.
///
/// Can be awaited as a future or waited on from a plain thread. A sink that is
/// dropped unresolved (the session died) yields `SessionTerminated`.
pub struct Pending<T> {
    name: String,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Pending<T> {
    /// A pending result that is already resolved
    pub fn ready(name: &str, result: Result<T>) -> Self {
        let (respond, pending) = Responder::channel(name);
        respond.send(result);
        pending
    }

    /// Block the current thread until the command completes.
    ///
    /// Must not be called from within an async runtime; await the value instead.
    pub fn wait(self) -> Result<T> {
        match self.rx.blocking_recv() {
            Ok(result) => result,
            Err(_) => Err(Error::SessionTerminated(self.name)),
        }
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::SessionTerminated(self.name.clone()))),
            Poll::Pending => Poll::Pending,
        }
    }
}
