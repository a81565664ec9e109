//! SQLite engine implementation

use std::path::{Path, PathBuf};

use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, ErrorCode, OpenFlags, ToSql, params_from_iter};

use super::{DatabaseEngine, DatabaseHandle, EngineOptions};
use crate::command::{QueryOutput, SqlValue, Statement, StatementResult};
use crate::{Error, Result};

/// Engine backed by rusqlite connections
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteEngine;

impl SqliteEngine {
    pub fn new() -> Self {
        Self
    }
}

impl DatabaseEngine for SqliteEngine {
    fn open(&self, path: &Path, options: &EngineOptions) -> Result<Box<dyn DatabaseHandle>> {
        Ok(Box::new(SqliteHandle::open(path, options)?))
    }
}

/// An open SQLite connection
pub struct SqliteHandle {
    conn: Connection,
    path: PathBuf,
}

impl SqliteHandle {
    /// Open an existing database file (never creates one)
    pub fn open(path: &Path, options: &EngineOptions) -> Result<Self> {
        let access = if options.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        let flags = access | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        Ok(Self { conn, path: path.to_path_buf() })
    }

    /// Run one statement, returning its rows or counters
    fn execute_one(&self, statement: &Statement) -> rusqlite::Result<QueryOutput> {
        let mut stmt = self.conn.prepare(&statement.sql)?;
        let params = params_from_iter(statement.params.iter());

        if stmt.column_count() > 0 {
            let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
            let width = columns.len();
            let mut rows = Vec::new();
            let mut cursor = stmt.query(params)?;
            while let Some(row) = cursor.next()? {
                let mut values = Vec::with_capacity(width);
                for i in 0..width {
                    values.push(value_from_ref(row.get_ref(i)?));
                }
                rows.push(values);
            }
            return Ok(QueryOutput { columns, rows, rows_affected: 0, insert_id: None });
        }

        let last_rowid = self.conn.last_insert_rowid();
        let rows_affected = stmt.execute(params)?;
        let rowid = self.conn.last_insert_rowid();
        let insert_id = (rows_affected > 0 && rowid != last_rowid).then_some(rowid);

        Ok(QueryOutput { columns: Vec::new(), rows: Vec::new(), rows_affected, insert_id })
    }
}

impl DatabaseHandle for SqliteHandle {
    fn path(&self) -> &Path {
        &self.path
    }

    fn execute_batch(&mut self, statements: &[Statement]) -> Result<Vec<StatementResult>> {
        let mut results = Vec::with_capacity(statements.len());
        for statement in statements {
            match self.execute_one(statement) {
                Ok(result) => results.push(StatementResult::Success { result }),
                Err(e) if is_fatal(&e) => {
                    tracing::error!(path = %self.path.display(), "database fault: {}", e);
                    return Err(Error::Engine(e.to_string()));
                }
                Err(e) => {
                    tracing::debug!(sql = %statement.sql, "statement failed: {}", e);
                    results.push(StatementResult::Error {
                        code: error_code(&e),
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(results)
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.conn.close().map_err(|(_, e)| Error::from(e))
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlValue::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

fn value_from_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(f) => SqlValue::Real(f),
        ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
    }
}

fn error_code(err: &rusqlite::Error) -> Option<i32> {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => Some(e.extended_code),
        _ => None,
    }
}

/// Faults that leave the connection unusable rather than failing one statement
fn is_fatal(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::SystemIoFailure | ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase)
    )
}
