use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, warn};
use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::{InterruptHandle, OpenFlags};

use crate::db::{Connection, ConnectionError, ExecutionOutcome, QueryOutput, Row, RowSet, StatementError};
use crate::suite::Value;

const MEMORY: &str = ":memory:";

/// Virtual machine instructions between two deadline checks.
const PROGRESS_STEPS: i32 = 1_000;

/// Extract the database location from `sqlite:<path>`, `sqlite://<path>` or `sqlite::memory:`.
pub fn location(conn_str: &str) -> &str {
    let rest = conn_str.strip_prefix("sqlite:").unwrap_or(conn_str);
    rest.strip_prefix("//").unwrap_or(rest)
}

/// A single rusqlite connection, driven from the blocking thread pool.
pub struct SqliteConnection {
    conn: Arc<Mutex<rusqlite::Connection>>,
    interrupt: Arc<InterruptHandle>,
}

impl SqliteConnection {
    /// Open an existing database file, or a fresh in-memory database for `:memory:`.
    ///
    /// Missing files are not created: a typo in a test file should fail the suite
    /// instead of silently testing an empty database.
    pub async fn open(location: &str) -> Result<Self, ConnectionError> {
        let target = location.to_string();
        let opened = tokio::task::spawn_blocking(move || open_connection(&target))
            .await
            .map_err(|err| ConnectionError::Unreachable {
                target: location.to_string(),
                reason: err.to_string(),
            })?;

        let conn = opened.map_err(|err| ConnectionError::Unreachable {
            target: location.to_string(),
            reason: err.to_string(),
        })?;

        debug!("opened sqlite database: {}", location);

        let interrupt = Arc::new(conn.get_interrupt_handle());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
        })
    }
}

fn open_connection(location: &str) -> rusqlite::Result<rusqlite::Connection> {
    if location.is_empty() || location == MEMORY {
        return rusqlite::Connection::open_in_memory();
    }

    rusqlite::Connection::open_with_flags(
        location,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn execute(&mut self, sql: &str, timeout: Option<Duration>) -> ExecutionOutcome {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        // the deadline starts now, not when a blocking thread picks the task up
        let deadline = timeout.map(|limit| (Instant::now() + limit, limit));
        let mut task =
            tokio::task::spawn_blocking(move || run_with_deadline(&conn.lock(), &sql, deadline));

        let joined = match timeout {
            None => task.await,
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    // not started yet: dropped before it runs; running: stopped by its deadline
                    task.abort();
                    self.interrupt.interrupt();
                    let _ = task.await;
                    return Err(StatementError::Timeout(limit));
                }
            },
        };

        joined.unwrap_or_else(|err| {
            Err(StatementError::backend(format!(
                "sqlite statement task failed: {}",
                err
            )))
        })
    }

    async fn close(self: Box<Self>) {
        let conn = self.conn;
        let closed = tokio::task::spawn_blocking(move || match Arc::try_unwrap(conn) {
            Ok(conn) => conn.into_inner().close().map_err(|(_, err)| err),
            Err(_) => Ok(()),
        })
        .await;

        match closed {
            Ok(Ok(())) => debug!("closed sqlite database"),
            Ok(Err(err)) => warn!("failed to close sqlite database: {}", err),
            Err(err) => warn!("failed to close sqlite database: {}", err),
        }
    }
}

/// Run `sql`, aborting it from the progress handler once `deadline` has passed.
fn run_with_deadline(
    conn: &rusqlite::Connection,
    sql: &str,
    deadline: Option<(Instant, Duration)>,
) -> ExecutionOutcome {
    let Some((deadline, limit)) = deadline else {
        return run_statement(conn, sql);
    };

    conn.progress_handler(PROGRESS_STEPS, Some(move || Instant::now() >= deadline));
    let outcome = run_statement(conn, sql);
    conn.progress_handler(0, None::<fn() -> bool>);

    match outcome {
        Err(err) if is_interrupted(&err) => Err(StatementError::Timeout(limit)),
        outcome => outcome,
    }
}

fn is_interrupted(err: &StatementError) -> bool {
    match err {
        StatementError::Backend {
            code: Some(code), ..
        } => code.parse::<i32>().ok() == Some(rusqlite::ffi::SQLITE_INTERRUPT),
        _ => false,
    }
}

fn run_statement(conn: &rusqlite::Connection, sql: &str) -> ExecutionOutcome {
    let mut stmt = conn.prepare(sql).map_err(statement_error)?;

    if stmt.column_count() == 0 {
        let affected = stmt.execute([]).map_err(statement_error)?;
        return Ok(QueryOutput::RowCount(affected as u64));
    }

    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();

    let mut rows = stmt.query([]).map_err(statement_error)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(statement_error)? {
        let mut values = Vec::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            let value = row.get_ref(i).map_err(statement_error)?;
            values.push((name.clone(), from_value_ref(value)));
        }
        out.push(Row::new(values));
    }

    Ok(QueryOutput::Rows(RowSet::new(columns, out)))
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Text(hex::encode(bytes)),
    }
}

fn statement_error(err: rusqlite::Error) -> StatementError {
    match &err {
        rusqlite::Error::SqliteFailure(code, message) => StatementError::Backend {
            message: message.clone().unwrap_or_else(|| err.to_string()),
            code: Some(code.extended_code.to_string()),
        },
        _ => StatementError::backend(err.to_string()),
    }
}
