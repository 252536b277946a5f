//! Database access layer.
//!
//! The runner only talks to the [`Connector`] and [`Connection`] traits. Every
//! backend error is turned into a [`StatementError`] inside the adapter, so
//! callers never see driver types.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::suite::{ConnectionConfig, Value};

pub mod postgres;
pub mod sqlite;

/// One result row: column names mapped to values, in select-list order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: Vec<(String, Value)>,
}

impl Row {
    pub fn new(values: Vec<(String, Value)>) -> Self {
        Self { values }
    }

    /// Look up a column by name. An exact match wins, otherwise the first column
    /// whose name matches ignoring ASCII case.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .or_else(|| {
                self.values
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(column))
            })
            .map(|(_, value)| value)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }
}

/// What a successfully executed statement produced.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Rows(RowSet),
    /// Statements without a result set report the number of affected rows.
    RowCount(u64),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StatementError {
    #[error("{message}")]
    Backend {
        message: String,
        code: Option<String>,
    },

    #[error("statement timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to decode column '{column}': {reason}")]
    Decode { column: String, reason: String },

    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

impl StatementError {
    pub fn backend(message: impl Into<String>) -> Self {
        StatementError::Backend {
            message: message.into(),
            code: None,
        }
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self, StatementError::ConnectionLost(_))
    }
}

/// The raw result of running one statement, before any assertion.
pub type ExecutionOutcome = Result<QueryOutput, StatementError>;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("unsupported connection string scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("failed to connect to '{target}': {reason}")]
    Unreachable { target: String, reason: String },

    #[error("timed out connecting to '{target}' after {timeout:?}")]
    Timeout { target: String, timeout: Duration },
}

#[async_trait]
pub trait Connection: Send {
    /// Run one statement. A `timeout` cancels the statement and yields
    /// [`StatementError::Timeout`].
    async fn execute(&mut self, sql: &str, timeout: Option<Duration>) -> ExecutionOutcome;

    /// Release the session. Dropping a connection releases it as well; `close`
    /// additionally waits for the backend to acknowledge.
    async fn close(self: Box<Self>);
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn Connection>, ConnectionError>;
}

pub type DynConnector = Arc<dyn Connector + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Postgres,
    Sqlite,
}

impl Driver {
    pub fn from_connection_string(conn_str: &str) -> Result<Self, ConnectionError> {
        let url = Url::parse(conn_str)
            .map_err(|err| ConnectionError::InvalidConnectionString(err.to_string()))?;

        match url.scheme() {
            "postgres" | "postgresql" => Ok(Driver::Postgres),
            "sqlite" => Ok(Driver::Sqlite),
            other => Err(ConnectionError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// Picks the backend from the connection string scheme.
#[derive(Debug, Default, Clone, Copy)]
pub struct DriverConnector;

#[async_trait]
impl Connector for DriverConnector {
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn Connection>, ConnectionError> {
        match Driver::from_connection_string(&config.connection_string)? {
            Driver::Postgres => {
                let conn =
                    postgres::PostgresConnection::connect(&config.connection_string, &config.redacted())
                        .await?;
                Ok(Box::new(conn))
            }
            Driver::Sqlite => {
                let location = sqlite::location(&config.connection_string);
                let conn = sqlite::SqliteConnection::open(location).await?;
                Ok(Box::new(conn))
            }
        }
    }
}
