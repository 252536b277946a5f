//! Test definition model.
//!
//! A [`TestSuite`] is one test file: its connection configuration and the ordered
//! list of [`TestCase`]s to run against it. The types are immutable once loaded;
//! the runner only ever borrows them.

use std::fmt;
use std::time::Duration;

use regex::Regex;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};

use crate::config::{deserialize_env_val, serialize_secret};

pub mod load;
mod value;

pub use load::{SuiteLoadError, load_suite, parse_suite};
pub use value::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSuite {
    /// Defaults to the file stem when loaded from disk.
    #[serde(default)]
    pub name: String,
    pub connection: ConnectionConfig,
    pub tests: Vec<TestCase>,
}

impl TestSuite {
    pub fn statement_timeout(&self) -> Option<Duration> {
        self.connection.statement_timeout()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Either a literal connection string or `env:VAR_NAME`.
    #[serde(deserialize_with = "deserialize_env_val")]
    #[serde(serialize_with = "serialize_secret")]
    pub connection_string: String,
    /// Per-statement timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_seconds: Option<u64>,
}

impl ConnectionConfig {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            timeout_seconds: None,
            connect_timeout_seconds: None,
        }
    }

    pub fn statement_timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_seconds.map(Duration::from_secs)
    }

    /// The connection string with any password replaced, safe to log.
    pub fn redacted(&self) -> String {
        match url::Url::parse(&self.connection_string) {
            Ok(mut url) if url.password().is_some() => {
                // set_password only fails for cannot-be-a-base urls, which carry no password
                let _ = url.set_password(Some("****"));
                url.to_string()
            }
            Ok(_) => self.connection_string.clone(),
            Err(_) => "****".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub name: String,
    pub sql: String,
    pub expect: Expectation,
}

/// What a test case expects from executing its statement.
///
/// In a test file this is written as `"success"`, `{"error": null}`,
/// `{"error": {"contains": "..."}}` or `{"rows": [{"col": value, ...}, ...]}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Expectation {
    /// Any successful execution, whatever its shape.
    Success,
    /// A failing execution, optionally with a constraint on the error message.
    Error(Option<ErrorMatcher>),
    /// Exactly these rows, in this order.
    Rows(Vec<ExpectedRow>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorMatcher {
    Contains(String),
    Exact(String),
    #[serde(deserialize_with = "deserialize_regex")]
    Regex(Regex),
}

impl ErrorMatcher {
    pub fn is_match(&self, message: &str) -> bool {
        match self {
            ErrorMatcher::Contains(s) => message.contains(s.as_str()),
            ErrorMatcher::Exact(s) => message == s,
            ErrorMatcher::Regex(r) => r.is_match(message),
        }
    }
}

impl fmt::Display for ErrorMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorMatcher::Contains(s) => write!(f, "error containing {:?}", s),
            ErrorMatcher::Exact(s) => write!(f, "exact error {:?}", s),
            ErrorMatcher::Regex(r) => write!(f, "error matching regex {:?}", r.as_str()),
        }
    }
}

fn deserialize_regex<'de, D>(deserializer: D) -> Result<Regex, D::Error>
where
    D: Deserializer<'de>,
{
    let pattern = String::deserialize(deserializer)?;
    Regex::new(&pattern)
        .map_err(|err| de::Error::custom(format!("invalid regex '{}': {}", pattern, err)))
}

/// The declared columns of one expected row, in declaration order.
///
/// Only the declared columns are checked; any other column of the actual row is ignored.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExpectedRow(Vec<(String, Value)>);

impl ExpectedRow {
    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ExpectedRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

// Hand-written so that declaration order survives without an ordered map.
impl<'de> Deserialize<'de> for ExpectedRow {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = ExpectedRow;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping column names to scalar values")
            }

            fn visit_map<A>(self, mut map: A) -> Result<ExpectedRow, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut columns: Vec<(String, Value)> =
                    Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, value)) = map.next_entry::<String, Value>()? {
                    if columns.iter().any(|(c, _)| *c == name) {
                        return Err(de::Error::custom(format!(
                            "duplicate column '{}' in expected row",
                            name
                        )));
                    }
                    columns.push((name, value));
                }
                Ok(ExpectedRow(columns))
            }
        }

        deserializer.deserialize_map(RowVisitor)
    }
}
