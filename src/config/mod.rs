use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::logs::LogLevel;

pub const DEFAULT_PARALLEL_SUITES: usize = 1;

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let cfg = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&cfg)?)
    }

    /// Load the config file if one was given, otherwise fall back to defaults.
    pub fn load_or_default(path: Option<&str>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct RunnerConfig {
    /// How many suites may run at the same time. Cases inside a suite never do.
    #[serde(default = "default_parallel_suites")]
    pub parallel_suites: usize,
    /// Applied to every statement unless the suite sets its own timeout.
    pub statement_timeout_sec: Option<u64>,
    pub connect_timeout_sec: Option<u64>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            parallel_suites: DEFAULT_PARALLEL_SUITES,
            statement_timeout_sec: None,
            connect_timeout_sec: None,
        }
    }
}

impl RunnerConfig {
    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout_sec.map(Duration::from_secs)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_sec.map(Duration::from_secs)
    }
}

fn default_parallel_suites() -> usize {
    DEFAULT_PARALLEL_SUITES
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct LogConfig {
    #[serde(default, deserialize_with = "deserialize_log_level")]
    pub level: Option<LogLevel>,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<Option<LogLevel>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    let level: Option<String> = Option::deserialize(deserializer)?;
    level
        .map(|l| {
            LogLevel::from_str(&l).ok_or_else(|| Error::custom(format!("unknown log level '{}'", l)))
        })
        .transpose()
}

pub(crate) fn serialize_secret<S>(_: &str, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str("****")
}

/// Resolve `env:NAME` values from the environment, pass anything else through.
pub(crate) fn deserialize_env_val<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    let val = String::deserialize(deserializer)?;

    let Some(env_key) = val.strip_prefix("env:") else {
        return Ok(val);
    };

    std::env::var(env_key).map_err(|err| {
        Error::custom(format!(
            "Environment variable '{}' not found: '{}'",
            env_key, err
        ))
    })
}
