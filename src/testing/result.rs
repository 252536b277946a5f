use std::time::Duration;

use serde::Serialize;

use crate::testing::assertions::Verdict;

/// Lifecycle of one suite run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunState {
    NotStarted,
    Connecting,
    Running,
    Completed,
    ConnectionFailed,
}

/// Whether a result belongs to one test case or stands for the whole suite,
/// e.g. when the database could not be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultScope {
    Test,
    Suite,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub suite: String,
    pub name: String,
    pub scope: ResultScope,
    pub is_success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl TestResult {
    pub fn from_verdict(suite: &str, name: &str, verdict: &Verdict, elapsed: Duration) -> Self {
        Self {
            suite: suite.to_string(),
            name: name.to_string(),
            scope: ResultScope::Test,
            is_success: verdict.is_pass(),
            message: verdict.failure().map(|reason| reason.to_string()),
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn suite_failure(suite: &str, message: impl Into<String>) -> Self {
        Self {
            suite: suite.to_string(),
            name: suite.to_string(),
            scope: ResultScope::Suite,
            is_success: false,
            message: Some(message.into()),
            duration_ms: 0,
        }
    }
}

/// Everything one suite run produced, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct SuiteRunSummary {
    pub suite: String,
    pub state: RunState,
    pub results: Vec<TestResult>,
    /// Set when the suite as a whole failed: unreachable database, lost
    /// connection, or a test file that could not be loaded.
    pub suite_error: Option<String>,
}

impl SuiteRunSummary {
    /// A suite that never got to run.
    pub fn not_run(suite: &str, error: impl Into<String>) -> Self {
        Self {
            suite: suite.to_string(),
            state: RunState::NotStarted,
            results: vec![],
            suite_error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.suite_error.is_none() && self.results.iter().all(|r| r.is_success)
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.is_success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }
}
