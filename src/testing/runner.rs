//! Test case execution against a database.
//!
//! A suite runs on its own connection. Cases run strictly one after another in
//! declaration order, since later cases may depend on what earlier ones wrote.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::RunnerConfig;
use crate::db::{Connection, ConnectionError, DynConnector, ExecutionOutcome, StatementError};
use crate::suite::{ConnectionConfig, TestCase, TestSuite};
use crate::testing::assertions::assert_outcome;
use crate::testing::result::{RunState, SuiteRunSummary, TestResult};

/// Defaults applied when a suite does not set its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerOptions {
    pub statement_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
}

impl From<&RunnerConfig> for RunnerOptions {
    fn from(cfg: &RunnerConfig) -> Self {
        Self {
            statement_timeout: cfg.statement_timeout(),
            connect_timeout: cfg.connect_timeout(),
        }
    }
}

#[derive(Clone)]
pub struct SuiteRunner {
    connector: DynConnector,
    options: RunnerOptions,
}

// =============================================================================
// Public API
// =============================================================================

impl SuiteRunner {
    pub fn new(connector: DynConnector) -> Self {
        Self {
            connector,
            options: RunnerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    /// Run every case of `suite` and collect one result per case.
    ///
    /// Never fails: an unreachable database yields a summary without test
    /// results and with the connection error as suite error.
    pub async fn run(&self, suite: &TestSuite) -> SuiteRunSummary {
        let span = info_span!("suite", suite = %suite.name);
        let summary = self.run_suite(suite).instrument(span).await;
        info!(
            "suite '{}' finished: {} passed, {} failed",
            summary.suite,
            summary.passed(),
            summary.failed()
        );
        summary
    }

    async fn run_suite(&self, suite: &TestSuite) -> SuiteRunSummary {
        let mut run = SuiteRun::new(&suite.name);

        run.advance(RunState::Connecting);
        info!("connecting to {}", suite.connection.redacted());
        let mut conn = match self.connect(&suite.connection).await {
            Ok(conn) => conn,
            Err(err) => {
                error!("suite '{}' could not connect: {}", suite.name, err);
                run.advance(RunState::ConnectionFailed);
                return run.finish(Some(err.to_string()));
            }
        };

        run.advance(RunState::Running);
        let timeout = suite.statement_timeout().or(self.options.statement_timeout);
        let mut suite_error = None;

        for (i, case) in suite.tests.iter().enumerate() {
            let (result, outcome) = run_test_case(conn.as_mut(), &suite.name, case, timeout).await;
            run.results.push(result);

            if let Err(err) = outcome {
                if err.is_connection_lost() {
                    let remaining = suite.tests.len() - i - 1;
                    warn!(
                        "connection lost during test '{}', skipping {} remaining tests",
                        case.name, remaining
                    );
                    suite_error = Some(format!(
                        "connection lost during test '{}': {} remaining tests not run",
                        case.name, remaining
                    ));
                    break;
                }
            }
        }

        conn.close().await;
        run.advance(RunState::Completed);
        run.finish(suite_error)
    }

    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn Connection>, ConnectionError> {
        let connecting = AssertUnwindSafe(self.connector.connect(config)).catch_unwind();
        let limit = config.connect_timeout().or(self.options.connect_timeout);

        let connected = match limit {
            None => connecting.await,
            Some(limit) => match tokio::time::timeout(limit, connecting).await {
                Ok(connected) => connected,
                Err(_) => {
                    return Err(ConnectionError::Timeout {
                        target: config.redacted(),
                        timeout: limit,
                    });
                }
            },
        };

        connected.unwrap_or_else(|panic| {
            Err(ConnectionError::Unreachable {
                target: config.redacted(),
                reason: format!("database adapter panicked: {}", panic_message(&*panic)),
            })
        })
    }
}

/// Execute one case and evaluate it. The raw outcome is handed back so the
/// caller can react to a lost connection.
pub async fn run_test_case(
    conn: &mut dyn Connection,
    suite: &str,
    case: &TestCase,
    timeout: Option<Duration>,
) -> (TestResult, ExecutionOutcome) {
    debug!("running test '{}': {}", case.name, case.sql);
    let start = Instant::now();

    let outcome = execute_isolated(conn, &case.sql, timeout).await;
    let verdict = assert_outcome(&case.expect, &outcome);
    let result = TestResult::from_verdict(suite, &case.name, &verdict, start.elapsed());

    match &result.message {
        None => debug!("test '{}' passed", case.name),
        Some(message) => debug!("test '{}' failed: {}", case.name, message),
    }

    (result, outcome)
}

// =============================================================================
// Internal Helpers
// =============================================================================

/// Tracks the state machine of a single suite run.
struct SuiteRun {
    suite: String,
    state: RunState,
    results: Vec<TestResult>,
}

impl SuiteRun {
    fn new(suite: &str) -> Self {
        Self {
            suite: suite.to_string(),
            state: RunState::NotStarted,
            results: Vec::new(),
        }
    }

    fn advance(&mut self, next: RunState) {
        debug!("suite '{}': {:?} -> {:?}", self.suite, self.state, next);
        self.state = next;
    }

    fn finish(self, suite_error: Option<String>) -> SuiteRunSummary {
        SuiteRunSummary {
            suite: self.suite,
            state: self.state,
            results: self.results,
            suite_error,
        }
    }
}

async fn execute_isolated(
    conn: &mut dyn Connection,
    sql: &str,
    timeout: Option<Duration>,
) -> ExecutionOutcome {
    match AssertUnwindSafe(conn.execute(sql, timeout))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(panic) => Err(StatementError::backend(format!(
            "database adapter panicked: {}",
            panic_message(&*panic)
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
