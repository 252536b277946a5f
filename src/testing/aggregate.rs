use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info};

use crate::suite::{TestSuite, load_suite};
use crate::testing::result::{SuiteRunSummary, TestResult};
use crate::testing::runner::SuiteRunner;

/// Flattened outcome of a whole run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub results: Vec<TestResult>,
    pub is_success: bool,
}

impl RunReport {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.is_success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }
}

/// Merge suite summaries, keeping suite order and each suite's test order.
/// A suite error is appended as a failing suite-level result after the
/// suite's own test results.
pub fn aggregate(summaries: Vec<SuiteRunSummary>) -> RunReport {
    let mut results = Vec::new();
    for summary in summaries {
        results.extend(summary.results);
        if let Some(err) = summary.suite_error {
            results.push(TestResult::suite_failure(&summary.suite, err));
        }
    }

    let is_success = results.iter().all(|r| r.is_success);
    RunReport {
        results,
        is_success,
    }
}

/// Run suites with at most `parallelism` of them in flight. Summaries come
/// back in input order regardless of completion order.
pub async fn run_suites(
    runner: &SuiteRunner,
    suites: &[TestSuite],
    parallelism: usize,
) -> Vec<SuiteRunSummary> {
    stream::iter(suites)
        .map(|suite| runner.run(suite))
        .buffered(parallelism.max(1))
        .collect()
        .await
}

/// Load and run every file. A file that cannot be loaded becomes a failed
/// suite instead of aborting the run.
pub async fn run_files(
    runner: &SuiteRunner,
    paths: &[PathBuf],
    parallelism: usize,
) -> Vec<SuiteRunSummary> {
    stream::iter(paths)
        .map(|path| run_file(runner, path))
        .buffered(parallelism.max(1))
        .collect()
        .await
}

async fn run_file(runner: &SuiteRunner, path: &Path) -> SuiteRunSummary {
    let owned = path.to_path_buf();
    let loaded = match tokio::task::spawn_blocking(move || load_suite(owned)).await {
        Ok(loaded) => loaded.map_err(|err| err.to_string()),
        Err(err) => Err(format!("failed to load {}: {}", path.display(), err)),
    };

    match loaded {
        Ok(suite) => {
            info!("running suite '{}' from {}", suite.name, path.display());
            runner.run(&suite).await
        }
        Err(err) => {
            error!("{}", err);
            SuiteRunSummary::not_run(&path.display().to_string(), err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{QueryOutput, StatementError};
    use crate::suite::Expectation;
    use crate::testing::result::{ResultScope, RunState};
    use crate::testing::runner::tests::{ScriptedConnector, Step, case, suite};
    use std::sync::Arc;
    use std::time::Duration;

    fn passing(suite: &str, name: &str) -> TestResult {
        TestResult {
            suite: suite.to_string(),
            name: name.to_string(),
            scope: ResultScope::Test,
            is_success: true,
            message: None,
            duration_ms: 1,
        }
    }

    #[test]
    fn aggregate_keeps_order_and_appends_suite_errors() {
        let summaries = vec![
            SuiteRunSummary {
                suite: "a".to_string(),
                state: RunState::Completed,
                results: vec![passing("a", "a1"), passing("a", "a2")],
                suite_error: None,
            },
            SuiteRunSummary::not_run("b", "connection refused"),
            SuiteRunSummary {
                suite: "c".to_string(),
                state: RunState::Completed,
                results: vec![passing("c", "c1")],
                suite_error: Some("connection lost".to_string()),
            },
        ];

        let report = aggregate(summaries);

        let names: Vec<(&str, ResultScope)> = report
            .results
            .iter()
            .map(|r| (r.name.as_str(), r.scope))
            .collect();
        assert_eq!(
            names,
            vec![
                ("a1", ResultScope::Test),
                ("a2", ResultScope::Test),
                ("b", ResultScope::Suite),
                ("c1", ResultScope::Test),
                ("c", ResultScope::Suite),
            ]
        );
        assert!(!report.is_success);
        assert_eq!(report.passed(), 3);
        assert_eq!(report.failed(), 2);
        assert_eq!(
            report.results[2].message.as_deref(),
            Some("connection refused")
        );
    }

    #[test]
    fn aggregate_all_passing_is_success() {
        let report = aggregate(vec![SuiteRunSummary {
            suite: "a".to_string(),
            state: RunState::Completed,
            results: vec![passing("a", "a1")],
            suite_error: None,
        }]);
        assert!(report.is_success);
    }

    #[test]
    fn aggregate_nothing_is_success() {
        let report = aggregate(vec![]);
        assert!(report.results.is_empty());
        assert!(report.is_success);
    }

    #[test]
    fn report_serializes_camel_case() {
        let report = aggregate(vec![SuiteRunSummary::not_run("s", "boom")]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["isSuccess"], serde_json::json!(false));
        assert_eq!(json["results"][0]["scope"], serde_json::json!("suite"));
        assert_eq!(json["results"][0]["message"], serde_json::json!("boom"));
    }

    #[tokio::test]
    async fn parallel_runs_keep_input_order() {
        let connector = ScriptedConnector::new(vec![(
            "SELECT broken",
            Step::Outcome(Err(StatementError::backend("broken"))),
        )]);
        let runner = SuiteRunner::new(Arc::new(connector.clone()));

        let suites: Vec<TestSuite> = (0..6)
            .map(|i| {
                suite(
                    &format!("suite-{}", i),
                    vec![case(&format!("t{}", i), "SELECT 1", Expectation::Success)],
                )
            })
            .chain(std::iter::once(suite(
                "suite-broken",
                vec![case("broken", "SELECT broken", Expectation::Success)],
            )))
            .collect();

        let summaries = run_suites(&runner, &suites, 3).await;

        let names: Vec<&str> = summaries.iter().map(|s| s.suite.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "suite-0",
                "suite-1",
                "suite-2",
                "suite-3",
                "suite-4",
                "suite-5",
                "suite-broken"
            ]
        );
        assert_eq!(connector.journal.lock().connects, 7);
        assert_eq!(connector.journal.lock().closes, 7);

        let report = aggregate(summaries);
        assert_eq!(report.results.len(), 7);
        assert_eq!(report.failed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn results_follow_input_order_not_completion_order() {
        // earlier suites take longer, so they finish last
        let sqls: Vec<String> = (0..4).map(|i| format!("SELECT pause_{}", i)).collect();
        let connector = ScriptedConnector::new(
            sqls.iter()
                .enumerate()
                .map(|(i, sql)| {
                    (
                        sql.as_str(),
                        Step::Slow(Duration::from_millis(10 * (4 - i as u64))),
                    )
                })
                .collect(),
        );
        let runner = SuiteRunner::new(Arc::new(connector.clone()));
        let suites: Vec<TestSuite> = sqls
            .iter()
            .enumerate()
            .map(|(i, sql)| {
                suite(
                    &format!("suite-{}", i),
                    vec![case(&format!("t{}", i), sql, Expectation::Success)],
                )
            })
            .collect();

        let summaries = run_suites(&runner, &suites, 4).await;

        let reversed: Vec<String> = sqls.iter().rev().cloned().collect();
        assert_eq!(connector.journal.lock().finished, reversed);

        let names: Vec<&str> = summaries.iter().map(|s| s.suite.as_str()).collect();
        assert_eq!(names, vec!["suite-0", "suite-1", "suite-2", "suite-3"]);
        assert!(summaries.iter().all(|s| s.is_success()));
    }

    #[tokio::test]
    async fn zero_parallelism_still_runs() {
        let connector = ScriptedConnector::new(vec![(
            "SELECT 1",
            Step::Outcome(Ok(QueryOutput::RowCount(0))),
        )]);
        let runner = SuiteRunner::new(Arc::new(connector));
        let suites = vec![suite("only", vec![case("t", "SELECT 1", Expectation::Success)])];

        let summaries = run_suites(&runner, &suites, 0).await;
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].is_success());
    }

    #[tokio::test]
    async fn unreadable_files_become_failed_suites() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.json");
        std::fs::write(
            &good,
            r#"{
                "connection": {"connectionString": "sqlite::memory:"},
                "tests": [{"name": "one", "sql": "SELECT 1", "expect": "success"}]
            }"#,
        )
        .unwrap();
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();

        let connector = ScriptedConnector::new(vec![]);
        let runner = SuiteRunner::new(Arc::new(connector))
            .with_options(crate::testing::runner::RunnerOptions {
                statement_timeout: Some(Duration::from_secs(5)),
                connect_timeout: None,
            });

        let summaries = run_files(&runner, &[bad.clone(), good], 2).await;

        assert_eq!(summaries[0].state, RunState::NotStarted);
        assert_eq!(summaries[0].suite, bad.display().to_string());
        assert!(summaries[0].suite_error.is_some());
        assert_eq!(summaries[1].suite, "good");
        assert!(summaries[1].is_success());
    }
}
