use std::process::ExitCode;

use tracing::{error, info};

use crate::testing::{ResultScope, RunReport, TestResult};

pub const ALL_PASSED: &str = "=> All tests executed successfully.";
pub const SOME_FAILED: &str = "=> Some tests failed.";

/// The results as a pretty-printed JSON array.
pub fn render_json(report: &RunReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&report.results)
}

/// Log one line per result followed by the overall verdict.
pub fn log_results(report: &RunReport) {
    for result in &report.results {
        if result.is_success {
            info!("{}", describe(result));
        } else {
            error!(
                "{}: {}",
                describe(result),
                result.message.as_deref().unwrap_or("failed")
            );
        }
    }

    info!("{} passed, {} failed", report.passed(), report.failed());
    info!("{}", summary_line(report));
}

pub fn summary_line(report: &RunReport) -> &'static str {
    if report.is_success {
        ALL_PASSED
    } else {
        SOME_FAILED
    }
}

pub fn exit_code(report: &RunReport) -> ExitCode {
    if report.is_success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn describe(result: &TestResult) -> String {
    let status = if result.is_success { "PASS" } else { "FAIL" };
    match result.scope {
        ResultScope::Test => format!(
            "[{}] {} / {} ({} ms)",
            status, result.suite, result.name, result.duration_ms
        ),
        ResultScope::Suite => format!("[{}] suite {}", status, result.suite),
    }
}
