//! Running test suites and judging their outcomes.
//!
//! - `assertions`: compares an execution outcome with what a case expects
//! - `runner`: drives one suite over one connection
//! - `aggregate`: runs many suites and merges their results

pub mod aggregate;
pub mod assertions;
pub mod result;
pub mod runner;

pub use aggregate::{RunReport, aggregate, run_files, run_suites};
pub use assertions::{FailureReason, Verdict, assert_outcome};
pub use result::{ResultScope, RunState, SuiteRunSummary, TestResult};
pub use runner::{RunnerOptions, SuiteRunner, run_test_case};
