//! Assertion checking for executed statements.
//!
//! Compares the outcome of a statement with what its test case expects. Row
//! comparison is positional and stops at the first mismatch, so a failing test
//! always carries exactly one, unambiguous reason.

use crate::db::{ExecutionOutcome, QueryOutput, Row, StatementError};
use crate::suite::{ErrorMatcher, ExpectedRow, Expectation, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Pass,
    Fail(FailureReason),
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            Verdict::Pass => None,
            Verdict::Fail(reason) => Some(reason),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FailureReason {
    #[error("statement failed: {0}")]
    StatementFailed(StatementError),

    #[error("expected failure, got success")]
    ExpectedFailure,

    #[error("expected {expected}, got {actual:?}")]
    ErrorMismatch { expected: String, actual: String },

    #[error("expected a result set, got {0} affected rows")]
    NotARowSet(u64),

    #[error("expected {expected} rows, got {actual}")]
    RowCountMismatch { expected: usize, actual: usize },

    #[error("row {row}: column '{column}' is missing from the result")]
    MissingColumn { row: usize, column: String },

    #[error("row {row}, column '{column}': expected {expected}, got {actual}")]
    ValueMismatch {
        row: usize,
        column: String,
        expected: Value,
        actual: Value,
    },
}

// =============================================================================
// Public API
// =============================================================================

/// Decide whether `outcome` satisfies `expected`.
pub fn assert_outcome(expected: &Expectation, outcome: &ExecutionOutcome) -> Verdict {
    let failure = match expected {
        Expectation::Success => outcome
            .as_ref()
            .err()
            .map(|err| FailureReason::StatementFailed(err.clone())),
        Expectation::Error(matcher) => check_error(matcher.as_ref(), outcome),
        Expectation::Rows(rows) => match outcome {
            Ok(QueryOutput::Rows(actual)) => first_row_mismatch(rows, &actual.rows),
            Ok(QueryOutput::RowCount(affected)) => Some(FailureReason::NotARowSet(*affected)),
            Err(err) => Some(FailureReason::StatementFailed(err.clone())),
        },
    };

    match failure {
        None => Verdict::Pass,
        Some(reason) => Verdict::Fail(reason),
    }
}

// =============================================================================
// Expectation Checks
// =============================================================================

fn check_error(
    matcher: Option<&ErrorMatcher>,
    outcome: &ExecutionOutcome,
) -> Option<FailureReason> {
    let err = match outcome {
        Ok(_) => return Some(FailureReason::ExpectedFailure),
        Err(err) => err,
    };

    let matcher = matcher?;
    let message = err.to_string();
    if matcher.is_match(&message) {
        None
    } else {
        Some(FailureReason::ErrorMismatch {
            expected: matcher.to_string(),
            actual: message,
        })
    }
}

fn first_row_mismatch(expected: &[ExpectedRow], actual: &[Row]) -> Option<FailureReason> {
    if expected.len() != actual.len() {
        return Some(FailureReason::RowCountMismatch {
            expected: expected.len(),
            actual: actual.len(),
        });
    }

    expected
        .iter()
        .zip(actual)
        .enumerate()
        .find_map(|(i, (expected_row, actual_row))| row_mismatch(i, expected_row, actual_row))
}

fn row_mismatch(row: usize, expected: &ExpectedRow, actual: &Row) -> Option<FailureReason> {
    for (column, expected_value) in expected.columns() {
        let Some(actual_value) = actual.get(column) else {
            return Some(FailureReason::MissingColumn {
                row,
                column: column.to_string(),
            });
        };

        if !expected_value.matches(actual_value) {
            return Some(FailureReason::ValueMismatch {
                row,
                column: column.to_string(),
                expected: expected_value.clone(),
                actual: actual_value.clone(),
            });
        }
    }
    None
}

// =============================================================================
// Tests
// =============================================================================
