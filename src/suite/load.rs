use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::suite::TestSuite;

#[derive(thiserror::Error, Debug)]
pub enum SuiteLoadError {
    #[error("failed to read test file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed test file '{}': {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("test file '{}' declares no tests", path.display())]
    Empty { path: PathBuf },
}

/// Read and parse a test file. The suite name defaults to the file stem.
pub fn load_suite(path: impl AsRef<Path>) -> Result<TestSuite, SuiteLoadError> {
    let path = path.as_ref();
    debug!("loading test file: {}", path.display());

    let contents = std::fs::read_to_string(path).map_err(|source| SuiteLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let default_name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    parse_suite(&contents, &default_name).map_err(|err| match err {
        SuiteLoadError::Malformed { source, .. } => SuiteLoadError::Malformed {
            path: path.to_path_buf(),
            source,
        },
        SuiteLoadError::Empty { .. } => SuiteLoadError::Empty {
            path: path.to_path_buf(),
        },
        other => other,
    })
}

/// Parse test file contents that are already in memory.
pub fn parse_suite(contents: &str, default_name: &str) -> Result<TestSuite, SuiteLoadError> {
    let mut suite: TestSuite =
        serde_json::from_str(contents).map_err(|source| SuiteLoadError::Malformed {
            path: PathBuf::from(default_name),
            source,
        })?;

    if suite.tests.is_empty() {
        return Err(SuiteLoadError::Empty {
            path: PathBuf::from(default_name),
        });
    }

    if suite.name.trim().is_empty() {
        suite.name = default_name.to_string();
    }

    let mut seen = HashSet::with_capacity(suite.tests.len());
    for case in &suite.tests {
        if !seen.insert(case.name.as_str()) {
            warn!(
                "suite '{}' declares test '{}' more than once",
                suite.name, case.name
            );
        }
    }

    Ok(suite)
}
