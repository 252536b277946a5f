use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

pub mod config;
pub mod db;
pub mod discovery;
pub mod logs;
pub mod report;
pub mod suite;
pub mod testing;

use config::Config;
use db::DriverConnector;
use testing::{RunReport, RunnerOptions, SuiteRunner};

/// Discover, load and run every suite matching `patterns`.
///
/// `parallel` overrides the configured number of concurrently running suites.
pub async fn run_app<S: AsRef<str>>(
    config: &Config,
    patterns: &[S],
    base_dir: &Path,
    parallel: Option<usize>,
) -> anyhow::Result<RunReport> {
    debug!("config: {:?}", config);

    let files = discovery::discover(patterns, base_dir)?;
    if files.is_empty() {
        warn!("no test files found");
    }

    let runner = SuiteRunner::new(Arc::new(DriverConnector))
        .with_options(RunnerOptions::from(&config.runner));
    let parallelism = parallel.unwrap_or(config.runner.parallel_suites);

    let summaries = testing::run_files(&runner, &files, parallelism).await;
    Ok(testing::aggregate(summaries))
}
