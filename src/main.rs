use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use sqltest::config::Config;
use sqltest::{logs, report, run_app};

#[derive(Parser)]
#[command(name = "sqltest")]
#[command(about = "Run declarative SQL test suites against a database")]
#[command(version, arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every test file matching the given patterns
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Test files or glob patterns, e.g. `tests/**/*.json`
    #[arg(required = true)]
    patterns: Vec<String>,

    /// Print results as JSON instead of log lines
    #[arg(short, long)]
    json: bool,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of suites to run concurrently
    #[arg(short, long)]
    parallel: Option<usize>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let Command::Run(args) = cli.command;

    match run(&args).await {
        Ok(code) => code,
        Err(err) => {
            // logging may not be installed yet, or is off in json mode
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &RunArgs) -> anyhow::Result<ExitCode> {
    let config_path = args.config.as_ref().map(|p| p.to_string_lossy().into_owned());
    let config = Config::load_or_default(config_path.as_deref())?;

    logs::init(config.log.level, !args.json)?;

    let base_dir = std::env::current_dir().context("failed to resolve working directory")?;
    let report = run_app(&config, &args.patterns, &base_dir, args.parallel).await?;

    if args.json {
        println!("{}", report::render_json(&report)?);
    } else {
        report::log_results(&report);
    }

    Ok(report::exit_code(&report))
}
