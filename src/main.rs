use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::path::{Path, PathBuf};

use spabuild::config::Config;
use spabuild::error::RunError;
use spabuild::log;
use spabuild::runner::Runner;
use spabuild::task::{RunOptions, TaskResult};
use spabuild::tasks;

const CONFIG_FILE: &str = "spabuild.toml";
const DEFAULT_TASK: &str = "default";

#[derive(Parser)]
#[command(name = "spabuild")]
#[command(about = "Build tasks for single-page apps: injection, bundling, checks and a live-reload server")]
#[command(version)]
struct Cli {
    /// Tasks to run, in order (default: "default")
    tasks: Vec<String>,

    /// Path to config file (default: spabuild.toml, if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Fail check tasks when they report problems
    #[arg(long)]
    fail_on_lint: bool,

    /// Show debug diagnostics
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    if let Err(e) = run() {
        // task failures already carry their cause in the message
        let message = match e.downcast_ref::<RunError>() {
            Some(run_error) => run_error.to_string(),
            None => format!("{:#}", e),
        };
        eprintln!("{} {}", "Error:".red().bold(), message);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    log::init(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    let tasks = if cli.tasks.is_empty() {
        vec![DEFAULT_TASK.to_string()]
    } else {
        cli.tasks
    };

    let options = RunOptions {
        fail_on_lint: cli.fail_on_lint,
    };
    cmd_run(config, &tasks, options)
}

/// Load the given config file, or `spabuild.toml` when it exists, or defaults.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None if Path::new(CONFIG_FILE).is_file() => PathBuf::from(CONFIG_FILE),
        None => {
            tracing::debug!("no {} found, using defaults", CONFIG_FILE);
            let config = Config::default();
            config.validate()?;
            return Ok(config);
        }
    };

    let path = std::fs::canonicalize(&path)
        .with_context(|| format!("Could not find config file: {}", path.display()))?;
    Config::load(&path).with_context(|| format!("Could not load {}", path.display()))
}

#[tokio::main]
async fn cmd_run(config: Config, tasks: &[String], options: RunOptions) -> Result<()> {
    let graph = tasks::catalog()?;
    let runner = Runner::new(graph, config).with_options(options);

    let mut results: Vec<TaskResult> = Vec::new();
    for name in tasks {
        results.extend(runner.run(name).await?);
    }

    let executed = results.iter().filter(|r| !r.aggregator).count();
    tracing::debug!(executed, total = results.len(), "all tasks finished");

    // servers and watchers keep the process alive
    runner.services().wait().await
}
