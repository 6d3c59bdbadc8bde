//! `loopctl`: build and improve loops around an external reasoning worker.
//!
//! Exit codes: `0` completed, `1` failed or errored (including pre-flight and
//! argument errors), `2` blocked on human input.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::error;

use loopctl::driver::{
    BuildOptions, ImproveOptions, RunOutcome, Services, load_config, notify_timeout, run_build,
    run_improve,
};
use loopctl::exit_codes;
use loopctl::io::deps::require_tool;
use loopctl::io::notify::WebhookNotifier;
use loopctl::io::paths::ControllerPaths;
use loopctl::io::worker::CliWorker;
use loopctl::logging;

#[derive(Parser)]
#[command(
    name = "loopctl",
    version,
    about = "Headless build and improve loops around a reasoning worker"
)]
struct Cli {
    /// Work directory holding `.loopctl/` (default: current directory).
    #[arg(short = 'C', long, global = true, value_name = "DIR")]
    workdir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every task of a plan in document order, one worker call per task.
    Build {
        /// Plan document listing the task ids.
        plan: PathBuf,
        /// Resume at this task id, skipping earlier ones.
        #[arg(long, value_name = "TASK_ID")]
        from: Option<String>,
        /// Continuation token from an earlier run.
        #[arg(long, value_name = "TOKEN")]
        session: Option<String>,
        /// Group-level config file, consulted after `.loopctl/config.toml`.
        #[arg(long, value_name = "PATH")]
        group_config: Option<PathBuf>,
    },
    /// Iterate on a scope until the improvement delta falls below the threshold.
    Improve {
        /// What to improve, usually a path.
        scope: String,
        /// Iteration budget (overrides `improve.max_iterations`).
        #[arg(long, value_name = "N")]
        max_iterations: Option<String>,
        /// Delta threshold (overrides `improve.threshold`).
        #[arg(long, value_name = "X")]
        threshold: Option<String>,
        /// Continuation token from an earlier run.
        #[arg(long, value_name = "TOKEN")]
        session: Option<String>,
        /// Group-level config file, consulted after `.loopctl/config.toml`.
        #[arg(long, value_name = "PATH")]
        group_config: Option<PathBuf>,
    },
}

fn main() {
    logging::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Exit code 2 means "blocked", so usage errors exit 1.
            let code = if err.use_stderr() {
                exit_codes::FAILED
            } else {
                exit_codes::OK
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            error!(err = %format!("{err:#}"), "run did not start");
            eprintln!("{err:#}");
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let workdir = match cli.workdir {
        Some(dir) => dir,
        None => std::env::current_dir().context("resolve current directory")?,
    };
    let paths = ControllerPaths::new(workdir);

    let outcome = match cli.command {
        Command::Build {
            plan,
            from,
            session,
            group_config,
        } => {
            let services = services(paths, group_config.as_deref())?;
            run_build(
                &services,
                &BuildOptions {
                    plan,
                    from,
                    session,
                },
            )?
        }
        Command::Improve {
            scope,
            max_iterations,
            threshold,
            session,
            group_config,
        } => {
            let services = services(paths, group_config.as_deref())?;
            run_improve(
                &services,
                &ImproveOptions {
                    scope,
                    max_iterations,
                    threshold,
                    session,
                },
            )?
        }
    };

    report(&outcome);
    Ok(outcome.exit_code)
}

/// Wire the production services. The worker binary is probed before any
/// lock or file under `.loopctl/` is touched.
fn services(
    paths: ControllerPaths,
    group_config: Option<&Path>,
) -> Result<Services<CliWorker, WebhookNotifier>> {
    let config = load_config(&paths, group_config);
    let worker = CliWorker::from_config(&config);
    require_tool(worker.command(), &paths.root)?;
    let notifier = WebhookNotifier::from_env(notify_timeout(&config)?);
    Ok(Services::new(paths, config, worker, notifier))
}

fn report(outcome: &RunOutcome) {
    let record = &outcome.record;
    println!(
        "status={} trace={} token={} invocations={}",
        record.status,
        record.trace_id,
        record.continuation_token.as_deref().unwrap_or("-"),
        record.invocations
    );
    if let Some(path) = &outcome.archive.history_path {
        println!("record={}", path.display());
    }
}
