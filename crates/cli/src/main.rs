//! `dagrun` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`: check a graph JSON file and report the first violation.
//! - `plan`    : print the execution order of a valid graph.
//! - `run`     : execute a graph with the subprocess dispatcher.
//! - `migrate` : apply pending database migrations.

mod config;
mod logging;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

use dispatch::process::ProcessDispatcher;
use dispatch::WorkDispatcher;
use engine::{
    validate_and_sort, Graph, InMemoryRunStore, PgRunStore, RunStatus, RunStore, Scheduler,
    WorkflowExecutor,
};
use queue::QueuedDispatcher;

use crate::config::AppConfig;
use crate::logging::{init_logging, LogLevel};

#[derive(Parser)]
#[command(name = "dagrun", about = "DAG workflow scheduler and executor", version)]
struct Cli {
    /// Overrides the DAGRUN_LOG environment variable.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a graph definition JSON file.
    Validate {
        path: PathBuf,
    },
    /// Print the order in which a graph's nodes would run.
    Plan {
        path: PathBuf,
    },
    /// Execute a graph. Ctrl-C cancels the run.
    Run {
        path: PathBuf,
        /// Optional TOML configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Persist runs to Postgres instead of memory.
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.log_level)?;

    match cli.command {
        Command::Validate { path } => validate(&path),
        Command::Plan { path } => plan(&path),
        Command::Run { path, config, database_url } => {
            run(&path, config.as_deref(), database_url).await
        }
        Command::Migrate { database_url } => {
            let pool = db::pool::create_pool(&database_url, 2)
                .await
                .context("failed to connect to database")?;
            db::pool::run_migrations(&pool)
                .await
                .context("migration failed")?;
            info!("migrations applied");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_graph(path: &Path) -> Result<Graph> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read graph file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{} is not a valid graph document", path.display()))
}

fn validate(path: &Path) -> Result<ExitCode> {
    let graph = load_graph(path)?;
    match validate_and_sort(&graph) {
        Ok(order) => {
            println!("graph is valid ({} nodes)", order.len());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("invalid graph [{}]: {e}", e.reason());
            let ids = e.offending_ids();
            if !ids.is_empty() {
                eprintln!("offending ids: {}", ids.join(", "));
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

fn plan(path: &Path) -> Result<ExitCode> {
    let graph = load_graph(path)?;
    let order = validate_and_sort(&graph).context("graph is invalid")?;
    for node_id in order {
        println!("{node_id}");
    }
    Ok(ExitCode::SUCCESS)
}

async fn run(
    path: &Path,
    config_path: Option<&Path>,
    database_url: Option<String>,
) -> Result<ExitCode> {
    let graph = load_graph(path)?;
    let config = AppConfig::load_optional(config_path)?;

    let store: Arc<dyn RunStore> = match database_url.or_else(|| config.database.url.clone()) {
        Some(url) => {
            let pool = db::pool::create_pool(&url, config.database.max_connections)
                .await
                .context("failed to connect to database")?;
            Arc::new(PgRunStore::new(pool))
        }
        None => Arc::new(InMemoryRunStore::new()),
    };

    let process: Arc<dyn WorkDispatcher> =
        Arc::new(ProcessDispatcher::with_shell(config.dispatcher.shell.clone()));
    let queued = Arc::new(QueuedDispatcher::new(
        process,
        config.queue.max_concurrent_per_owner,
    ));

    let executor = Arc::new(WorkflowExecutor::new(
        queued.clone(),
        store.clone(),
        config.executor_config(),
    ));
    let scheduler = Scheduler::start(executor, store);

    let handle = scheduler.submit(graph).await?;
    let run_id = handle.run_id();
    info!(%run_id, "run started, press Ctrl-C to cancel");

    let outcome = handle.wait();
    tokio::pin!(outcome);

    let run = tokio::select! {
        run = &mut outcome => run?,
        _ = tokio::signal::ctrl_c() => {
            warn!(%run_id, "interrupt received, cancelling run");
            scheduler.cancel(run_id).await;
            outcome.await?
        }
    };

    scheduler.stop_all().await;
    debug!(stats = ?queued.stats().await, "queue drained");

    println!("{}", serde_json::to_string_pretty(&run)?);

    Ok(if run.status == RunStatus::Success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEMO_GRAPH: &str = include_str!("../../../demos/rolling-restart.json");

    #[test]
    fn demo_graph_plans() {
        let graph: Graph = serde_json::from_str(DEMO_GRAPH).unwrap();
        let order = validate_and_sort(&graph).unwrap();
        assert_eq!(
            order,
            vec!["start", "drain_web1", "drain_web2", "restart", "smoke", "end"]
        );
    }

    #[test]
    fn demo_config_parses() {
        let config = AppConfig::load(Path::new(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../../demos/dagrun.toml"
        )))
        .unwrap();
        assert_eq!(config.queue.max_concurrent_per_owner, 1);
    }

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "dagrun",
            "--log-level",
            "debug",
            "run",
            "graph.json",
            "--config",
            "dagrun.toml",
        ])
        .unwrap();
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        assert!(matches!(cli.command, Command::Run { config: Some(_), .. }));
    }
}
