//! Logging setup for `dagrun` using `tracing` + `tracing-subscriber`.
//!
//! Level precedence:
//! 1. `--log-level` flag
//! 2. `DAGRUN_LOG` environment variable (any `EnvFilter` directive)
//! 3. `info`
//!
//! Logs go to stderr so `plan` output on stdout stays machine-readable.

use anyhow::{Context, Result};
use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "DAGRUN_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Install the global subscriber. Call once, from `main`.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let directive = resolve_directive(cli_level, std::env::var(LOG_ENV).ok());
    let filter = EnvFilter::try_new(&directive)
        .with_context(|| format!("invalid log filter '{directive}'"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))?;

    Ok(())
}

fn resolve_directive(cli_level: Option<LogLevel>, env_value: Option<String>) -> String {
    if let Some(level) = cli_level {
        return level.as_directive().to_owned();
    }
    env_value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "info".to_owned())
}
