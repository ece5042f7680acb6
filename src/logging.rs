// src/logging.rs

//! `tracing` setup for the `flowdag` binary.
//!
//! The filter is taken from `--log-level` when given, otherwise from the
//! `FLOWDAG_LOG` environment variable, which accepts full `EnvFilter`
//! directives (`FLOWDAG_LOG=info,flowdag::dag=debug`). Without either,
//! flowdag logs at `info` and its dependencies at `warn`.
//!
//! Logs go to stderr; stdout carries the run summary and task output.

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "FLOWDAG_LOG";

const DEFAULT_DIRECTIVES: &str = "warn,flowdag=info";

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = match cli_level {
        Some(level) => EnvFilter::new(directive(level)),
        None => EnvFilter::try_from_env(LOG_ENV)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES)),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}

fn directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}
