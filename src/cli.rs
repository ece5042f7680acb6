// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `flowdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "flowdag",
    version,
    about = "Run task-graph workflows with retries, breakpoints and fan-out.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FLOWDAG_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run (or resume) a workflow with the process-backed executor.
    Run(RunArgs),
    /// Load and validate a workflow, print its tasks, execute nothing.
    Validate(ValidateArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Workflow JSON document.
    #[arg(value_name = "WORKFLOW")]
    pub workflow: PathBuf,

    /// Path to the config file (TOML). A missing file means defaults.
    #[arg(long, value_name = "PATH", default_value = "Flowdag.toml")]
    pub config: PathBuf,

    /// Resume from this task id.
    #[arg(long, value_name = "ID")]
    pub from: Option<u64>,

    /// Workflow input as `key=value`; values are parsed as JSON when they
    /// can be, otherwise taken as strings. Repeatable.
    #[arg(long = "input", value_name = "KEY=VALUE")]
    pub inputs: Vec<String>,

    /// Write the workflow, with all recorded state, here after the run.
    #[arg(long, value_name = "PATH")]
    pub save: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct ValidateArgs {
    #[arg(value_name = "WORKFLOW")]
    pub workflow: PathBuf,

    #[arg(long, value_name = "PATH", default_value = "Flowdag.toml")]
    pub config: PathBuf,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
