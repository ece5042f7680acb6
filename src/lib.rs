// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod types;
pub mod workflow;

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cli::{CliArgs, Command, RunArgs, ValidateArgs};
use crate::config::load_or_default;
use crate::dag::DataMap;
use crate::engine::WorkflowController;
use crate::exec::CommandExecutor;
use crate::workflow::Workflow;

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Run(run_args) => run_workflow(run_args).await,
        Command::Validate(validate_args) => validate_workflow(validate_args),
    }
}

/// This wires together:
/// - config + workflow loading
/// - the controller with the process executor
/// - Ctrl-C handling
async fn run_workflow(args: RunArgs) -> Result<()> {
    let cfg = load_or_default(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    let workflow = Workflow::load_with_config(&args.workflow, &cfg)
        .with_context(|| format!("loading workflow {}", args.workflow.display()))?;

    let input = parse_inputs(&args.inputs)?;

    let mut controller =
        WorkflowController::new(workflow, Arc::new(CommandExecutor::new()))?.with_config(cfg);
    if !input.is_empty() {
        controller.input(input).await?;
    }

    controller.run(args.from)?;

    // Ctrl-C → cooperative cancel.
    if let Some(handle) = controller.control_handle() {
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            warn!("Ctrl+C received; cancelling workflow");
            if !handle.cancel().await {
                debug!("run already finished when Ctrl+C arrived");
            }
        });
    }

    let summary = controller.wait().await?;

    if let Some(path) = args.save.as_ref() {
        controller
            .workflow()
            .save(path)
            .with_context(|| format!("saving workflow to {}", path.display()))?;
        info!(path = %path.display(), "workflow state saved");
    }

    print!("{}", controller.summary());
    for (id, output) in controller.output()? {
        println!("output {id}: {}", Value::Object(output));
    }

    if summary.cancelled {
        bail!("workflow cancelled");
    }
    if let Some(id) = summary.failed_task {
        bail!("workflow failed at task {id}");
    }
    if let Some(id) = summary.active_breakpoint {
        println!("paused at breakpoint on task {id}; resume with --from {id}");
    }
    Ok(())
}

fn validate_workflow(args: ValidateArgs) -> Result<()> {
    let cfg = load_or_default(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    let workflow = Workflow::load_with_config(&args.workflow, &cfg)
        .with_context(|| format!("loading workflow {}", args.workflow.display()))?;
    print_dry_run(&workflow);
    Ok(())
}

/// Parse repeated `key=value` arguments into workflow input.
pub fn parse_inputs(raw: &[String]) -> Result<DataMap> {
    let mut input = DataMap::new();
    for item in raw {
        let (key, value) = item
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid --input '{item}' (expected KEY=VALUE)"))?;
        if key.is_empty() {
            bail!("invalid --input '{item}' (empty key)");
        }
        let value =
            serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        input.insert(key.to_string(), value);
    }
    Ok(input)
}

/// Simple dry-run output: print tasks, kinds and links.
fn print_dry_run(workflow: &Workflow) {
    let graph = &workflow.graph;
    println!("flowdag dry-run: {}", workflow.metadata.title);
    if let Some(dir) = workflow.metadata.project_dir.as_ref() {
        println!("  project_dir = {}", dir.display());
    }
    println!();

    println!("tasks ({}):", graph.len());
    for task in graph.tasks() {
        println!("  - {} ({}) {:?} [{:?}]", task.key, task.id, task.kind, task.status);
        let successors = graph.successors(task.id);
        if !successors.is_empty() {
            println!("      successors: {successors:?}");
        }
        if let Some(func) = task.custom_func.as_deref() {
            println!("      custom_func: {func}");
        }
        if task.breakpoint {
            println!("      breakpoint: true");
        }
        if !task.enabled {
            println!("      enabled: false");
        }
        if task.replace_input {
            println!("      replace_input: true");
        }
        if task.retries != 0 {
            println!("      retries: {}", task.retries);
        }
    }

    debug!("dry-run complete (no execution)");
}
