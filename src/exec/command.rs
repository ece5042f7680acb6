// src/exec/command.rs

//! Process-backed executor used by the `flowdag` binary.
//!
//! Each task's configuration names a shell command under `cmd`. The command
//! receives the resolved input as a JSON object on stdin and must print its
//! output object as JSON on stdout. A non-zero exit, or stdout that is not a
//! JSON object, is a failed attempt.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use super::backend::{ExecutorError, Outcome, TaskExecutor, TaskRequest};

/// Configuration key holding the shell command.
pub const CMD_KEY: &str = "cmd";

#[derive(Debug, Clone, Default)]
pub struct CommandExecutor;

impl CommandExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl TaskExecutor for CommandExecutor {
    fn execute(
        &self,
        request: TaskRequest,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<Outcome, ExecutorError>> + Send + '_>>
    {
        Box::pin(async move {
            let Some(cmd) = request.configuration.get(CMD_KEY).and_then(Value::as_str) else {
                return Err(ExecutorError::Task(format!(
                    "task '{}' has no '{CMD_KEY}' in its configuration",
                    request.key
                )));
            };
            let cmd = cmd.to_string();
            run_command(&request, &cmd)
                .await
                .map_err(|e| ExecutorError::Transport(format!("{e:#}")))
        })
    }
}

async fn run_command(request: &TaskRequest, cmd: &str) -> Result<Outcome> {
    info!(
        task = request.id,
        key = %request.key,
        attempt = request.attempt,
        cmd,
        "starting task process"
    );

    let mut command = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    };

    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env("FLOWDAG_TASK_ID", request.id.to_string())
        .env("FLOWDAG_TASK_KEY", &request.key)
        .env("FLOWDAG_ATTEMPT", request.attempt.to_string())
        .kill_on_drop(true);
    if let Some(dir) = request.workdir.as_deref() {
        command.current_dir(dir);
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("spawning process for task '{}'", request.key))?;

    let payload = serde_json::to_vec(&request.input).context("encoding task input")?;
    if let Some(mut stdin) = child.stdin.take() {
        match stdin.write_all(&payload).await {
            Ok(()) => {}
            // The command does not read its input.
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                debug!(task = request.id, "stdin closed before input was written");
            }
            Err(e) => {
                return Err(e).with_context(|| format!("writing input of task '{}'", request.key));
            }
        }
        // Dropping stdin closes it so the child sees EOF.
    }

    // Always consume stderr so buffers don't fill; log at debug.
    if let Some(stderr) = child.stderr.take() {
        let id = request.id;
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = id, "stderr: {}", line);
            }
        });
    }

    let mut stdout = String::new();
    if let Some(mut out) = child.stdout.take() {
        out.read_to_string(&mut stdout)
            .await
            .with_context(|| format!("reading stdout of task '{}'", request.key))?;
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for process of task '{}'", request.key))?;
    let code = status.code().unwrap_or(-1);
    info!(
        task = request.id,
        key = %request.key,
        exit_code = code,
        success = status.success(),
        "task process exited"
    );

    if !status.success() {
        return Ok(Outcome::Failure(format!("process exited with code {code}")));
    }
    Ok(parse_output(&stdout).map_or_else(|e| Outcome::Failure(e.to_string()), Outcome::Success))
}

fn parse_output(stdout: &str) -> Result<serde_json::Map<String, Value>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("process produced no output"));
    }
    match serde_json::from_str::<Value>(trimmed).context("parsing process output as JSON")? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("process output is not a JSON object (got {other})")),
    }
}

