// src/workflow/output_store.rs

//! Disk-backed task output.
//!
//! Tasks with `store_output = true` write their output mapping to
//! `<workdir>/output.json`; the graph only records the path.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::dag::{DataMap, OutputHandle, TaskId};
use crate::errors::Result;

pub const OUTPUT_FILE: &str = "output.json";

/// Working directory of task `id` under `project_dir`.
pub fn task_workdir(project_dir: &Path, id: TaskId) -> PathBuf {
    project_dir.join(format!("task-{id}"))
}

/// Create `workdir` (and parents) if it does not exist yet.
pub fn ensure_workdir(workdir: &Path) -> Result<()> {
    fs::create_dir_all(workdir)?;
    Ok(())
}

/// Write `output` to `<workdir>/output.json` and return the on-disk handle.
pub fn write_output(workdir: &Path, output: &DataMap) -> Result<OutputHandle> {
    ensure_workdir(workdir)?;
    let path = workdir.join(OUTPUT_FILE);
    let contents = serde_json::to_string_pretty(output)?;
    fs::write(&path, contents)?;
    debug!(path = %path.display(), keys = output.len(), "task output written to disk");
    Ok(OutputHandle::OnDisk(path))
}
