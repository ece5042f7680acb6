// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::ResumePolicy;

/// Raw configuration as read from a TOML file, before validation.
///
/// ```toml
/// [runtime]
/// max_workers = 8
/// task_timeout = "30s"
/// resume_policy = "continue"
///
/// [project]
/// directory = "runs"
///
/// [default]
/// retry_budget = 0
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub runtime: RuntimeSection,

    #[serde(default)]
    pub project: ProjectSection,

    #[serde(default)]
    pub default: DefaultSection,
}

/// `[runtime]` section: how the scheduler drives dispatches.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeSection {
    /// Upper bound on concurrently running concurrent-discipline tasks.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Optional per-dispatch deadline (e.g. `"30s"`). A dispatch that
    /// exceeds it counts as a failed attempt.
    #[serde(default)]
    pub task_timeout: Option<String>,

    /// Behaviour of `run(from)` on an already (partially) evaluated workflow.
    #[serde(default)]
    pub resume_policy: ResumePolicy,
}

fn default_max_workers() -> usize {
    8
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            task_timeout: None,
            resume_policy: ResumePolicy::default(),
        }
    }
}

/// `[project]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProjectSection {
    /// Base directory for task working directories and disk-backed output.
    ///
    /// Overrides the `project_dir` stored in the workflow document.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

/// `[default]` section: values applied to tasks that do not set their own.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultSection {
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
}

fn default_retry_budget() -> u32 {
    0
}

impl Default for DefaultSection {
    fn default() -> Self {
        Self {
            retry_budget: default_retry_budget(),
        }
    }
}

/// Validated configuration. Construct via `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub runtime: RuntimeSection,
    pub project: ProjectSection,
    pub default: DefaultSection,
    task_timeout: Option<Duration>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        runtime: RuntimeSection,
        project: ProjectSection,
        default: DefaultSection,
        task_timeout: Option<Duration>,
    ) -> Self {
        Self {
            runtime,
            project,
            default,
            task_timeout,
        }
    }

    /// Parsed `[runtime].task_timeout`.
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout
    }

    pub fn resume_policy(&self) -> ResumePolicy {
        self.runtime.resume_policy
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self::new_unchecked(
            RuntimeSection::default(),
            ProjectSection::default(),
            DefaultSection::default(),
            None,
        )
    }
}
