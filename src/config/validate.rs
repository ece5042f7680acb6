// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{FlowError, Result};
use crate::types::parse_duration;

/// Upper bound for `[default].retry_budget`; anything larger is almost
/// certainly a typo and would keep a broken task spinning.
const MAX_RETRY_BUDGET: u32 = 100;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = FlowError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_runtime(&raw)?;
        validate_defaults(&raw)?;
        let task_timeout = match raw.runtime.task_timeout.as_deref() {
            Some(s) => Some(parse_duration(s).map_err(|e| {
                FlowError::ConfigError(format!("[runtime].task_timeout: {e}"))
            })?),
            None => None,
        };
        Ok(ConfigFile::new_unchecked(
            raw.runtime,
            raw.project,
            raw.default,
            task_timeout,
        ))
    }
}

fn validate_runtime(cfg: &RawConfigFile) -> Result<()> {
    if cfg.runtime.max_workers == 0 {
        return Err(FlowError::ConfigError(
            "[runtime].max_workers must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_defaults(cfg: &RawConfigFile) -> Result<()> {
    if cfg.default.retry_budget > MAX_RETRY_BUDGET {
        return Err(FlowError::ConfigError(format!(
            "[default].retry_budget must be <= {} (got {})",
            MAX_RETRY_BUDGET, cfg.default.retry_budget
        )));
    }
    Ok(())
}
