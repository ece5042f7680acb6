use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// How `run(from)` treats already-evaluated tasks when a workflow is resumed.
///
/// - `Continue`: keep every recorded status. Tasks held at a breakpoint whose
///   flag was cleared become `Ready`; readiness is re-evaluated starting at
///   the requested task (default).
/// - `Rerun`: reset the requested task and all of its transitive successors
///   to `Disabled` (dropping their output and restoring their retry budget)
///   so the whole sub-DAG executes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResumePolicy {
    #[default]
    Continue,
    Rerun,
}

impl FromStr for ResumePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "continue" => Ok(ResumePolicy::Continue),
            "rerun" => Ok(ResumePolicy::Rerun),
            other => Err(format!(
                "invalid resume_policy: {other} (expected \"continue\" or \"rerun\")"
            )),
        }
    }
}

/// Unit suffixes accepted by [`parse_duration`], in milliseconds.
/// `ms` must be tried before `s` and `m`.
const DURATION_UNITS: [(&str, u64); 4] = [
    ("ms", 1),
    ("s", 1_000),
    ("m", 60_000),
    ("h", 3_600_000),
];

/// Parse a duration string such as `"250ms"`, `"3s"`, `"2m"` or `"1h"`.
///
/// A unit suffix is required; bare numbers are rejected so that a timeout of
/// `"30"` is not silently read as milliseconds or seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let text = s.trim().to_ascii_lowercase();
    if text.is_empty() {
        return Err("duration is empty".to_string());
    }

    let (amount, per_unit) = DURATION_UNITS
        .iter()
        .find_map(|&(suffix, ms)| text.strip_suffix(suffix).map(|rest| (rest.trim(), ms)))
        .ok_or_else(|| format!("duration '{s}' needs a unit suffix (ms, s, m or h)"))?;

    if amount.is_empty() || !amount.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("duration '{s}' does not start with a whole number"));
    }
    let amount: u64 = amount
        .parse()
        .map_err(|e| format!("duration '{s}' is out of range: {e}"))?;

    amount
        .checked_mul(per_unit)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration '{s}' is out of range"))
}
