use std::time::Duration;

use super::TaskId;
use super::engine::{EngineError, InterruptReason, ProgressEvent};

/// Message from an execution task back to the manager.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskUpdate {
    pub id: TaskId,
    /// Attempt that produced this update; stale attempts are ignored.
    pub generation: u64,
    pub kind: UpdateKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateKind {
    Progress(ProgressEvent),
    Ended(AttemptOutcome),
}

/// How one transfer attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Completed,
    Interrupted(InterruptReason),
    Failed(String),
}

impl From<Result<(), EngineError>> for AttemptOutcome {
    fn from(result: Result<(), EngineError>) -> Self {
        match result {
            Ok(()) => AttemptOutcome::Completed,
            Err(EngineError::Interrupted(reason)) => AttemptOutcome::Interrupted(reason),
            Err(e) => AttemptOutcome::Failed(e.to_string()),
        }
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", size as u64, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Transfer rate in MiB/s with two decimals.
pub fn format_speed(bytes_per_second: f64) -> String {
    format!("{:.2} MiB/s", bytes_per_second / 1024.0 / 1024.0)
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_from_engine_result() {
        assert_eq!(AttemptOutcome::from(Ok(())), AttemptOutcome::Completed);
        assert_eq!(
            AttemptOutcome::from(Err(EngineError::Interrupted(InterruptReason::Pause))),
            AttemptOutcome::Interrupted(InterruptReason::Pause)
        );
        assert_eq!(
            AttemptOutcome::from(Err(EngineError::Failed("HTTP Error 403".into()))),
            AttemptOutcome::Failed("HTTP Error 403".into())
        );
    }

    #[test]
    fn human_formats() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_speed(2.5 * 1024.0 * 1024.0), "2.50 MiB/s");
        assert_eq!(format_duration(Duration::from_secs(59)), "59s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }
}
