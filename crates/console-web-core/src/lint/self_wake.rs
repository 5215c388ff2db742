use super::{Lint, Verdict};
use crate::task::Task;
use crate::time::Timestamp;

pub const DEFAULT_MIN_PERCENT: u64 = 50;

/// Fires for an async task that woke itself for more than `min_percent` of
/// its wakeups.
#[derive(Debug, Clone)]
pub struct SelfWakePercent {
    min_percent: u64,
}

impl SelfWakePercent {
    #[must_use]
    pub fn new(min_percent: u64) -> Self {
        Self { min_percent }
    }
}

impl Default for SelfWakePercent {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_PERCENT)
    }
}

impl Lint for SelfWakePercent {
    fn name(&self) -> &'static str {
        "SelfWakePercent"
    }

    fn check(&self, task: &Task, _now: Option<Timestamp>) -> Verdict {
        if !task.is_blocking() && task.self_wake_percent() > self.min_percent {
            Verdict::Warn
        } else {
            Verdict::Ok
        }
    }

    fn format(&self, task: &Task, _now: Option<Timestamp>) -> String {
        format!(
            "This task has woken itself for more than {}% of its total wakeups ({}%)",
            self.min_percent,
            task.self_wake_percent()
        )
    }

    fn summary(&self) -> String {
        format!("tasks have woken themselves over {}% of the time", self.min_percent)
    }
}
