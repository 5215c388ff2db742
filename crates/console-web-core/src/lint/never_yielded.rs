use super::{Lint, Verdict, busy_at};
use crate::task::{Task, TaskState};
use crate::time::{Duration, Timestamp};

/// Busy time a single-poll task must reach before it is flagged.
pub const DEFAULT_MIN_BUSY: Duration = Duration::from_secs(1);

/// Fires for a running async task that has been busy in its first poll for
/// at least `min_busy`, i.e. one that has not yielded yet.
#[derive(Debug, Clone)]
pub struct NeverYielded {
    min_busy: Duration,
}

impl NeverYielded {
    #[must_use]
    pub fn new(min_busy: Duration) -> Self {
        Self { min_busy }
    }
}

impl Default for NeverYielded {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_BUSY)
    }
}

impl Lint for NeverYielded {
    fn name(&self) -> &'static str {
        "NeverYielded"
    }

    fn check(&self, task: &Task, now: Option<Timestamp>) -> Verdict {
        if task.is_blocking() || task.state() != TaskState::Running || task.total_polls() > 1 {
            return Verdict::Ok;
        }
        // short-lived first polls get another look next pass
        if busy_at(task, now) >= self.min_busy {
            Verdict::Warn
        } else {
            Verdict::Recheck
        }
    }

    fn format(&self, task: &Task, now: Option<Timestamp>) -> String {
        format!("This task has never yielded ({})", busy_at(task, now))
    }

    fn summary(&self) -> String {
        format!("tasks have never yielded (threshold {})", self.min_busy)
    }
}
