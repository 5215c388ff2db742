use super::{Lint, Verdict};
use crate::task::Task;
use crate::time::Timestamp;

/// Fires for an idle async task that holds no wakers and was not woken,
/// so nothing can ever schedule it again.
#[derive(Debug, Clone, Copy, Default)]
pub struct LostWaker;

impl Lint for LostWaker {
    fn name(&self) -> &'static str {
        "LostWaker"
    }

    fn check(&self, task: &Task, _now: Option<Timestamp>) -> Verdict {
        if task.is_blocking() {
            return Verdict::Ok;
        }
        if !task.is_completed() && task.waker_count() == 0 && !task.is_running() && !task.is_awakened() {
            Verdict::Warn
        } else {
            Verdict::Ok
        }
    }

    fn format(&self, _task: &Task, _now: Option<Timestamp>) -> String {
        "This task has lost its waker, and will never be woken again.".to_string()
    }

    fn summary(&self) -> String {
        "tasks have lost their wakers".to_string()
    }
}
