//! Task diagnostics.
//!
//! A [`Lint`] inspects one task and answers [`Verdict::Ok`],
//! [`Verdict::Warn`] or [`Verdict::Recheck`]. The [`LintEngine`] runs every
//! registered lint over the tasks touched by a pass plus the tasks left
//! pending by the previous pass. A task's warnings are rebuilt from scratch
//! on every run, so a warning disappears as soon as its condition clears.
//!
//! `Recheck` means a lint cannot decide yet (for example a busy-time
//! threshold has not been reached). Such tasks are linted again on the next
//! pass even if no stats arrived for them.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LintConfig;
use crate::ids::StableId;
use crate::store::Store;
use crate::task::Task;
use crate::time::{Duration, Timestamp};

mod lost_waker;
mod never_yielded;
mod self_wake;

pub use lost_waker::LostWaker;
pub use never_yielded::NeverYielded;
pub use self_wake::SelfWakePercent;

/// Result of checking one task against one lint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Ok,
    Warn,
    /// Not decidable yet; check again next pass.
    Recheck,
}

/// A diagnostic rule over a task's current state.
///
/// Implementations must be side-effect free: the same task and time always
/// produce the same verdict.
pub trait Lint: fmt::Debug + Send + Sync {
    /// Stable rule name, e.g. `LostWaker`.
    fn name(&self) -> &'static str;

    /// Classify `task` at server time `now` (if known).
    fn check(&self, task: &Task, now: Option<Timestamp>) -> Verdict;

    /// Describe the warning for this specific task.
    fn format(&self, task: &Task, now: Option<Timestamp>) -> String;

    /// Describe the warning in general, for a list of all warnings.
    fn summary(&self) -> String;
}

/// A lint currently firing for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskWarning {
    pub lint: String,
    pub summary: String,
    pub description: String,
}

/// Busy time of `task` at `now`, or the recorded busy time if the server
/// clock is unknown.
pub(crate) fn busy_at(task: &Task, now: Option<Timestamp>) -> Duration {
    now.map_or(task.stats.busy, |now| task.busy_duration(now))
}

/// Counts from one [`LintEngine::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LintReport {
    pub checked: usize,
    /// Tasks with at least one warning after the run.
    pub warned: usize,
    /// Tasks queued for the next pass.
    pub pending: usize,
}

#[derive(Debug, Default)]
pub struct LintEngine {
    lints: Vec<Box<dyn Lint>>,
    pending: BTreeSet<StableId>,
}

impl LintEngine {
    #[must_use]
    pub fn new(lints: Vec<Box<dyn Lint>>) -> Self {
        Self {
            lints,
            pending: BTreeSet::new(),
        }
    }

    /// Build the engine with the lints enabled in `config`.
    #[must_use]
    pub fn from_config(config: &LintConfig) -> Self {
        let mut lints: Vec<Box<dyn Lint>> = Vec::new();
        if config.self_wake_percent {
            lints.push(Box::new(SelfWakePercent::new(config.self_wake_min_percent)));
        }
        if config.lost_waker {
            lints.push(Box::new(LostWaker));
        }
        if config.never_yielded {
            lints.push(Box::new(NeverYielded::new(Duration::from_millis(
                i64::try_from(config.never_yielded_min_busy_ms).unwrap_or(i64::MAX),
            ))));
        }
        Self::new(lints)
    }

    #[must_use]
    pub fn lints(&self) -> &[Box<dyn Lint>] {
        &self.lints
    }

    /// Tasks that asked to be rechecked on the next run.
    #[must_use]
    pub fn pending(&self) -> &BTreeSet<StableId> {
        &self.pending
    }

    /// Replace `task.warnings` with the lints firing now.
    /// Returns `true` if any lint asked for a recheck.
    pub fn lint_task(&self, task: &mut Task, now: Option<Timestamp>) -> bool {
        task.warnings.clear();
        let mut recheck = false;
        for lint in &self.lints {
            match lint.check(task, now) {
                Verdict::Ok => {}
                Verdict::Recheck => recheck = true,
                Verdict::Warn => {
                    let warning = TaskWarning {
                        lint: lint.name().to_string(),
                        summary: lint.summary(),
                        description: lint.format(task, now),
                    };
                    task.warnings.push(warning);
                }
            }
        }
        recheck
    }

    /// Lint every task in `touched` plus every pending task, then replace
    /// the pending set with the tasks that still need a recheck.
    pub fn run(
        &mut self,
        tasks: &mut Store<Task>,
        touched: &BTreeSet<StableId>,
        now: Option<Timestamp>,
    ) -> LintReport {
        let targets: BTreeSet<StableId> = touched.union(&self.pending).copied().collect();
        let mut next_pending = BTreeSet::new();
        let mut report = LintReport::default();

        for id in targets {
            // evicted since it was queued
            let Some(task) = tasks.get_mut(id) else {
                continue;
            };
            report.checked += 1;
            if self.lint_task(task, now) {
                next_pending.insert(id);
            }
            if !task.warnings.is_empty() {
                report.warned += 1;
            }
        }

        self.pending = next_pending;
        report.pending = self.pending.len();
        debug!(
            checked = report.checked,
            warned = report.warned,
            pending = report.pending,
            "lint pass complete"
        );
        report
    }
}
