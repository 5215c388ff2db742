//! Task records and their derived, "now"-relative views.
//!
//! A [`Task`] is built once from a new-task wire record and its first stats
//! entry; afterwards only [`Task::stats`] is replaced. Durations for a task
//! that has not completed are always computed against a caller-supplied
//! server time, never against the local clock.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::field::Field;
use crate::ids::{SpanId, StableId};
use crate::lint::TaskWarning;
use crate::time::{Duration, Timestamp};
use crate::wire;

/// Task kinds that run on a blocking thread rather than as a future.
const BLOCKING_KINDS: [&str; 2] = ["block_on", "blocking"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub polls: u64,
    pub created_at: Timestamp,
    pub dropped_at: Option<Timestamp>,
    pub busy: Duration,
    pub scheduled: Duration,
    pub last_poll_started: Option<Timestamp>,
    pub last_poll_ended: Option<Timestamp>,
    /// `total - busy - scheduled`, only known once the task completed.
    pub idle: Option<Duration>,
    /// `dropped_at - created_at`, present iff the task completed.
    pub total: Option<Duration>,
    pub wakes: u64,
    pub waker_clones: u64,
    pub waker_drops: u64,
    pub last_wake: Option<Timestamp>,
    pub self_wakes: u64,
}

impl TaskStats {
    /// Convert a wire stats record. `None` if it has no creation time.
    #[must_use]
    pub fn from_wire(stats: &wire::TaskStats) -> Option<Self> {
        let created_at = stats.created_at?;
        let poll = stats.poll_stats.clone().unwrap_or_default();
        let busy = poll.busy_time.unwrap_or_default();
        let scheduled = stats.scheduled_time.unwrap_or_default();
        let total = stats.dropped_at.map(|dropped| dropped - created_at);
        let idle = total.map(|total| total.saturating_sub(busy + scheduled));

        Some(Self {
            polls: poll.polls,
            created_at,
            dropped_at: stats.dropped_at,
            busy,
            scheduled,
            last_poll_started: poll.last_poll_started,
            last_poll_ended: poll.last_poll_ended,
            idle,
            total,
            wakes: stats.wakes,
            waker_clones: stats.waker_clones,
            waker_drops: stats.waker_drops,
            last_wake: stats.last_wake,
            self_wakes: stats.self_wakes,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Completed,
    Running,
    Scheduled,
    Idle,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::Running => "running",
            Self::Scheduled => "scheduled",
            Self::Idle => "idle",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: StableId,
    /// `tokio::task::Id` on the remote, from the `task.id` field.
    pub remote_task_id: Option<u64>,
    /// Span id on the remote; used to request the task's detail stream.
    pub span_id: SpanId,
    pub short_desc: String,
    /// Fields without a dedicated column, followed by a synthetic `target`.
    pub fields: Vec<Field>,
    pub stats: TaskStats,
    pub target: String,
    pub name: Option<String>,
    pub location: String,
    /// One of `task`, `blocking`, `block_on`, `local`, or empty.
    pub kind: String,
    /// Rules currently reporting a warning, recomputed on every lint.
    pub warnings: Vec<TaskWarning>,
}

impl Task {
    /// `"{task_id} ({name})"`, whichever half is known, or empty.
    #[must_use]
    pub fn short_desc(remote_task_id: Option<u64>, name: Option<&str>) -> String {
        match (remote_task_id, name) {
            (Some(id), Some(name)) => format!("{id} ({name})"),
            (Some(id), None) => id.to_string(),
            (None, Some(name)) => name.to_string(),
            (None, None) => String::new(),
        }
    }

    #[must_use]
    pub fn total_duration(&self, now: Timestamp) -> Duration {
        self.stats
            .total
            .unwrap_or_else(|| now - self.stats.created_at)
    }

    /// Busy time, including the poll currently in progress.
    #[must_use]
    pub fn busy_duration(&self, now: Timestamp) -> Duration {
        match self.stats.last_poll_started {
            Some(started) if self.is_running() => self.stats.busy + (now - started),
            _ => self.stats.busy,
        }
    }

    /// Scheduled time, including time since a wake that has not been polled.
    #[must_use]
    pub fn scheduled_duration(&self, now: Timestamp) -> Duration {
        let Some(woke) = self.stats.last_wake else {
            return self.stats.scheduled;
        };
        match self.stats.last_poll_started {
            Some(started) if woke <= started => self.stats.scheduled,
            _ => self.stats.scheduled + (now - woke),
        }
    }

    #[must_use]
    pub fn idle_duration(&self, now: Timestamp) -> Duration {
        if let Some(idle) = self.stats.idle {
            return idle;
        }
        let active = self.busy_duration(now) + self.scheduled_duration(now);
        self.total_duration(now).saturating_sub(active)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        match (self.stats.last_poll_started, self.stats.last_poll_ended) {
            (Some(started), Some(ended)) => started > ended,
            (Some(_), None) => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        match (self.stats.last_wake, self.stats.last_poll_started) {
            (Some(woke), Some(started)) => woke > started,
            _ => false,
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.stats.total.is_some()
    }

    #[must_use]
    pub fn is_blocking(&self) -> bool {
        BLOCKING_KINDS.contains(&self.kind.as_str())
    }

    /// Whether the task has been woken and is waiting to be polled again.
    ///
    /// A task that has never been polled counts as awakened.
    #[must_use]
    pub fn is_awakened(&self) -> bool {
        if self.stats.polls == 0 {
            return true;
        }
        match (self.stats.last_wake, self.stats.last_poll_started) {
            (Some(woke), Some(started)) => woke > started,
            (Some(_), None) => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn total_polls(&self) -> u64 {
        self.stats.polls
    }

    #[must_use]
    pub fn state(&self) -> TaskState {
        if self.is_completed() {
            TaskState::Completed
        } else if self.is_running() {
            TaskState::Running
        } else if self.is_scheduled() {
            TaskState::Scheduled
        } else {
            TaskState::Idle
        }
    }

    /// Outstanding wakers, clamped at zero.
    #[must_use]
    pub fn waker_count(&self) -> u64 {
        self.stats.waker_clones.saturating_sub(self.stats.waker_drops)
    }

    /// Share of wakes the task issued to itself, in whole percent.
    #[must_use]
    pub fn self_wake_percent(&self) -> u64 {
        if self.stats.wakes == 0 {
            0
        } else {
            self.stats.self_wakes.saturating_mul(100) / self.stats.wakes
        }
    }

    /// Time since the last wake, or `None` if never woken.
    #[must_use]
    pub fn since_wake(&self, now: Timestamp) -> Option<Duration> {
        self.stats.last_wake.map(|woke| now - woke)
    }

    /// `amount` as a percentage of the task's lifetime, capped at 100.
    #[must_use]
    pub fn duration_percent(&self, now: Timestamp, amount: Duration) -> f64 {
        let total = self.total_duration(now).as_secs_f64();
        if total <= 0.0 {
            return 0.0;
        }
        (amount.as_secs_f64() / total * 100.0).min(100.0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn stats(created: i64) -> TaskStats {
        TaskStats {
            polls: 1,
            created_at: Timestamp::new(created, 0),
            dropped_at: None,
            busy: Duration::ZERO,
            scheduled: Duration::ZERO,
            last_poll_started: None,
            last_poll_ended: None,
            idle: None,
            total: None,
            wakes: 0,
            waker_clones: 0,
            waker_drops: 0,
            last_wake: None,
            self_wakes: 0,
        }
    }

    pub(crate) fn task(stats: TaskStats) -> Task {
        Task {
            id: StableId(1),
            remote_task_id: Some(1),
            span_id: SpanId(1),
            short_desc: "1".into(),
            fields: Vec::new(),
            stats,
            target: "tokio::task".into(),
            name: None,
            location: "src/main.rs:1:1".into(),
            kind: "task".into(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn live_task_durations_use_now() {
        let mut s = stats(0);
        s.busy = Duration::from_secs(500);
        let t = task(s);
        let now = Timestamp::new(1000, 0);
        assert_eq!(t.total_duration(now), Duration::from_secs(1000));
        assert_eq!(t.busy_duration(now), Duration::from_secs(500));
        assert_eq!(t.idle_duration(now), Duration::from_secs(500));
    }

    #[test]
    fn busy_includes_poll_in_progress() {
        let mut s = stats(0);
        s.busy = Duration::from_secs(10);
        s.last_poll_started = Some(Timestamp::new(90, 0));
        s.last_poll_ended = Some(Timestamp::new(80, 0));
        let t = task(s);
        assert!(t.is_running());
        assert_eq!(t.busy_duration(Timestamp::new(100, 0)), Duration::from_secs(20));
    }

    #[test]
    fn scheduled_includes_pending_wake() {
        let mut s = stats(0);
        s.scheduled = Duration::from_secs(1);
        s.last_poll_started = Some(Timestamp::new(10, 0));
        s.last_poll_ended = Some(Timestamp::new(11, 0));
        s.last_wake = Some(Timestamp::new(15, 0));
        let t = task(s);
        assert!(t.is_scheduled());
        assert_eq!(t.state(), TaskState::Scheduled);
        assert_eq!(t.scheduled_duration(Timestamp::new(20, 0)), Duration::from_secs(6));
    }

    #[test]
    fn completed_task_uses_recorded_totals() {
        let wire_stats = wire::TaskStats {
            created_at: Some(Timestamp::new(100, 0)),
            dropped_at: Some(Timestamp::new(200, 0)),
            poll_stats: Some(wire::PollStats {
                polls: 3,
                busy_time: Some(Duration::from_secs(30)),
                ..wire::PollStats::default()
            }),
            scheduled_time: Some(Duration::from_secs(20)),
            ..wire::TaskStats::default()
        };
        let t = task(TaskStats::from_wire(&wire_stats).unwrap());
        assert!(t.is_completed());
        assert_eq!(t.state(), TaskState::Completed);
        let later = Timestamp::new(9999, 0);
        assert_eq!(t.total_duration(later), Duration::from_secs(100));
        assert_eq!(t.idle_duration(later), Duration::from_secs(50));
    }

    #[test]
    fn stats_without_created_at_are_rejected() {
        assert!(TaskStats::from_wire(&wire::TaskStats::default()).is_none());
    }

    #[test]
    fn idle_never_goes_negative() {
        let wire_stats = wire::TaskStats {
            created_at: Some(Timestamp::new(0, 0)),
            dropped_at: Some(Timestamp::new(1, 0)),
            poll_stats: Some(wire::PollStats {
                busy_time: Some(Duration::from_secs(5)),
                ..wire::PollStats::default()
            }),
            ..wire::TaskStats::default()
        };
        let s = TaskStats::from_wire(&wire_stats).unwrap();
        assert_eq!(s.idle, Some(Duration::ZERO));
    }

    #[test]
    fn awakened_before_first_poll() {
        let mut s = stats(0);
        s.polls = 0;
        assert!(task(s.clone()).is_awakened());

        s.polls = 2;
        s.last_poll_started = Some(Timestamp::new(5, 0));
        s.last_wake = Some(Timestamp::new(4, 0));
        assert!(!task(s.clone()).is_awakened());

        s.last_wake = Some(Timestamp::new(6, 0));
        assert!(task(s).is_awakened());
    }

    #[test]
    fn waker_count_clamps_at_zero() {
        let mut s = stats(0);
        s.waker_clones = 2;
        s.waker_drops = 5;
        assert_eq!(task(s.clone()).waker_count(), 0);
        s.waker_drops = 1;
        assert_eq!(task(s).waker_count(), 1);
    }

    #[test]
    fn self_wake_percent_handles_zero_wakes() {
        let mut s = stats(0);
        assert_eq!(task(s.clone()).self_wake_percent(), 0);
        s.wakes = 4;
        s.self_wakes = 3;
        assert_eq!(task(s).self_wake_percent(), 75);
    }

    #[test]
    fn blocking_kinds() {
        let mut t = task(stats(0));
        assert!(!t.is_blocking());
        t.kind = "blocking".into();
        assert!(t.is_blocking());
        t.kind = "block_on".into();
        assert!(t.is_blocking());
    }

    #[test]
    fn short_desc_variants() {
        assert_eq!(Task::short_desc(Some(7), Some("worker")), "7 (worker)");
        assert_eq!(Task::short_desc(Some(7), None), "7");
        assert_eq!(Task::short_desc(None, Some("worker")), "worker");
        assert_eq!(Task::short_desc(None, None), "");
    }

    #[test]
    fn duration_percent_is_capped() {
        let t = task(stats(0));
        let now = Timestamp::new(10, 0);
        assert!((t.duration_percent(now, Duration::from_secs(5)) - 50.0).abs() < 1e-9);
        assert!((t.duration_percent(now, Duration::from_secs(50)) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn since_wake() {
        let mut s = stats(0);
        assert_eq!(task(s.clone()).since_wake(Timestamp::new(5, 0)), None);
        s.last_wake = Some(Timestamp::new(3, 0));
        assert_eq!(task(s).since_wake(Timestamp::new(5, 0)), Some(Duration::from_secs(2)));
    }
}
