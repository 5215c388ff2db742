//! Async operation records: a single awaited operation on a resource.

use serde::{Deserialize, Serialize};

use crate::field::Attribute;
use crate::ids::{SpanId, StableId};
use crate::metadata::{MetaId, Metadata};
use crate::resource::NOT_AVAILABLE;
use crate::time::{Duration, Timestamp};
use crate::wire;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncOpStats {
    pub created_at: Timestamp,
    pub dropped_at: Option<Timestamp>,
    pub polls: u64,
    pub busy: Duration,
    pub last_poll_started: Option<Timestamp>,
    pub last_poll_ended: Option<Timestamp>,
    /// `total - busy`; async ops have no separate scheduled phase.
    pub idle: Option<Duration>,
    pub total: Option<Duration>,
    /// Owning task, resolved through the task identity map.
    pub task_id: Option<StableId>,
    pub task_id_str: String,
    pub attributes: Vec<Attribute>,
}

impl AsyncOpStats {
    /// Convert a wire stats record, resolving the owning task through
    /// `resolve_task`.
    ///
    /// `None` if the record has no creation time; `resolve_task` is not
    /// called then.
    #[must_use]
    pub fn from_wire(
        stats: &wire::AsyncOpStats,
        meta: &Metadata,
        resolve_task: impl FnOnce(SpanId) -> StableId,
    ) -> Option<Self> {
        let created_at = stats.created_at?;
        let task_id = stats.task_id.map(resolve_task);
        let poll = stats.poll_stats.clone().unwrap_or_default();
        let busy = poll.busy_time.unwrap_or_default();
        let total = stats.dropped_at.map(|dropped| dropped - created_at);

        Some(Self {
            created_at,
            dropped_at: stats.dropped_at,
            polls: poll.polls,
            busy,
            last_poll_started: poll.last_poll_started,
            last_poll_ended: poll.last_poll_ended,
            idle: total.map(|total| total.saturating_sub(busy)),
            total,
            task_id,
            task_id_str: task_id.map_or_else(|| NOT_AVAILABLE.to_string(), |id| id.to_string()),
            attributes: Attribute::from_wire_list(&stats.attributes, meta),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncOp {
    pub id: StableId,
    pub span_id: SpanId,
    pub parent_id: Option<StableId>,
    /// Stable id of the parent op, or `N/A`.
    pub parent_op_label: String,
    pub resource_id: Option<StableId>,
    pub meta_id: MetaId,
    /// The awaited call, e.g. `Semaphore::acquire`.
    pub source: String,
    pub stats: AsyncOpStats,
}

impl AsyncOp {
    #[must_use]
    pub fn total_duration(&self, now: Timestamp) -> Duration {
        self.stats
            .total
            .unwrap_or_else(|| now - self.stats.created_at)
    }

    /// Busy time, including the poll currently in progress.
    #[must_use]
    pub fn busy_duration(&self, now: Timestamp) -> Duration {
        match (self.stats.last_poll_started, self.stats.last_poll_ended) {
            (Some(started), None) => self.stats.busy + (now - started),
            (Some(started), Some(ended)) if started > ended => self.stats.busy + (now - started),
            _ => self.stats.busy,
        }
    }

    #[must_use]
    pub fn idle_duration(&self, now: Timestamp) -> Duration {
        self.stats
            .idle
            .unwrap_or_else(|| self.total_duration(now).saturating_sub(self.busy_duration(now)))
    }

    #[must_use]
    pub fn is_dropped(&self) -> bool {
        self.stats.total.is_some()
    }
}
