//! Time-windowed eviction of completed entities.

use tracing::debug;

use crate::async_op::AsyncOp;
use crate::resource::Resource;
use crate::store::Store;
use crate::task::Task;
use crate::time::{Duration, Timestamp};

/// Default grace period between an entity's drop and its eviction.
pub const DEFAULT_RETAIN_FOR: Duration = Duration::from_secs(6);

/// An entity that may complete and then become eligible for eviction.
pub trait Retainable {
    fn dropped_at(&self) -> Option<Timestamp>;
}

impl Retainable for Task {
    fn dropped_at(&self) -> Option<Timestamp> {
        self.stats.dropped_at
    }
}

impl Retainable for Resource {
    fn dropped_at(&self) -> Option<Timestamp> {
        self.stats.dropped_at
    }
}

impl Retainable for AsyncOp {
    fn dropped_at(&self) -> Option<Timestamp> {
        self.stats.dropped_at
    }
}

/// Whether an entity dropped at `dropped_at` survives at server time `now`.
///
/// Live entities always survive, and nothing is evicted before the server
/// clock is known.
#[must_use]
pub fn should_retain(dropped_at: Option<Timestamp>, retain_for: Duration, now: Option<Timestamp>) -> bool {
    match (dropped_at, now) {
        (Some(dropped), Some(now)) => now - dropped <= retain_for,
        _ => true,
    }
}

/// Evict every entity dropped more than `retain_for` before `now`.
/// Returns the number of evicted entities.
pub fn sweep<T: Retainable>(store: &mut Store<T>, retain_for: Duration, now: Option<Timestamp>) -> usize {
    let evicted = store.retain(|item| should_retain(item.dropped_at(), retain_for, now));
    if evicted > 0 {
        debug!(evicted, remaining = store.len(), "swept completed entities");
    }
    evicted
}
