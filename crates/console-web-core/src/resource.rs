//! Resource records: timers, mutexes, semaphores, channels and the like.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::field::Attribute;
use crate::ids::{SpanId, StableId};
use crate::metadata::{MetaId, Metadata};
use crate::time::{Duration, Timestamp};
use crate::wire::{self, known_kind};

/// Label used when a cross-reference is absent or unresolvable.
pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Internal,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Public => "public",
            Self::Internal => "internal",
        })
    }
}

/// Resolve a tagged wire kind to its display name.
///
/// Returns the offending code as `Err` for a well-known kind this client
/// does not recognize.
pub fn kind_name(kind: &wire::ResourceKind) -> Result<String, i32> {
    match kind {
        wire::ResourceKind::Known(known_kind::TIMER) => Ok("Timer".to_string()),
        wire::ResourceKind::Known(code) => Err(*code),
        wire::ResourceKind::Other(name) => Ok(name.clone()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStats {
    pub created_at: Timestamp,
    pub dropped_at: Option<Timestamp>,
    /// Present iff the resource was dropped.
    pub total: Option<Duration>,
    pub attributes: Vec<Attribute>,
}

impl ResourceStats {
    /// Convert a wire stats record. `None` if it has no creation time.
    #[must_use]
    pub fn from_wire(stats: &wire::ResourceStats, meta: &Metadata) -> Option<Self> {
        let created_at = stats.created_at?;
        Some(Self {
            created_at,
            dropped_at: stats.dropped_at,
            total: stats.dropped_at.map(|dropped| dropped - created_at),
            attributes: Attribute::from_wire_list(&stats.attributes, meta),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: StableId,
    pub span_id: SpanId,
    /// Stable id of the parent resource, if the remote named one.
    pub parent_id: Option<StableId>,
    /// `"{id} ({target}::{concrete_type})"` of the parent, or `N/A`.
    pub parent_label: String,
    /// `"{id}"` of the parent, or `N/A`.
    pub parent_id_label: String,
    pub meta_id: MetaId,
    pub kind: String,
    pub stats: ResourceStats,
    pub target: String,
    pub concrete_type: String,
    pub location: String,
    pub visibility: Visibility,
}

impl Resource {
    /// The label other resources use to refer to this one as a parent.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} ({}::{})", self.id, self.target, self.concrete_type)
    }

    #[must_use]
    pub fn total_duration(&self, now: Timestamp) -> Duration {
        self.stats
            .total
            .unwrap_or_else(|| now - self.stats.created_at)
    }

    #[must_use]
    pub fn is_dropped(&self) -> bool {
        self.stats.total.is_some()
    }
}
