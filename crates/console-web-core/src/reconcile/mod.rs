//! Update reconcilers.
//!
//! One reconciler per entity class merges a wire update batch into its
//! [`Store`](crate::store::Store):
//!
//! 1. New-entity records are validated; malformed ones are skipped with a
//!    [`SkipReason`] and never abort the pass.
//! 2. The entity's stable id is allocated and cross-references are resolved
//!    through the other classes' identity maps, allocating ids for targets
//!    that have not been seen yet.
//! 3. The matching stats entry is taken out of the batch's stats table.
//! 4. Every stats entry left in the table overwrites the stats of an entity
//!    that already exists.
//!
//! Derived values (totals, idle, labels) are computed once while building
//! the record.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use tracing::warn;

use crate::ids::{SpanId, StableId};
use crate::metadata::{MetaId, Metadata, MetadataRegistry};

mod async_ops;
mod resources;
mod tasks;

pub use async_ops::reconcile_async_ops;
pub use resources::reconcile_resources;
pub use tasks::reconcile_tasks;

/// Why a wire record was dropped instead of merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    MissingId,
    MissingMetadataRef,
    UnknownMetadata(MetaId),
    MissingKind,
    UnparseableKind(String),
    /// New entity without a stats entry in the same batch.
    MissingStats,
    MissingCreatedAt,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingId => f.write_str("record has no id"),
            Self::MissingMetadataRef => f.write_str("record has no metadata id"),
            Self::UnknownMetadata(id) => write!(f, "no metadata registered for id {id}"),
            Self::MissingKind => f.write_str("resource has no kind"),
            Self::UnparseableKind(kind) => write!(f, "unparseable resource kind {kind}"),
            Self::MissingStats => f.write_str("no stats for new record"),
            Self::MissingCreatedAt => f.write_str("stats have no creation time"),
        }
    }
}

/// Outcome of one reconciler run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub added: usize,
    pub updated: usize,
    pub skipped: Vec<(Option<SpanId>, SkipReason)>,
    /// Entities whose record or stats changed in this pass.
    pub touched: BTreeSet<StableId>,
}

impl ReconcileReport {
    pub(crate) fn skip(&mut self, entity: &'static str, span: Option<SpanId>, reason: SkipReason) {
        warn!(entity, span_id = ?span, %reason, "skipping record");
        self.skipped.push((span, reason));
    }

    pub(crate) fn record_insert(&mut self, id: StableId, replaced: bool) {
        if replaced {
            self.updated += 1;
        } else {
            self.added += 1;
        }
        self.touched.insert(id);
    }

    pub(crate) fn record_update(&mut self, id: StableId) {
        self.updated += 1;
        self.touched.insert(id);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.skipped.is_empty()
    }
}

/// Check the id and metadata reference every new-entity record carries.
pub(crate) fn resolve_header(
    metas: &MetadataRegistry,
    id: Option<SpanId>,
    meta_id: Option<MetaId>,
) -> Result<(SpanId, &Metadata), SkipReason> {
    let span = id.ok_or(SkipReason::MissingId)?;
    let meta_id = meta_id.ok_or(SkipReason::MissingMetadataRef)?;
    let meta = metas
        .get(meta_id)
        .ok_or(SkipReason::UnknownMetadata(meta_id))?;
    Ok((span, meta))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_update_counts() {
        let mut report = ReconcileReport::default();
        report.record_insert(StableId(1), false);
        report.record_insert(StableId(2), true);
        report.record_update(StableId(1));
        assert_eq!(report.added, 1);
        assert_eq!(report.updated, 2);
        assert_eq!(report.touched.len(), 2);
        assert!(!report.is_empty());
    }

    #[test]
    fn skip_reasons_render() {
        assert_eq!(
            SkipReason::UnknownMetadata(MetaId(9)).to_string(),
            "no metadata registered for id 9"
        );
        let mut report = ReconcileReport::default();
        report.skip("task", None, SkipReason::MissingId);
        assert_eq!(report.skipped, vec![(None, SkipReason::MissingId)]);
    }
}
