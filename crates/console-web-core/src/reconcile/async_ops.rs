use tracing::debug;

use super::{ReconcileReport, SkipReason, resolve_header};
use crate::async_op::{AsyncOp, AsyncOpStats};
use crate::metadata::MetadataRegistry;
use crate::resource::{NOT_AVAILABLE, Resource};
use crate::store::Store;
use crate::task::Task;
use crate::wire;

const ENTITY: &str = "async_op";

/// Merge one async-op update batch into `ops`.
///
/// Must run after the task and resource reconcilers of the same pass. Owning
/// tasks and resources are resolved through their identity maps, allocating
/// ids for spans that have not been announced yet.
pub fn reconcile_async_ops(
    mut update: wire::AsyncOpUpdate,
    metas: &MetadataRegistry,
    ops: &mut Store<AsyncOp>,
    tasks: &mut Store<Task>,
    resources: &mut Store<Resource>,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    for new_op in &update.new_async_ops {
        let (span, meta) = match resolve_header(metas, new_op.id, new_op.metadata) {
            Ok(header) => header,
            Err(reason) => {
                report.skip(ENTITY, new_op.id, reason);
                continue;
            }
        };
        let Some(wire_stats) = update.stats_update.remove(&span) else {
            report.skip(ENTITY, Some(span), SkipReason::MissingStats);
            continue;
        };
        let Some(stats) = AsyncOpStats::from_wire(&wire_stats, meta, |task| tasks.id_for(task)) else {
            report.skip(ENTITY, Some(span), SkipReason::MissingCreatedAt);
            continue;
        };

        let id = ops.id_for(span);
        let parent_id = new_op.parent_async_op_id.map(|parent| ops.id_for(parent));
        let op = AsyncOp {
            id,
            span_id: span,
            parent_id,
            parent_op_label: parent_id
                .map_or_else(|| NOT_AVAILABLE.to_string(), |parent| parent.to_string()),
            resource_id: new_op.resource_id.map(|res| resources.id_for(res)),
            meta_id: meta.id,
            source: new_op.source.clone(),
            stats,
        };
        let replaced = ops.insert(id, op).is_some();
        report.record_insert(id, replaced);
    }

    for (span, wire_stats) in &update.stats_update {
        let Some(op) = ops.get_by_span_id_mut(*span) else {
            debug!(span_id = %span, "stats for unknown async op");
            continue;
        };
        let Some(meta) = metas.get(op.meta_id) else {
            report.skip(ENTITY, Some(*span), SkipReason::UnknownMetadata(op.meta_id));
            continue;
        };
        let Some(stats) = AsyncOpStats::from_wire(wire_stats, meta, |task| tasks.id_for(task)) else {
            report.skip(ENTITY, Some(*span), SkipReason::MissingCreatedAt);
            continue;
        };
        op.stats = stats;
        let id = op.id;
        report.record_update(id);
    }

    report
}
