use tracing::debug;

use super::{ReconcileReport, SkipReason, resolve_header};
use crate::field::{Field, FieldValue, format_location};
use crate::ids::{SpanId, StableId};
use crate::metadata::{Metadata, MetadataRegistry};
use crate::store::Store;
use crate::task::{Task, TaskStats};
use crate::wire;

const ENTITY: &str = "task";

/// Merge one task update batch into `tasks`.
pub fn reconcile_tasks(
    mut update: wire::TaskUpdate,
    metas: &MetadataRegistry,
    tasks: &mut Store<Task>,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    for new_task in &update.new_tasks {
        let (span, meta) = match resolve_header(metas, new_task.id, new_task.metadata) {
            Ok(header) => header,
            Err(reason) => {
                report.skip(ENTITY, new_task.id, reason);
                continue;
            }
        };
        let Some(wire_stats) = update.stats_update.remove(&span) else {
            report.skip(ENTITY, Some(span), SkipReason::MissingStats);
            continue;
        };
        let Some(stats) = TaskStats::from_wire(&wire_stats) else {
            report.skip(ENTITY, Some(span), SkipReason::MissingCreatedAt);
            continue;
        };

        let id = tasks.id_for(span);
        let task = build_task(new_task, span, meta, stats, id);
        let replaced = tasks.insert(id, task).is_some();
        report.record_insert(id, replaced);
    }

    for (span, wire_stats) in &update.stats_update {
        let Some(task) = tasks.get_by_span_id_mut(*span) else {
            debug!(span_id = %span, "stats for unknown task");
            continue;
        };
        let Some(stats) = TaskStats::from_wire(wire_stats) else {
            report.skip(ENTITY, Some(*span), SkipReason::MissingCreatedAt);
            continue;
        };
        task.stats = stats;
        let id = task.id;
        report.record_update(id);
    }

    report
}

fn build_task(
    wire_task: &wire::Task,
    span: SpanId,
    meta: &Metadata,
    stats: TaskStats,
    id: StableId,
) -> Task {
    let mut name = None;
    let mut remote_task_id = None;
    let mut kind = String::new();
    let mut fields = Vec::with_capacity(wire_task.fields.len() + 1);

    for field in wire_task
        .fields
        .iter()
        .filter_map(|f| Field::from_wire(f, meta))
    {
        match field.name.as_str() {
            Field::NAME => name = Some(field.value.to_string()),
            Field::TASK_ID => {
                remote_task_id = match field.value {
                    FieldValue::U64(v) => Some(v),
                    _ => None,
                };
            }
            Field::KIND => kind = field.value.to_string(),
            _ => fields.push(field),
        }
    }
    fields.push(Field::new("target", FieldValue::Str(meta.target.clone())));

    Task {
        id,
        remote_task_id,
        span_id: span,
        short_desc: Task::short_desc(remote_task_id, name.as_deref()),
        fields,
        stats,
        target: meta.target.clone(),
        name,
        location: format_location(wire_task.location.as_ref()),
        kind,
        warnings: Vec::new(),
    }
}
