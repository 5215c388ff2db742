use tracing::debug;

use super::{ReconcileReport, SkipReason, resolve_header};
use crate::field::format_location;
use crate::metadata::MetadataRegistry;
use crate::resource::{NOT_AVAILABLE, Resource, ResourceStats, Visibility, kind_name};
use crate::store::Store;
use crate::wire;

const ENTITY: &str = "resource";

/// Merge one resource update batch into `resources`.
///
/// Parents are resolved against resources already in the store, including
/// ones added earlier in the same batch.
pub fn reconcile_resources(
    mut update: wire::ResourceUpdate,
    metas: &MetadataRegistry,
    resources: &mut Store<Resource>,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    for new_resource in &update.new_resources {
        let (span, meta) = match resolve_header(metas, new_resource.id, new_resource.metadata) {
            Ok(header) => header,
            Err(reason) => {
                report.skip(ENTITY, new_resource.id, reason);
                continue;
            }
        };
        let kind = match new_resource.kind.as_ref().map(kind_name) {
            Some(Ok(kind)) => kind,
            Some(Err(code)) => {
                report.skip(ENTITY, Some(span), SkipReason::UnparseableKind(code.to_string()));
                continue;
            }
            None => {
                report.skip(ENTITY, Some(span), SkipReason::MissingKind);
                continue;
            }
        };
        let Some(wire_stats) = update.stats_update.remove(&span) else {
            report.skip(ENTITY, Some(span), SkipReason::MissingStats);
            continue;
        };
        let Some(stats) = ResourceStats::from_wire(&wire_stats, meta) else {
            report.skip(ENTITY, Some(span), SkipReason::MissingCreatedAt);
            continue;
        };

        let id = resources.id_for(span);
        let parent_id = new_resource
            .parent_resource_id
            .map(|parent| resources.id_for(parent));
        let parent_label = parent_id
            .and_then(|parent| resources.get(parent))
            .map_or_else(|| NOT_AVAILABLE.to_string(), Resource::label);
        let parent_id_label =
            parent_id.map_or_else(|| NOT_AVAILABLE.to_string(), |parent| parent.to_string());

        let resource = Resource {
            id,
            span_id: span,
            parent_id,
            parent_label,
            parent_id_label,
            meta_id: meta.id,
            kind,
            stats,
            target: meta.target.clone(),
            concrete_type: new_resource.concrete_type.clone(),
            location: format_location(new_resource.location.as_ref()),
            visibility: if new_resource.is_internal {
                Visibility::Internal
            } else {
                Visibility::Public
            },
        };
        let replaced = resources.insert(id, resource).is_some();
        report.record_insert(id, replaced);
    }

    for (span, wire_stats) in &update.stats_update {
        let Some(resource) = resources.get_by_span_id_mut(*span) else {
            debug!(span_id = %span, "stats for unknown resource");
            continue;
        };
        let Some(meta) = metas.get(resource.meta_id) else {
            report.skip(ENTITY, Some(*span), SkipReason::UnknownMetadata(resource.meta_id));
            continue;
        };
        let Some(stats) = ResourceStats::from_wire(wire_stats, meta) else {
            report.skip(ENTITY, Some(*span), SkipReason::MissingCreatedAt);
            continue;
        };
        resource.stats = stats;
        let id = resource.id;
        report.record_update(id);
    }

    report
}
