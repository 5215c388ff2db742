//! Structured update records as they arrive from the instrumented process.
//!
//! These mirror the instrumentation protocol one-to-one and are the input to
//! the reconcilers. Every field the remote may omit is optional or defaulted
//! here; validation happens during reconciliation, where a malformed record
//! is skipped rather than rejected.
//!
//! Stats tables are keyed by remote [`SpanId`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::SpanId;
use crate::metadata::MetaId;
use crate::time::{Duration, Timestamp};

/// One message of the update feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Update {
    /// Server time at which this update was produced.
    pub now: Option<Timestamp>,
    pub new_metadata: Option<RegisterMetadata>,
    pub task_update: Option<TaskUpdate>,
    pub resource_update: Option<ResourceUpdate>,
    pub async_op_update: Option<AsyncOpUpdate>,
}

// =============================================================================
// Metadata
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterMetadata {
    pub metadata: Vec<NewMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewMetadata {
    pub id: Option<MetaId>,
    pub metadata: Option<MetadataRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataRecord {
    pub name: String,
    pub target: String,
    pub module_path: Option<String>,
    pub location: Option<Location>,
    pub field_names: Vec<String>,
}

// =============================================================================
// Shared pieces
// =============================================================================

/// Source location of a span or callsite.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    pub file: Option<String>,
    pub module_path: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

/// A field name is either inline or an index into the metadata's field list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    StrName(String),
    NameIdx(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    DebugVal(String),
    StrVal(String),
    U64Val(u64),
    I64Val(i64),
    BoolVal(bool),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Field {
    pub name: Option<FieldName>,
    pub value: Option<FieldValue>,
    /// Metadata the `NameIdx` refers to.
    pub metadata_id: Option<MetaId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attribute {
    pub field: Option<Field>,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollStats {
    pub polls: u64,
    pub first_poll: Option<Timestamp>,
    pub last_poll_started: Option<Timestamp>,
    pub last_poll_ended: Option<Timestamp>,
    pub busy_time: Option<Duration>,
}

// =============================================================================
// Tasks
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskUpdate {
    pub new_tasks: Vec<Task>,
    pub stats_update: BTreeMap<SpanId, TaskStats>,
    /// Events the remote dropped because its buffers were full.
    pub dropped_events: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    pub id: Option<SpanId>,
    pub metadata: Option<MetaId>,
    pub fields: Vec<Field>,
    pub parents: Vec<SpanId>,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskStats {
    pub created_at: Option<Timestamp>,
    pub dropped_at: Option<Timestamp>,
    pub wakes: u64,
    pub waker_clones: u64,
    pub waker_drops: u64,
    pub last_wake: Option<Timestamp>,
    pub poll_stats: Option<PollStats>,
    pub self_wakes: u64,
    pub scheduled_time: Option<Duration>,
}

// =============================================================================
// Resources
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceUpdate {
    pub new_resources: Vec<Resource>,
    pub stats_update: BTreeMap<SpanId, ResourceStats>,
    pub dropped_events: u64,
}

/// Well-known resource kind codes.
pub mod known_kind {
    pub const TIMER: i32 = 0;
}

/// Tagged resource kind: a code from [`known_kind`] or a free-form name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Known(i32),
    Other(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resource {
    pub id: Option<SpanId>,
    pub metadata: Option<MetaId>,
    pub kind: Option<ResourceKind>,
    pub concrete_type: String,
    pub location: Option<Location>,
    pub is_internal: bool,
    pub parent_resource_id: Option<SpanId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceStats {
    pub created_at: Option<Timestamp>,
    pub dropped_at: Option<Timestamp>,
    pub attributes: Vec<Attribute>,
}

// =============================================================================
// Async ops
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncOpUpdate {
    pub new_async_ops: Vec<AsyncOp>,
    pub stats_update: BTreeMap<SpanId, AsyncOpStats>,
    pub dropped_events: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncOp {
    pub id: Option<SpanId>,
    pub metadata: Option<MetaId>,
    pub source: String,
    pub parent_async_op_id: Option<SpanId>,
    pub resource_id: Option<SpanId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncOpStats {
    pub poll_stats: Option<PollStats>,
    pub created_at: Option<Timestamp>,
    pub dropped_at: Option<Timestamp>,
    pub task_id: Option<SpanId>,
    pub attributes: Vec<Attribute>,
}

// =============================================================================
// Task details
// =============================================================================

/// One snapshot of the per-task detail stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskDetails {
    pub task_id: Option<SpanId>,
    pub now: Option<Timestamp>,
    pub poll_times_histogram: Option<PollTimesHistogram>,
    pub scheduled_times_histogram: Option<DurationHistogram>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollTimesHistogram {
    Histogram(DurationHistogram),
    /// Older remotes send the serialized histogram bytes directly.
    LegacyHistogram(Vec<u8>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurationHistogram {
    pub raw_histogram: Vec<u8>,
    pub max_value: u64,
    pub high_outliers: u64,
    pub highest_outlier: Option<u64>,
}
