//! Stable identifiers for remote spans.
//!
//! The instrumented process names tasks, resources and async ops by their
//! `tracing` span id, which is volatile and may be reused by the remote once
//! a span closes. [`IdMap`] hands out small sequential [`StableId`]s in
//! first-seen order instead. Mappings are never removed, so an id is never
//! reused even after its entity has been evicted.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The remote runtime's span identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpanId(pub u64);

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session-local sequential identifier, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StableId(pub u64);

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bijection from [`SpanId`] to [`StableId`] for one entity class.
#[derive(Debug, Clone)]
pub struct IdMap {
    next: u64,
    map: HashMap<SpanId, StableId>,
}

impl Default for IdMap {
    fn default() -> Self {
        Self::new()
    }
}

impl IdMap {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: 1,
            map: HashMap::new(),
        }
    }

    /// Return the stable id for `span`, allocating the next one if unseen.
    pub fn id_for(&mut self, span: SpanId) -> StableId {
        let next = &mut self.next;
        *self.map.entry(span).or_insert_with(|| {
            let id = StableId(*next);
            *next += 1;
            id
        })
    }

    /// Look up an existing mapping without allocating.
    #[must_use]
    pub fn get(&self, span: SpanId) -> Option<StableId> {
        self.map.get(&span).copied()
    }

    /// Number of span ids ever seen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
