//! Callsite metadata registry.
//!
//! Every task, resource and async op references the metadata of the span
//! that created it. Metadata is registered once by the remote and is
//! immutable afterwards; entities name it by [`MetaId`].

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::wire::{MetadataRecord, RegisterMetadata};

/// Remote identifier of a metadata record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetaId(pub u64);

impl fmt::Display for MetaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: MetaId,
    pub name: String,
    /// Namespace the span was recorded under, e.g. `tokio::task`.
    pub target: String,
    pub module_path: Option<String>,
    /// Field names in declaration order; `NameIdx` fields index into this.
    pub field_names: Vec<String>,
}

impl Metadata {
    #[must_use]
    pub fn from_wire(id: MetaId, record: &MetadataRecord) -> Self {
        Self {
            id,
            name: record.name.clone(),
            target: record.target.clone(),
            module_path: record.module_path.clone(),
            field_names: record.field_names.clone(),
        }
    }

    #[must_use]
    pub fn field_name(&self, index: u64) -> Option<&str> {
        let index = usize::try_from(index).ok()?;
        self.field_names.get(index).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    metas: HashMap<MetaId, Metadata>,
}

impl MetadataRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a batch of new metadata. Returns how many were added.
    ///
    /// Records without an id or body are skipped. An id that is already
    /// registered keeps its original record.
    pub fn register(&mut self, batch: &RegisterMetadata) -> usize {
        let mut added = 0;
        for entry in &batch.metadata {
            let (Some(id), Some(record)) = (entry.id, entry.metadata.as_ref()) else {
                warn!(meta_id = ?entry.id, "skipping metadata without id or body");
                continue;
            };
            if self.metas.contains_key(&id) {
                debug!(meta_id = %id, "metadata already registered");
                continue;
            }
            self.metas.insert(id, Metadata::from_wire(id, record));
            added += 1;
        }
        added
    }

    #[must_use]
    pub fn get(&self, id: MetaId) -> Option<&Metadata> {
        self.metas.get(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.metas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metas.is_empty()
    }
}
