//! Entity stores.
//!
//! A [`Store`] owns the authoritative `StableId -> record` map for one entity
//! class together with that class's [`IdMap`]. Records are kept in a
//! `BTreeMap` so iteration follows id assignment order.

use std::collections::BTreeMap;
use std::collections::btree_map;

use crate::ids::{IdMap, SpanId, StableId};

#[derive(Debug, Clone)]
pub struct Store<T> {
    items: BTreeMap<StableId, T>,
    ids: IdMap,
}

impl<T> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Store<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: BTreeMap::new(),
            ids: IdMap::new(),
        }
    }

    /// Stable id for `span`, allocating one if the span is new.
    pub fn id_for(&mut self, span: SpanId) -> StableId {
        self.ids.id_for(span)
    }

    /// The identity map backing this store.
    #[must_use]
    pub fn ids(&self) -> &IdMap {
        &self.ids
    }

    #[must_use]
    pub fn get(&self, id: StableId) -> Option<&T> {
        self.items.get(&id)
    }

    pub fn get_mut(&mut self, id: StableId) -> Option<&mut T> {
        self.items.get_mut(&id)
    }

    /// Remote span id -> stable id -> record. Never allocates.
    #[must_use]
    pub fn get_by_span_id(&self, span: SpanId) -> Option<&T> {
        self.ids.get(span).and_then(|id| self.items.get(&id))
    }

    pub fn get_by_span_id_mut(&mut self, span: SpanId) -> Option<&mut T> {
        let id = self.ids.get(span)?;
        self.items.get_mut(&id)
    }

    /// Insert or replace the record stored under `id`.
    pub fn insert(&mut self, id: StableId, item: T) -> Option<T> {
        self.items.insert(id, item)
    }

    /// Keep only the records for which `keep` returns `true`.
    ///
    /// Identity mappings are untouched, so evicted ids are never reissued.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) -> usize {
        let before = self.items.len();
        self.items.retain(|_, item| keep(item));
        before - self.items.len()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, StableId, T> {
        self.items.iter()
    }

    pub fn values(&self) -> btree_map::Values<'_, StableId, T> {
        self.items.values()
    }

    pub fn values_mut(&mut self) -> btree_map::ValuesMut<'_, StableId, T> {
        self.items.values_mut()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
