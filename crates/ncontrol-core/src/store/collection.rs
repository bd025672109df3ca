// ── Keyed entity collection ──
//
// Concurrent storage with O(1) lookups by record id. Values are held
// behind `Arc` so readers get cheap snapshots that outlive later writes.

use std::sync::Arc;

use dashmap::DashMap;

use crate::model::EntityId;

/// Storage for a single record type, keyed by `_id`.
pub(crate) struct EntityCollection<T: Send + Sync + 'static> {
    by_id: DashMap<EntityId, Arc<T>>,
}

impl<T: Send + Sync + 'static> EntityCollection<T> {
    pub(crate) fn new() -> Self {
        Self {
            by_id: DashMap::new(),
        }
    }

    /// Insert or replace a record. Returns `true` if the id was new.
    pub(crate) fn upsert(&self, id: EntityId, entity: T) -> bool {
        self.by_id.insert(id, Arc::new(entity)).is_none()
    }

    pub(crate) fn get(&self, id: &EntityId) -> Option<Arc<T>> {
        self.by_id.get(id).map(|r| Arc::clone(r.value()))
    }

    /// All records matching `pred`.
    pub(crate) fn filter(&self, pred: impl Fn(&T) -> bool) -> Vec<Arc<T>> {
        self.by_id
            .iter()
            .filter(|r| pred(r.value()))
            .map(|r| Arc::clone(r.value()))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
