// ── In-memory entity store ──
//
// The single source of local truth for endpoints, endpoint types and
// controls. All writes go through `apply`, the generic load routine:
// every decoded record replaces whatever was stored under its id.

mod collection;
mod snapshot;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::model::{Control, Endpoint, EndpointType, EntityId};

use self::collection::EntityCollection;
pub use self::snapshot::DataSnapshot;

/// Controls handed to a communicator, indexed by control id.
pub type ControlSet = HashMap<EntityId, Arc<Control>>;

pub struct DataStore {
    endpoints: EntityCollection<Endpoint>,
    endpoint_types: EntityCollection<EndpointType>,
    controls: EntityCollection<Control>,
}

impl DataStore {
    pub fn new() -> Self {
        Self {
            endpoints: EntityCollection::new(),
            endpoint_types: EntityCollection::new(),
            controls: EntityCollection::new(),
        }
    }

    /// Merge every record in `snapshot`. Returns how many ids were new.
    pub fn apply(&self, snapshot: DataSnapshot) -> usize {
        let mut added = 0;
        for ep in snapshot.endpoints {
            added += usize::from(self.endpoints.upsert(ep.id.clone(), ep));
        }
        for ty in snapshot.endpoint_types {
            added += usize::from(self.endpoint_types.upsert(ty.id.clone(), ty));
        }
        for control in snapshot.controls {
            added += usize::from(self.controls.upsert(control.id.clone(), control));
        }
        debug!(
            added,
            endpoints = self.endpoints.len(),
            endpoint_types = self.endpoint_types.len(),
            controls = self.controls.len(),
            "data merged"
        );
        added
    }

    pub fn upsert_endpoint(&self, endpoint: Endpoint) {
        self.endpoints.upsert(endpoint.id.clone(), endpoint);
    }

    pub fn endpoint(&self, id: &EntityId) -> Option<Arc<Endpoint>> {
        self.endpoints.get(id)
    }

    pub fn endpoint_type(&self, id: &EntityId) -> Option<Arc<EndpointType>> {
        self.endpoint_types.get(id)
    }

    pub fn control(&self, id: &EntityId) -> Option<Arc<Control>> {
        self.controls.get(id)
    }

    /// Controls owned by `endpoint_id`, ordered by `ctid`.
    pub fn controls_for(&self, endpoint_id: &EntityId) -> Vec<Arc<Control>> {
        let mut controls = self.controls.filter(|c| c.belongs_to(endpoint_id));
        controls.sort_by(|a, b| a.ctid.cmp(&b.ctid));
        controls
    }

    /// Indexed view of the controls owned by `endpoint_id`.
    pub fn control_snapshot(&self, endpoint_id: &EntityId) -> ControlSet {
        self.controls_for(endpoint_id)
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect()
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn payload() -> DataSnapshot {
        DataSnapshot::from_payload(&json!({
            "add": {
                "endpoints": { "E1": { "_id": "E1", "endpointType_id": "T1" } },
                "controls": {
                    "C2": { "_id": "C2", "endpoint_id": "E1", "ctid": "E1-volume" },
                    "C1": { "_id": "C1", "endpoint_id": "E1", "ctid": "E1-power" },
                    "C9": { "_id": "C9", "endpoint_id": "E9", "ctid": "E9-power" }
                }
            }
        }))
    }

    #[test]
    fn apply_counts_new_ids() {
        let store = DataStore::new();
        assert_eq!(store.apply(payload()), 4);
        assert_eq!(store.apply(payload()), 0);
        assert!(store.endpoint(&EntityId::from("E1")).is_some());
        assert!(store.endpoint_type(&EntityId::from("T1")).is_none());
    }

    #[test]
    fn controls_for_filters_and_orders_by_ctid() {
        let store = DataStore::new();
        store.apply(payload());
        let ctids: Vec<_> = store
            .controls_for(&EntityId::from("E1"))
            .iter()
            .map(|c| c.ctid.clone())
            .collect();
        assert_eq!(ctids, vec!["E1-power", "E1-volume"]);

        let set = store.control_snapshot(&EntityId::from("E1"));
        assert_eq!(set.len(), 2);
        assert!(set.contains_key(&EntityId::from("C2")));
    }
}
