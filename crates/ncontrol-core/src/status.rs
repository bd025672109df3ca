// ── Status reconciliation ──
//
// Server snapshots may carry an endpoint record whose `epStatus` is
// stale or empty. Only `enabled` is taken from the server; every other
// status field is owned by this agent and is carried forward onto the
// incoming record before it is merged.

use tracing::{debug, info};

use crate::communicator::Communicator;
use crate::model::Endpoint;
use crate::store::DataSnapshot;

/// How an endpoint record changed, as far as the communicator cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Unchanged,
    Enabled,
    Disabled,
    /// `ip` or `port` changed while `enabled` did not.
    AddressChanged,
}

/// Copy the process-owned status of `current` onto its incoming record.
pub fn carry_forward(snapshot: &mut DataSnapshot, current: &Endpoint) {
    if let Some(incoming) = snapshot.endpoint_mut(&current.id) {
        incoming.status = current.status.with_server_fields(incoming.enabled);
    }
}

pub fn classify(old: &Endpoint, new: &Endpoint) -> StatusChange {
    if old.enabled != new.enabled {
        if new.enabled {
            StatusChange::Enabled
        } else {
            StatusChange::Disabled
        }
    } else if old.ip != new.ip || old.port != new.port {
        StatusChange::AddressChanged
    } else {
        StatusChange::Unchanged
    }
}

/// Drive the communicator lifecycle for `change`.
pub fn apply_change(change: StatusChange, communicator: &mut dyn Communicator) {
    match change {
        StatusChange::Enabled => {
            info!("endpoint enabled, connecting");
            communicator.connect();
        }
        StatusChange::Disabled => {
            info!("endpoint disabled, disconnecting");
            communicator.disconnect();
        }
        StatusChange::AddressChanged => {
            info!("ip/port change, resetting communicator");
            communicator.reset();
        }
        StatusChange::Unchanged => debug!("endpoint unchanged"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::EndpointStatus;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn endpoint(enabled: bool, ip: &str, port: u16) -> Endpoint {
        serde_json::from_value(json!({
            "_id": "E1", "endpointType_id": "T1", "enabled": enabled, "ip": ip, "port": port
        }))
        .unwrap()
    }

    #[test]
    fn process_owned_fields_survive_snapshot() {
        let mut current = endpoint(false, "10.0.0.5", 23);
        current.status = EndpointStatus {
            device_online: true,
            connected: true,
            ..EndpointStatus::default()
        };

        let mut snapshot = DataSnapshot::from_payload(&json!({ "add": { "endpoints": {
            "E1": { "endpointType_id": "T1", "enabled": true, "epStatus": { "deviceOnline": false } }
        } } }));
        carry_forward(&mut snapshot, &current);

        let merged = &snapshot.endpoints[0].status;
        assert!(merged.device_online);
        assert!(merged.connected);
        assert!(merged.enabled, "enabled comes from the server record");
    }

    #[test]
    fn snapshot_without_this_endpoint_is_untouched() {
        let current = endpoint(true, "10.0.0.5", 23);
        let mut snapshot = DataSnapshot::from_payload(&json!({ "add": { "endpoints": {
            "E2": { "endpointType_id": "T1" }
        } } }));
        let before = snapshot.clone();
        carry_forward(&mut snapshot, &current);
        assert_eq!(snapshot, before);
    }

    #[test]
    fn classify_changes() {
        let base = endpoint(false, "10.0.0.5", 23);
        assert_eq!(classify(&base, &endpoint(true, "10.0.0.5", 23)), StatusChange::Enabled);
        assert_eq!(classify(&endpoint(true, "a", 1), &endpoint(false, "a", 1)), StatusChange::Disabled);
        assert_eq!(classify(&base, &endpoint(false, "10.0.0.6", 23)), StatusChange::AddressChanged);
        assert_eq!(classify(&base, &endpoint(false, "10.0.0.5", 24)), StatusChange::AddressChanged);
        assert_eq!(classify(&base, &base.clone()), StatusChange::Unchanged);
    }

    #[test]
    fn enable_wins_over_address_change() {
        let old = endpoint(false, "10.0.0.5", 23);
        let new = endpoint(true, "10.0.0.9", 23);
        assert_eq!(classify(&old, &new), StatusChange::Enabled);
    }
}
