// ── Control-update relay ──
//
// Inbound: server batches of control updates are filtered down to the
// `requested` updates for this endpoint's controls. Echo controls are
// answered immediately with an `observed` copy; everything else goes to
// the communicator.
//
// Outbound: values a communicator reports become `observed` updates
// stamped with a fresh id.

use serde_json::Value;
use tracing::{debug, warn};

use crate::model::{Control, ControlType, ControlUpdate, EntityId, UpdateStatus};
use crate::store::DataStore;

/// Routing decision for one inbound update.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayAction {
    /// Hand the request to the communicator.
    Forward(ControlUpdate),
    /// Send this observed update straight back to the server.
    Echo(ControlUpdate),
}

/// Decode a `control-updates` payload, skipping malformed entries.
pub fn decode_batch(data: &Value) -> Vec<ControlUpdate> {
    let Some(items) = data.as_array() else {
        warn!("control-updates payload is not an array");
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(update) => Some(update),
            Err(e) => {
                warn!(error = %e, "skipping malformed control update");
                None
            }
        })
        .collect()
}

/// Route a batch of inbound updates.
///
/// Processing stops at the first echo: later updates in the same batch
/// are dropped.
pub fn route_inbound(
    updates: Vec<ControlUpdate>,
    endpoint_id: &EntityId,
    store: &DataStore,
) -> Vec<RelayAction> {
    let mut actions = Vec::new();
    for update in updates {
        let Some(control) = store.control(&update.control_id) else {
            debug!(control_id = %update.control_id, "update for unknown control");
            continue;
        };
        if !control.belongs_to(endpoint_id) || update.status != UpdateStatus::Requested {
            continue;
        }

        debug!(control = %control.name, value = %update.value, "control update");
        if control.control_type == ControlType::Echo {
            actions.push(RelayAction::Echo(observed_update(
                &control,
                update.value,
                endpoint_id,
            )));
            break;
        }
        actions.push(RelayAction::Forward(update));
    }
    actions
}

/// An `observed` update for `control` carrying `value`.
pub fn observed_update(control: &Control, value: Value, source: &EntityId) -> ControlUpdate {
    ControlUpdate {
        id: EntityId::generate(),
        name: format!("{} update", control.name),
        control_id: control.id.clone(),
        value,
        kind: "device".to_owned(),
        status: UpdateStatus::Observed,
        source: Some(source.clone()),
        ephemeral: control.ephemeral,
    }
}
