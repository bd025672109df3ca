// ── Server requests ──
//
// Typed builders for every payload the agent sends. Each request knows
// its event name and, for acknowledged requests, what the agent should do
// with the reply.

use serde_json::{Value, json};

use ncontrol_api::events;

use crate::model::{ControlTemplate, ControlUpdate, EndpointStatus, EntityId, tables};

/// What an acknowledgement resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Continuation {
    Endpoint,
    EndpointType,
    Controls,
    AddControls,
    StatusPushed,
}

/// An acknowledged request.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRequest {
    pub continuation: Continuation,
    pub event: &'static str,
    pub data: Value,
}

impl DataRequest {
    pub fn get_endpoint(id: &EntityId) -> Self {
        Self::get(Continuation::Endpoint, tables::ENDPOINTS, json!({ "_id": id }))
    }

    pub fn get_endpoint_type(id: &EntityId) -> Self {
        Self::get(
            Continuation::EndpointType,
            tables::ENDPOINT_TYPES,
            json!({ "_id": id }),
        )
    }

    pub fn get_controls(endpoint_id: &EntityId) -> Self {
        Self::get(
            Continuation::Controls,
            tables::CONTROLS,
            json!({ "endpoint_id": endpoint_id }),
        )
    }

    pub fn add_controls(templates: &[ControlTemplate]) -> Self {
        Self {
            continuation: Continuation::AddControls,
            event: events::ADD_DATA,
            data: json!({ "controls": templates }),
        }
    }

    pub fn update_status(endpoint_id: &EntityId, status: &EndpointStatus) -> Self {
        Self {
            continuation: Continuation::StatusPushed,
            event: events::UPDATE_DATA,
            data: json!({
                "table": tables::ENDPOINTS,
                "_id": endpoint_id,
                "set": { "epStatus": status },
            }),
        }
    }

    fn get(continuation: Continuation, table: &str, params: Value) -> Self {
        Self {
            continuation,
            event: events::GET_DATA,
            data: json!({ "table": table, "params": params }),
        }
    }
}

pub fn register_endpoint(endpoint_id: &EntityId) -> (&'static str, Value) {
    (
        events::REGISTER_ENDPOINT,
        json!({ "endpoint_id": endpoint_id }),
    )
}

pub fn control_updates(updates: &[ControlUpdate]) -> (&'static str, Value) {
    (events::CONTROL_UPDATES, json!(updates))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ControlType;
    use pretty_assertions::assert_eq;

    #[test]
    fn get_requests_filter_by_id() {
        let req = DataRequest::get_controls(&EntityId::from("E1"));
        assert_eq!(req.event, "get-data");
        assert_eq!(
            req.data,
            json!({ "table": "controls", "params": { "endpoint_id": "E1" } })
        );
        assert_eq!(req.continuation.to_string(), "controls");
    }

    #[test]
    fn add_request_lists_templates() {
        let template =
            ControlTemplate::new(EntityId::from("E1"), "E1-power", "Power", ControlType::Boolean);
        let req = DataRequest::add_controls(&[template]);
        assert_eq!(req.event, "add-data");
        assert_eq!(req.data["controls"][0]["ctid"], json!("E1-power"));
    }

    #[test]
    fn status_push_sets_ep_status() {
        let status = EndpointStatus {
            device_online: true,
            ..EndpointStatus::default()
        };
        let req = DataRequest::update_status(&EntityId::from("E1"), &status);
        assert_eq!(req.data["table"], json!("endpoints"));
        assert_eq!(req.data["_id"], json!("E1"));
        assert_eq!(req.data["set"]["epStatus"]["deviceOnline"], json!(true));
    }

    #[test]
    fn uuid_shaped_endpoint_id_goes_out_verbatim() {
        let raw = "550E8400-E29B-41D4-A716-446655440000";
        let id = EntityId::from(raw);

        let req = DataRequest::get_endpoint(&id);
        assert_eq!(req.data["params"]["_id"], json!(raw));

        let (event, data) = register_endpoint(&id);
        assert_eq!(event, "register-endpoint");
        assert_eq!(data, json!({ "endpoint_id": raw }));
    }
}
