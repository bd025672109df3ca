// ── Endpoint domain types ──

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::EntityId;

/// A controllable device as the server knows it.
///
/// The agent serves exactly one endpoint. Address fields feed the
/// communicator; `enabled` decides whether it should be connected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(rename = "_id")]
    pub id: EntityId,
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub name: String,
    #[serde(rename = "endpointType_id")]
    pub endpoint_type_id: EntityId,
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub ip: String,
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub port: u16,
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub enabled: bool,
    #[serde(rename = "epStatus", default, deserialize_with = "super::null_as_default")]
    pub status: EndpointStatus,
    /// Remaining server fields (device settings and the like), carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Endpoint {
    /// `ip:port` as shown in logs.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// The `epStatus` sub-record.
///
/// `enabled` is mirrored from the server's endpoint configuration. Every
/// other field is owned by this agent and is only ever written locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointStatus {
    #[serde(deserialize_with = "super::null_as_default")]
    pub enabled: bool,
    #[serde(deserialize_with = "super::null_as_default")]
    pub messenger_connected: bool,
    #[serde(deserialize_with = "super::null_as_default")]
    pub device_online: bool,
    #[serde(deserialize_with = "super::null_as_default")]
    pub reachable: bool,
    #[serde(deserialize_with = "super::null_as_default")]
    pub connected: bool,
    #[serde(deserialize_with = "super::null_as_default")]
    pub logged_in: bool,
    #[serde(deserialize_with = "super::null_as_default")]
    pub polling: bool,
    #[serde(deserialize_with = "super::null_as_default")]
    pub responsive: bool,
    #[serde(deserialize_with = "super::null_as_default")]
    pub ok: bool,
}

impl EndpointStatus {
    /// This status with only the server-owned field replaced.
    pub fn with_server_fields(&self, enabled: bool) -> Self {
        Self {
            enabled,
            ..self.clone()
        }
    }

    /// Merge a communicator-reported patch. Returns `true` if anything changed.
    pub fn apply(&mut self, patch: &EndpointStatusPatch) -> bool {
        let before = self.clone();
        let fields = [
            (&mut self.messenger_connected, patch.messenger_connected),
            (&mut self.device_online, patch.device_online),
            (&mut self.reachable, patch.reachable),
            (&mut self.connected, patch.connected),
            (&mut self.logged_in, patch.logged_in),
            (&mut self.polling, patch.polling),
            (&mut self.responsive, patch.responsive),
            (&mut self.ok, patch.ok),
        ];
        for (field, value) in fields {
            if let Some(value) = value {
                *field = value;
            }
        }
        *self != before
    }
}

/// Partial update of the process-owned status fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStatusPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messenger_connected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_online: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reachable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logged_in: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polling: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responsive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
}

/// Describes which communicator implementation drives an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointType {
    #[serde(rename = "_id")]
    pub id: EntityId,
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub name: String,
    #[serde(rename = "communicatorClass", default, deserialize_with = "super::null_as_default")]
    pub communicator_class: String,
}
