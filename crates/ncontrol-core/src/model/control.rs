// ── Control domain types ──

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::Display;

use super::EntityId;

/// Control-type tag. Decides how clients render a control and, for
/// [`ControlType::Echo`], how the agent routes its updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ControlType {
    Boolean,
    #[serde(rename = "string")]
    #[strum(serialize = "string")]
    Text,
    Int,
    F32,
    Range,
    Select,
    Object,
    /// Reserved: requested values are looped straight back as observed.
    Echo,
    /// Any tag this agent does not interpret.
    #[default]
    #[serde(other)]
    Other,
}

/// A single controllable or observable point on an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Control {
    #[serde(rename = "_id")]
    pub id: EntityId,
    #[serde(default)]
    pub endpoint_id: Option<EntityId>,
    pub ctid: String,
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub control_type: ControlType,
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub usertype: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub config: Value,
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub poll: bool,
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub ephemeral: bool,
}

impl Control {
    pub fn belongs_to(&self, endpoint_id: &EntityId) -> bool {
        self.endpoint_id.as_ref() == Some(endpoint_id)
    }
}

/// A communicator's declaration of a control it needs, matched to
/// server records by `ctid`. Serializes as a new control record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlTemplate {
    pub endpoint_id: EntityId,
    pub ctid: String,
    pub name: String,
    pub control_type: ControlType,
    #[serde(default)]
    pub usertype: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub poll: bool,
    #[serde(default)]
    pub ephemeral: bool,
}

impl ControlTemplate {
    pub fn new(
        endpoint_id: EntityId,
        ctid: impl Into<String>,
        name: impl Into<String>,
        control_type: ControlType,
    ) -> Self {
        Self {
            endpoint_id,
            ctid: ctid.into(),
            name: name.into(),
            control_type,
            usertype: String::new(),
            value: Value::Null,
            config: Map::new(),
            poll: false,
            ephemeral: false,
        }
    }

    pub fn with_usertype(mut self, usertype: impl Into<String>) -> Self {
        self.usertype = usertype.into();
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = value;
        self
    }

    pub fn polled(mut self) -> Self {
        self.poll = true;
        self
    }

    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }
}

/// Lifecycle of a control update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UpdateStatus {
    /// A client asked for the value; the device has not confirmed it.
    Requested,
    /// The device reported the value.
    Observed,
    #[serde(other)]
    Other,
}

/// A requested or observed value change for one control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlUpdate {
    #[serde(rename = "_id")]
    pub id: EntityId,
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub name: String,
    pub control_id: EntityId,
    #[serde(default)]
    pub value: Value,
    #[serde(rename = "type", default, deserialize_with = "super::null_as_default")]
    pub kind: String,
    pub status: UpdateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<EntityId>,
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub ephemeral: bool,
}
