// ── Domain model ──
//
// Wire-compatible records for the three tables the agent reads
// (`endpoints`, `endpoint_types`, `controls`) plus control updates.

pub mod control;
pub mod endpoint;
pub mod entity_id;

pub use control::{Control, ControlTemplate, ControlType, ControlUpdate, UpdateStatus};
pub use endpoint::{Endpoint, EndpointStatus, EndpointStatusPatch, EndpointType};
pub use entity_id::EntityId;

use serde::{Deserialize, Deserializer};

/// Server records may spell an unset field as `null`; read it as the default.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Server table names.
pub mod tables {
    pub const ENDPOINTS: &str = "endpoints";
    pub const ENDPOINT_TYPES: &str = "endpoint_types";
    pub const CONTROLS: &str = "controls";
}
