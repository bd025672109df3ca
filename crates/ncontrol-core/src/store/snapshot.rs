// ── Data payload decoding ──
//
// Acknowledgements of get/add/update requests and server-pushed
// `control-data` events share one shape:
//
//     { "add": { "<table>": { "<id>": <record>, ... } }, "error"?: ... }
//
// Decoding is lenient: unknown tables are ignored and records that do
// not fit the model are logged and skipped, so one bad row never hides
// the rest of a snapshot.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::model::{Control, Endpoint, EndpointType, EntityId, tables};

/// Records decoded from one data payload, ready to merge into the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataSnapshot {
    pub endpoints: Vec<Endpoint>,
    pub endpoint_types: Vec<EndpointType>,
    pub controls: Vec<Control>,
    /// Server-reported failure. When set, the payload is not merged.
    pub error: Option<String>,
}

impl DataSnapshot {
    pub fn from_payload(payload: &Value) -> Self {
        let mut snapshot = Self {
            error: match payload.get("error") {
                None | Some(Value::Null) => None,
                Some(Value::String(message)) => Some(message.clone()),
                Some(other) => Some(other.to_string()),
            },
            ..Self::default()
        };

        let Some(add) = payload.get("add").and_then(Value::as_object) else {
            return snapshot;
        };

        for (table, records) in add {
            match table.as_str() {
                tables::ENDPOINTS => snapshot.endpoints = decode_table(table, records),
                tables::ENDPOINT_TYPES => snapshot.endpoint_types = decode_table(table, records),
                tables::CONTROLS => snapshot.controls = decode_table(table, records),
                other => debug!(table = other, "ignoring records for unknown table"),
            }
        }
        snapshot
    }

    /// Drop control records owned by any other endpoint. Returns how many were dropped.
    pub fn retain_controls_for(&mut self, endpoint_id: &EntityId) -> usize {
        let before = self.controls.len();
        self.controls.retain(|c| c.belongs_to(endpoint_id));
        before - self.controls.len()
    }

    pub fn endpoint_mut(&mut self, id: &EntityId) -> Option<&mut Endpoint> {
        self.endpoints.iter_mut().find(|ep| &ep.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty() && self.endpoint_types.is_empty() && self.controls.is_empty()
    }
}

/// Decode one table. Records arrive keyed by id; a record missing its
/// own `_id` inherits the key.
fn decode_table<T: DeserializeOwned>(table: &str, records: &Value) -> Vec<T> {
    let entries: Vec<(Option<&String>, &Value)> = match records {
        Value::Object(map) => map.iter().map(|(id, record)| (Some(id), record)).collect(),
        Value::Array(list) => list.iter().map(|record| (None, record)).collect(),
        _ => {
            warn!(table, "table payload is neither an object nor an array");
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .filter_map(|(key, record)| {
            let mut record = record.clone();
            if let (Some(key), Some(obj)) = (key, record.as_object_mut()) {
                obj.entry("_id").or_insert_with(|| Value::String(key.clone()));
            }
            match serde_json::from_value(record) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    warn!(table, id = ?key, error = %e, "skipping undecodable record");
                    None
                }
            }
        })
        .collect()
}
