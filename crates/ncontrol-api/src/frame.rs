//! JSON frames exchanged over the server websocket.
//!
//! Every text frame is a single JSON object. Three optional keys decide
//! what the frame means:
//!
//! | `event` | `ack` | meaning                                  |
//! |---------|-------|------------------------------------------|
//! | yes     | no    | fire-and-forget event                    |
//! | yes     | yes   | request; the peer must acknowledge `ack` |
//! | no      | yes   | acknowledgement of request `ack`         |

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Header carrying the agent's auth identity on the websocket upgrade.
pub const AUTH_HEADER: &str = "ncontrol-auth-id";

/// Event names used on the server channel.
pub mod events {
    /// Fetch entity records (`{table, params}`).
    pub const GET_DATA: &str = "get-data";
    /// Create entity records (`{<table>: [records]}`).
    pub const ADD_DATA: &str = "add-data";
    /// Patch a single entity record (`{table, _id, set}`).
    pub const UPDATE_DATA: &str = "update-data";
    /// Announce which endpoint this agent serves.
    pub const REGISTER_ENDPOINT: &str = "register-endpoint";
    /// Batch of control updates, in either direction.
    pub const CONTROL_UPDATES: &str = "control-updates";
    /// Server-pushed data snapshot.
    pub const CONTROL_DATA: &str = "control-data";
}

/// A single websocket text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,

    #[serde(default)]
    pub data: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
}

/// What a decoded [`Frame`] asks of the receiver.
#[derive(Debug, PartialEq)]
pub enum FrameKind<'a> {
    Event(&'a str),
    Request { event: &'a str, ack: u64 },
    Ack(u64),
    Invalid,
}

impl Frame {
    pub fn event(name: impl Into<String>, data: Value) -> Self {
        Self {
            event: Some(name.into()),
            data,
            ack: None,
        }
    }

    pub fn request(name: impl Into<String>, data: Value, ack: u64) -> Self {
        Self {
            event: Some(name.into()),
            data,
            ack: Some(ack),
        }
    }

    pub fn ack(ack: u64, data: Value) -> Self {
        Self {
            event: None,
            data,
            ack: Some(ack),
        }
    }

    pub fn kind(&self) -> FrameKind<'_> {
        match (self.event.as_deref(), self.ack) {
            (Some(event), None) => FrameKind::Event(event),
            (Some(event), Some(ack)) => FrameKind::Request { event, ack },
            (None, Some(ack)) => FrameKind::Ack(ack),
            (None, None) => FrameKind::Invalid,
        }
    }

    pub fn encode(&self) -> Result<String, crate::Error> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, crate::Error> {
        Ok(serde_json::from_str(text)?)
    }
}
