// ── Core error types ──
//
// Errors surfaced by the agent engine. Transport failures from
// `ncontrol-api` are translated here so the binary never matches on
// websocket details directly.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to server at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Server channel closed")]
    ChannelClosed,

    #[error("Server request '{event}' timed out after {timeout_secs}s")]
    Timeout { event: String, timeout_secs: u64 },

    // ── Bootstrap errors ─────────────────────────────────────────────
    #[error("Communicator type '{name}' not found (available: {available})")]
    CommunicatorNotFound { name: String, available: String },

    #[error(
        "failed to sync control templates: {missing} template(s) still missing after {passes} passes"
    )]
    TemplateSyncFailed { passes: u8, missing: usize },

    #[error("Communicator package '{package}' failed to load: {reason}")]
    PackageLoad { package: String, reason: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Errors that must stop the agent rather than be logged and survived.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CommunicatorNotFound { .. } | Self::TemplateSyncFailed { .. } | Self::Config { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<ncontrol_api::Error> for CoreError {
    fn from(err: ncontrol_api::Error) -> Self {
        match err {
            ncontrol_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            ncontrol_api::Error::UnsupportedScheme(scheme) => CoreError::Config {
                message: format!("Unsupported server URL scheme '{scheme}'"),
            },
            ncontrol_api::Error::WebSocketConnect(reason) | ncontrol_api::Error::WebSocket(reason) => {
                CoreError::ConnectionFailed {
                    url: String::new(),
                    reason,
                }
            }
            ncontrol_api::Error::Timeout {
                event,
                timeout_secs,
            } => CoreError::Timeout {
                event,
                timeout_secs,
            },
            ncontrol_api::Error::ChannelClosed => CoreError::ChannelClosed,
            ncontrol_api::Error::Encoding(e) => {
                CoreError::Internal(format!("Frame encoding error: {e}"))
            }
        }
    }
}
