use thiserror::Error;

/// Top-level error type for the `ncontrol-api` crate.
///
/// Covers every failure mode of the server channel: URL handling,
/// websocket connection, frame encoding, and request acknowledgement.
/// `ncontrol-core` maps these into domain diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── URL ─────────────────────────────────────────────────────────
    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The server URL uses a scheme the channel cannot upgrade to a websocket.
    #[error("Unsupported URL scheme '{0}' (expected http, https, ws or wss)")]
    UnsupportedScheme(String),

    // ── WebSocket ───────────────────────────────────────────────────
    /// Opening the websocket failed (DNS, TCP, TLS or upgrade rejected).
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// An established websocket failed while reading or writing.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    // ── Requests ────────────────────────────────────────────────────
    /// The server did not acknowledge a request within the configured window.
    #[error("Request '{event}' was not acknowledged within {timeout_secs}s")]
    Timeout { event: String, timeout_secs: u64 },

    /// The background connection task has stopped.
    #[error("Server channel closed")]
    ChannelClosed,

    // ── Data ────────────────────────────────────────────────────────
    /// A frame could not be encoded or decoded.
    #[error("Frame encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` if the request simply went unanswered.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if this is a transient error that a reconnect may cure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::WebSocketConnect(_) | Self::WebSocket(_) | Self::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_transient() {
        let err = Error::Timeout {
            event: "get-data".into(),
            timeout_secs: 30,
        };
        assert!(err.is_timeout());
        assert!(err.is_transient());
        assert_eq!(
            err.to_string(),
            "Request 'get-data' was not acknowledged within 30s"
        );
    }

    #[test]
    fn closed_channel_is_not_transient() {
        assert!(!Error::ChannelClosed.is_transient());
        assert!(!Error::UnsupportedScheme("ftp".into()).is_timeout());
    }
}
