// ── Runtime agent configuration ──
//
// Describes which endpoint this agent serves and how to reach the
// server. Never touches disk: `ncontrol-config` builds an `AgentConfig`
// and hands it in.

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::model::EntityId;

/// Configuration for a single agent process.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Server URL (e.g. `http://localhost:2880/`). `http(s)` maps to `ws(s)`.
    pub server_url: Url,
    /// Websocket path on the server.
    pub io_path: String,
    /// Identity presented in the `ncontrol-auth-id` header.
    pub auth_id: SecretString,
    /// The endpoint this agent drives.
    pub endpoint_id: EntityId,
    /// Use the stub communicator regardless of the endpoint type.
    pub use_stub_communicator: bool,
    /// Communicator packages to load, in order. `None` loads every
    /// compiled-in package.
    pub communicator_packages: Option<Vec<String>>,
    pub request_timeout: Duration,
    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl AgentConfig {
    pub const DEFAULT_IO_PATH: &'static str = "/socket.io";
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Config for `endpoint_id` at `server_url` with default tuning.
    pub fn new(server_url: Url, endpoint_id: EntityId, auth_id: SecretString) -> Self {
        Self {
            server_url,
            io_path: Self::DEFAULT_IO_PATH.to_owned(),
            auth_id,
            endpoint_id,
            use_stub_communicator: false,
            communicator_packages: None,
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
            reconnect_initial_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
        }
    }
}
