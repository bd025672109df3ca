//! Configuration for the ncontrol agent.
//!
//! JSON config files found in well-known directories, layered over
//! built-in defaults and under `NCONTROL_*` environment variables, then
//! validated into an `ncontrol_core::AgentConfig`.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use url::Url;

use ncontrol_core::{AgentConfig, EntityId};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── File config ─────────────────────────────────────────────────────

/// The on-disk configuration record. Keys are camelCase.
#[derive(Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileConfig {
    /// Server base URL.
    pub ws_url: String,
    /// Websocket path on the server.
    pub io_path: String,
    /// Endpoint this agent serves.
    pub endpoint_id: String,
    /// Identity sent with the websocket upgrade.
    pub auth_id: String,
    /// Bypass the registry and use the stub communicator.
    pub use_stub_communicator: bool,
    /// Communicator packages to load, in order. Unset loads all.
    pub communicator_packages: Option<Vec<String>>,
    pub request_timeout_secs: u64,
    pub reconnect_initial_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            ws_url: "http://localhost:2880/".into(),
            io_path: AgentConfig::DEFAULT_IO_PATH.into(),
            endpoint_id: "overrideme".into(),
            auth_id: "overrideme".into(),
            use_stub_communicator: false,
            communicator_packages: None,
            request_timeout_secs: AgentConfig::DEFAULT_REQUEST_TIMEOUT.as_secs(),
            reconnect_initial_delay_ms: 1000,
            reconnect_max_delay_ms: 30_000,
        }
    }
}

impl fmt::Debug for FileConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileConfig")
            .field("ws_url", &self.ws_url)
            .field("io_path", &self.io_path)
            .field("endpoint_id", &self.endpoint_id)
            .field("auth_id", &"[REDACTED]")
            .field("use_stub_communicator", &self.use_stub_communicator)
            .field("communicator_packages", &self.communicator_packages)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("reconnect_initial_delay_ms", &self.reconnect_initial_delay_ms)
            .field("reconnect_max_delay_ms", &self.reconnect_max_delay_ms)
            .finish()
    }
}

impl FileConfig {
    /// Validate and convert into the runtime config.
    pub fn into_agent_config(self) -> Result<AgentConfig, ConfigError> {
        let server_url: Url = self.ws_url.parse().map_err(|e| ConfigError::Validation {
            field: "wsUrl".into(),
            reason: format!("'{}' is not a URL: {e}", self.ws_url),
        })?;
        if !matches!(server_url.scheme(), "http" | "https" | "ws" | "wss") {
            return Err(ConfigError::Validation {
                field: "wsUrl".into(),
                reason: format!(
                    "scheme '{}' is not one of http, https, ws, wss",
                    server_url.scheme()
                ),
            });
        }

        let endpoint_id = self.endpoint_id.trim();
        if endpoint_id.is_empty() {
            return Err(ConfigError::Validation {
                field: "endpointId".into(),
                reason: "must not be empty".into(),
            });
        }

        let mut config = AgentConfig::new(
            server_url,
            EntityId::from(endpoint_id),
            SecretString::from(self.auth_id),
        );
        config.io_path = self.io_path;
        config.use_stub_communicator = self.use_stub_communicator;
        config.communicator_packages = self.communicator_packages;
        config.request_timeout = Duration::from_secs(self.request_timeout_secs.max(1));
        config.reconnect_initial_delay = Duration::from_millis(self.reconnect_initial_delay_ms);
        config.reconnect_max_delay = Duration::from_millis(
            self.reconnect_max_delay_ms
                .max(self.reconnect_initial_delay_ms),
        );
        Ok(config)
    }
}

// ── Discovery ───────────────────────────────────────────────────────

/// Directories searched for config files, in merge order.
pub fn config_dirs() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = ["/etc/devctrl/", "./", "./conf/"]
        .into_iter()
        .map(PathBuf::from)
        .collect();
    if let Some(project) = ProjectDirs::from("org", "devctrl", "ncontrol") {
        dirs.push(project.config_dir().to_path_buf());
    }
    dirs
}

/// Existing config files under `dirs`, in merge order.
///
/// `config.json` is looked up in every directory first, then
/// `<name>.json` when a config name is given.
pub fn config_files(dirs: &[PathBuf], name: Option<&str>) -> Vec<PathBuf> {
    let mut file_names = vec!["config.json".to_owned()];
    if let Some(name) = name.filter(|n| !n.is_empty()) {
        file_names.push(format!("{name}.json"));
    }

    file_names
        .iter()
        .flat_map(|file| dirs.iter().map(move |dir| dir.join(file)))
        .filter(|path| path.is_file())
        .collect()
}

// ── Loading ─────────────────────────────────────────────────────────

/// Load from the standard directories and environment.
pub fn load_config(name: Option<&str>) -> Result<FileConfig, ConfigError> {
    load_from(&config_dirs(), name)
}

/// Load from `dirs` plus `NCONTROL_*` environment variables.
pub fn load_from(dirs: &[PathBuf], name: Option<&str>) -> Result<FileConfig, ConfigError> {
    let mut figment = Figment::new().merge(Serialized::defaults(FileConfig::default()));
    for path in config_files(dirs, name) {
        info!(path = %path.display(), "configuration read");
        figment = figment.merge(Json::file(&path));
    }
    figment = figment.merge(
        Env::prefixed("NCONTROL_")
            .map(|key| env_key(key.as_str()).into())
            .lowercase(false),
    );

    Ok(figment.extract()?)
}

/// `ws_url` → `wsUrl`, so `NCONTROL_WS_URL` lands on the JSON key.
fn env_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out
}
