//! Agent error types with miette diagnostics.
//!
//! Maps core and config errors into operator-facing errors with help
//! text and distinct exit codes, so a supervisor can tell a bad config
//! from a server that refused our controls.

use miette::Diagnostic;
use thiserror::Error;

use ncontrol_config::ConfigError;
use ncontrol_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const CONFIG: i32 = 2;
    pub const TEMPLATE_SYNC: i32 = 3;
    pub const COMMUNICATOR: i32 = 4;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum AgentError {
    #[error("Invalid configuration: {message}")]
    #[diagnostic(
        code(ncontrol::config),
        help(
            "Config files are read from /etc/devctrl/, ./ and ./conf/ (config.json, \
             then <name>.json), then NCONTROL_* environment variables, then flags."
        )
    )]
    Config { message: String },

    #[error("Communicator type '{name}' is not available")]
    #[diagnostic(
        code(ncontrol::communicator_not_found),
        help(
            "Available: {available}\n\
             Build the agent with the package that provides '{name}', list that package \
             in communicatorPackages, or run with --stub."
        )
    )]
    CommunicatorNotFound { name: String, available: String },

    #[error("{message}")]
    #[diagnostic(
        code(ncontrol::template_sync),
        help(
            "The server did not store the controls this communicator declared. \
             Check the server log for rejected add-data requests."
        )
    )]
    TemplateSync { message: String },

    #[error("Could not reach the server: {reason}")]
    #[diagnostic(code(ncontrol::connection_failed))]
    ConnectionFailed { reason: String },

    #[error("{0}")]
    #[diagnostic(code(ncontrol::internal))]
    Internal(String),
}

impl AgentError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => exit_code::CONFIG,
            Self::CommunicatorNotFound { .. } => exit_code::COMMUNICATOR,
            Self::TemplateSync { .. } => exit_code::TEMPLATE_SYNC,
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Internal(_) => exit_code::GENERAL,
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<ConfigError> for AgentError {
    fn from(err: ConfigError) -> Self {
        Self::Config {
            message: err.to_string(),
        }
    }
}

impl From<CoreError> for AgentError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::CommunicatorNotFound { name, available } => {
                Self::CommunicatorNotFound { name, available }
            }
            CoreError::TemplateSyncFailed { .. } => Self::TemplateSync {
                message: err.to_string(),
            },
            CoreError::Config { message } => Self::Config { message },
            CoreError::ConnectionFailed { url, reason } if url.is_empty() => {
                Self::ConnectionFailed { reason }
            }
            CoreError::ConnectionFailed { url, reason } => Self::ConnectionFailed {
                reason: format!("{url}: {reason}"),
            },
            CoreError::ChannelClosed => Self::ConnectionFailed {
                reason: err.to_string(),
            },
            CoreError::Timeout { .. } | CoreError::PackageLoad { .. } | CoreError::Internal(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}
