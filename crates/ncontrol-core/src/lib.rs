//! Synchronization and relay engine for a DevCtrl endpoint agent.
//!
//! One agent process serves one endpoint. It loads that endpoint's
//! records from the coordination server, makes sure the server knows
//! every control the device communicator declares, and then relays
//! control updates between the server and the communicator.
//!
//! - **[`Controller`]**: async driver. Owns the server channel and runs
//!   the event loop until cancelled or a fatal error.
//!
//! - **[`Agent`]**: synchronous state machine. Each [`AgentEvent`] in,
//!   a list of [`Effect`]s out; testable without a socket.
//!
//! - **[`DataStore`]**: concurrent keyed storage for endpoints,
//!   endpoint types and controls, merged from server payloads.
//!
//! - **[`Communicator`]**: the device-protocol contract, looked up by
//!   name in a [`CommunicatorRegistry`] built from compiled-in packages.
//!
//! - **Engines**: [`bootstrap`] (fetch sequence and template
//!   reconciliation), [`relay`] (control-update routing), [`status`]
//!   (endpoint status carry-forward and change detection).

pub mod agent;
pub mod bootstrap;
pub mod communicator;
pub mod config;
pub mod controller;
pub mod error;
pub mod model;
pub mod registry;
pub mod relay;
pub mod request;
pub mod status;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use agent::{Agent, AgentEvent, Effect};
pub use bootstrap::{BootstrapState, BootstrapSync};
pub use communicator::{
    Communicator, CommunicatorContext, CommunicatorEvent, StubCommunicator, TemplateSet,
};
pub use config::AgentConfig;
pub use controller::Controller;
pub use error::CoreError;
pub use registry::{
    CommunicatorFactory, CommunicatorPackage, CommunicatorRegistry, StaticPackage,
    builtin_packages, select_packages,
};
pub use request::{Continuation, DataRequest};
pub use store::{ControlSet, DataSnapshot, DataStore};

pub use model::{
    Control, ControlTemplate, ControlType, ControlUpdate, Endpoint, EndpointStatus,
    EndpointStatusPatch, EndpointType, EntityId, UpdateStatus,
};
