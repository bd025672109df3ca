//! The capability contract every device communicator implements.
//!
//! A communicator speaks one device protocol. The agent owns exactly one
//! instance per process, configures it once with a [`CommunicatorContext`],
//! hands it the reconciled control set, and then drives its lifecycle:
//!
//! ```text
//! configure → control_templates → set_templates → run → connect
//!                                                     ↕
//!                                 disconnect / reset (address change)
//! ```
//!
//! Communicators never talk to the server themselves. Observed values and
//! status changes go back through the context, which queues them onto the
//! agent's event loop.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::model::{Control, ControlTemplate, ControlUpdate, Endpoint, EndpointStatusPatch, EntityId};
use crate::store::{ControlSet, DataStore};

/// Declared templates keyed by `ctid`.
pub type TemplateSet = BTreeMap<String, ControlTemplate>;

// ── Callbacks ───────────────────────────────────────────────────────

/// Something a communicator reports back to the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum CommunicatorEvent {
    /// The device reported a value for one of its controls.
    ValueObserved { control_id: EntityId, value: Value },
    /// Process-owned status fields changed.
    StatusChanged(EndpointStatusPatch),
}

/// Handle given to a communicator at configure time.
///
/// Reads the endpoint from the live store, so address changes are
/// visible by the time `reset` is called.
#[derive(Clone)]
pub struct CommunicatorContext {
    endpoint_id: EntityId,
    store: Arc<DataStore>,
    events: mpsc::UnboundedSender<CommunicatorEvent>,
}

impl CommunicatorContext {
    pub fn new(
        endpoint_id: EntityId,
        store: Arc<DataStore>,
        events: mpsc::UnboundedSender<CommunicatorEvent>,
    ) -> Self {
        Self {
            endpoint_id,
            store,
            events,
        }
    }

    pub fn endpoint_id(&self) -> &EntityId {
        &self.endpoint_id
    }

    /// Current endpoint record.
    pub fn endpoint(&self) -> Option<Arc<Endpoint>> {
        self.store.endpoint(&self.endpoint_id)
    }

    /// Report a value read from the device.
    pub fn report_value(&self, control: &Control, value: Value) {
        self.send(CommunicatorEvent::ValueObserved {
            control_id: control.id.clone(),
            value,
        });
    }

    /// Report a change to the process-owned status fields.
    pub fn update_status(&self, patch: EndpointStatusPatch) {
        self.send(CommunicatorEvent::StatusChanged(patch));
    }

    fn send(&self, event: CommunicatorEvent) {
        if self.events.send(event).is_err() {
            debug!(endpoint_id = %self.endpoint_id, "agent stopped, dropping communicator event");
        }
    }
}

// ── Contract ────────────────────────────────────────────────────────

/// A device-protocol adapter.
///
/// Every method is called from the agent's event loop and must return
/// promptly; long-running device I/O belongs on tasks the communicator
/// spawns itself.
pub trait Communicator: Send {
    /// Type name matched against `EndpointType.communicatorClass`.
    fn name(&self) -> &str;

    /// Called exactly once, before anything else.
    fn configure(&mut self, ctx: CommunicatorContext);

    /// Templates for every control this communicator needs.
    fn control_templates(&self) -> TemplateSet;

    /// The reconciled control set for this endpoint.
    fn set_templates(&mut self, controls: &ControlSet);

    /// Start background work. Called once, after `set_templates`.
    fn run(&mut self) {}

    fn connect(&mut self);

    fn disconnect(&mut self);

    /// Drop and re-open the device connection.
    fn reset(&mut self) {
        self.disconnect();
        self.connect();
    }

    fn is_connected(&self) -> bool;

    /// A client requested a new value.
    fn handle_control_update_request(&mut self, update: &ControlUpdate);

    fn log(&self, message: &str, tag: &str) {
        info!(communicator = self.name(), tag, "{message}");
    }
}

// ── Stub ────────────────────────────────────────────────────────────

/// Communicator that talks to nothing.
///
/// Declares no templates, tracks connect state, reports it as status,
/// and logs every update request. Useful for exercising a deployment
/// before the real device is reachable.
#[derive(Default)]
pub struct StubCommunicator {
    ctx: Option<CommunicatorContext>,
    connected: bool,
}

impl StubCommunicator {
    pub const NAME: &'static str = "StubCommunicator";

    pub fn new() -> Self {
        Self::default()
    }

    fn report_connected(&self, connected: bool) {
        if let Some(ctx) = &self.ctx {
            ctx.update_status(EndpointStatusPatch {
                connected: Some(connected),
                ok: Some(connected),
                ..EndpointStatusPatch::default()
            });
        }
    }
}

impl Communicator for StubCommunicator {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn configure(&mut self, ctx: CommunicatorContext) {
        self.ctx = Some(ctx);
    }

    fn control_templates(&self) -> TemplateSet {
        TemplateSet::new()
    }

    fn set_templates(&mut self, controls: &ControlSet) {
        self.log(&format!("received {} controls", controls.len()), "templates");
    }

    fn connect(&mut self) {
        if self.ctx.is_none() {
            warn!("stub communicator connected before configure");
        }
        self.connected = true;
        self.report_connected(true);
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.report_connected(false);
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn handle_control_update_request(&mut self, update: &ControlUpdate) {
        self.log(
            &format!("ignoring update {} = {}", update.control_id, update.value),
            "update",
        );
    }
}
