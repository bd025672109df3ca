//! The agent state machine.
//!
//! [`Agent::handle`] takes one event (a channel lifecycle change, a
//! request acknowledgement, or a communicator callback), updates local
//! state, drives the communicator, and returns the [`Effect`]s the
//! caller must carry out on the server channel. It never awaits, so the
//! whole protocol can be exercised without a socket.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ncontrol_api::{ChannelEvent, events};

use crate::bootstrap::{self, BootstrapState, BootstrapStep, BootstrapSync};
use crate::communicator::{Communicator, CommunicatorContext, CommunicatorEvent};
use crate::config::AgentConfig;
use crate::error::CoreError;
use crate::model::{Endpoint, EndpointStatusPatch, EntityId};
use crate::registry::CommunicatorRegistry;
use crate::relay::{self, RelayAction};
use crate::request::{self, Continuation, DataRequest};
use crate::status::{self, StatusChange};
use crate::store::{DataSnapshot, DataStore};

/// Input to the state machine.
#[derive(Debug)]
pub enum AgentEvent {
    Channel(ChannelEvent),
    /// A request finished, successfully or not.
    Acked {
        continuation: Continuation,
        result: Result<Value, ncontrol_api::Error>,
    },
    Communicator(CommunicatorEvent),
}

/// Work for the caller to perform on the server channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Fire-and-forget event.
    Emit { event: &'static str, data: Value },
    /// Acknowledged request; feed the result back as [`AgentEvent::Acked`].
    Request(DataRequest),
}

impl Effect {
    fn emit((event, data): (&'static str, Value)) -> Self {
        Self::Emit { event, data }
    }
}

pub struct Agent {
    endpoint_id: EntityId,
    use_stub: bool,
    store: Arc<DataStore>,
    registry: CommunicatorRegistry,
    bootstrap: BootstrapSync,
    communicator: Option<Box<dyn Communicator>>,
    communicator_tx: mpsc::UnboundedSender<CommunicatorEvent>,
}

impl Agent {
    /// `communicator_tx` is handed to the communicator; whatever it sends
    /// must come back in through [`AgentEvent::Communicator`].
    pub fn new(
        config: &AgentConfig,
        registry: CommunicatorRegistry,
        store: Arc<DataStore>,
        communicator_tx: mpsc::UnboundedSender<CommunicatorEvent>,
    ) -> Self {
        Self {
            endpoint_id: config.endpoint_id.clone(),
            use_stub: config.use_stub_communicator,
            store,
            registry,
            bootstrap: BootstrapSync::new(config.endpoint_id.clone()),
            communicator: None,
            communicator_tx,
        }
    }

    pub fn store(&self) -> &Arc<DataStore> {
        &self.store
    }

    pub fn bootstrap_state(&self) -> BootstrapState {
        self.bootstrap.state()
    }

    pub fn communicator(&self) -> Option<&dyn Communicator> {
        self.communicator.as_deref()
    }

    /// The local endpoint record, once loaded.
    pub fn endpoint(&self) -> Option<Arc<Endpoint>> {
        self.store.endpoint(&self.endpoint_id)
    }

    /// Process one event.
    ///
    /// Errors are fatal: template reconciliation gave up or the
    /// endpoint's communicator type is unknown.
    pub fn handle(&mut self, event: AgentEvent) -> Result<Vec<Effect>, CoreError> {
        match event {
            AgentEvent::Channel(event) => self.on_channel(event),
            AgentEvent::Acked {
                continuation,
                result,
            } => self.on_ack(continuation, result),
            AgentEvent::Communicator(event) => Ok(self.on_communicator(event)),
        }
    }

    /// Disconnect the communicator before the process exits.
    pub fn shutdown(&mut self) {
        if let Some(communicator) = self.communicator.as_deref_mut() {
            if communicator.is_connected() {
                info!("disconnecting communicator");
                communicator.disconnect();
            }
        }
    }

    // ── Channel lifecycle ────────────────────────────────────────────

    fn on_channel(&mut self, event: ChannelEvent) -> Result<Vec<Effect>, CoreError> {
        match event {
            ChannelEvent::Connected => {
                info!("websocket client connected");
                let mut effects = Vec::new();
                if self.bootstrap.state() == BootstrapState::Idle {
                    let step = self.bootstrap.start();
                    effects.extend(self.step(step)?);
                }
                effects.push(self.registration());
                Ok(effects)
            }
            ChannelEvent::Reconnected { attempt } => {
                info!(attempt, "websocket client reconnected");
                let mut effects = vec![self.registration()];
                if let Some(endpoint) = self.endpoint() {
                    effects.push(Effect::Request(DataRequest::update_status(
                        &self.endpoint_id,
                        &endpoint.status,
                    )));
                }
                Ok(effects)
            }
            ChannelEvent::ConnectError(reason) => {
                warn!(error = %reason, "io connection error");
                Ok(Vec::new())
            }
            ChannelEvent::Error(reason) => {
                warn!(error = %reason, "websocket connection error");
                Ok(Vec::new())
            }
            ChannelEvent::Message { event, data } => Ok(self.on_message(&event, &data)),
        }
    }

    fn registration(&self) -> Effect {
        Effect::emit(request::register_endpoint(&self.endpoint_id))
    }

    fn on_message(&mut self, event: &str, data: &Value) -> Vec<Effect> {
        match event {
            events::CONTROL_DATA => {
                self.on_snapshot(data);
                Vec::new()
            }
            events::CONTROL_UPDATES => self.on_control_updates(data),
            other => {
                debug!(event = other, "ignoring server event");
                Vec::new()
            }
        }
    }

    // ── Request continuations ────────────────────────────────────────

    fn on_ack(
        &mut self,
        continuation: Continuation,
        result: Result<Value, ncontrol_api::Error>,
    ) -> Result<Vec<Effect>, CoreError> {
        let data = match result {
            Ok(data) => data,
            Err(e) if e.is_timeout() => {
                warn!(request = %continuation, error = %e, "request timed out, dropping continuation");
                return Ok(Vec::new());
            }
            Err(e) => {
                warn!(
                    request = %continuation,
                    error = %e,
                    transient = e.is_transient(),
                    "request failed, dropping continuation"
                );
                return Ok(Vec::new());
            }
        };

        let snapshot = DataSnapshot::from_payload(&data);
        if let Some(error) = &snapshot.error {
            warn!(request = %continuation, %error, "server reported an error");
        } else {
            self.merge(snapshot);
        }

        if continuation == Continuation::StatusPushed {
            return Ok(Vec::new());
        }
        if !self.bootstrap.expects(continuation) {
            debug!(request = %continuation, state = ?self.bootstrap.state(), "ignoring stale acknowledgement");
            return Ok(Vec::new());
        }

        match continuation {
            Continuation::Endpoint => {
                let step = self.bootstrap.endpoint_fetched(&self.store);
                self.step(step)
            }
            Continuation::EndpointType => {
                let step = self.bootstrap.endpoint_type_fetched();
                self.step(step)
            }
            Continuation::Controls => {
                self.launch_communicator()?;
                self.reconcile()
            }
            Continuation::AddControls => self.reconcile(),
            Continuation::StatusPushed => Ok(Vec::new()),
        }
    }

    fn step(&mut self, step: BootstrapStep) -> Result<Vec<Effect>, CoreError> {
        match step {
            BootstrapStep::Request(request) => Ok(vec![Effect::Request(request)]),
            BootstrapStep::Start => {
                self.start_communicator();
                Ok(Vec::new())
            }
            BootstrapStep::Stalled => Ok(Vec::new()),
        }
    }

    /// Instantiate and configure the communicator, at most once.
    fn launch_communicator(&mut self) -> Result<(), CoreError> {
        if self.communicator.is_some() {
            return Ok(());
        }
        let endpoint_type = self
            .endpoint()
            .and_then(|ep| self.store.endpoint_type(&ep.endpoint_type_id));
        let mut communicator =
            bootstrap::resolve_communicator(&self.registry, endpoint_type.as_deref(), self.use_stub)?;
        communicator.configure(CommunicatorContext::new(
            self.endpoint_id.clone(),
            Arc::clone(&self.store),
            self.communicator_tx.clone(),
        ));
        self.communicator = Some(communicator);
        Ok(())
    }

    fn reconcile(&mut self) -> Result<Vec<Effect>, CoreError> {
        let Some(communicator) = self.communicator.as_deref() else {
            return Err(CoreError::Internal(
                "template reconciliation without a communicator".into(),
            ));
        };
        let step = self.bootstrap.reconcile(communicator, &self.store)?;
        self.step(step)
    }

    fn start_communicator(&mut self) {
        let controls = self.store.control_snapshot(&self.endpoint_id);
        let endpoint = self.endpoint();
        let enabled = endpoint.as_ref().is_some_and(|ep| ep.enabled);
        let Some(communicator) = self.communicator.as_deref_mut() else {
            return;
        };

        communicator.set_templates(&controls);
        communicator.run();

        if !enabled {
            info!("endpoint not enabled, not connecting");
        } else if communicator.is_connected() {
            debug!("communicator already connected");
        } else {
            if let Some(ep) = &endpoint {
                info!(address = %ep.address(), "connecting communicator");
            }
            communicator.connect();
        }
    }

    // ── Inbound data ─────────────────────────────────────────────────

    /// Generic load routine. The local endpoint keeps its process-owned
    /// status whatever the payload says.
    fn merge(&self, mut snapshot: DataSnapshot) {
        if let Some(current) = self.endpoint() {
            status::carry_forward(&mut snapshot, &current);
        }
        self.store.apply(snapshot);
    }

    fn on_snapshot(&mut self, data: &Value) {
        let mut snapshot = DataSnapshot::from_payload(data);
        if let Some(error) = &snapshot.error {
            warn!(%error, "control-data error");
            return;
        }
        let dropped = snapshot.retain_controls_for(&self.endpoint_id);
        if dropped > 0 {
            debug!(dropped, "discarded controls for other endpoints");
        }

        let old = self.endpoint();
        self.merge(snapshot);
        let (Some(old), Some(new)) = (old, self.endpoint()) else {
            return;
        };

        let change = status::classify(&old, &new);
        if change == StatusChange::AddressChanged {
            info!(from = %old.address(), to = %new.address(), "endpoint address changed");
        }
        match self.communicator.as_deref_mut() {
            Some(communicator) => status::apply_change(change, communicator),
            None if change != StatusChange::Unchanged => {
                debug!(?change, "communicator not started, ignoring endpoint change");
            }
            None => {}
        }
    }

    fn on_control_updates(&mut self, data: &Value) -> Vec<Effect> {
        let actions =
            relay::route_inbound(relay::decode_batch(data), &self.endpoint_id, &self.store);

        let mut effects = Vec::new();
        for action in actions {
            match action {
                RelayAction::Forward(update) => match self.communicator.as_deref_mut() {
                    Some(communicator) => communicator.handle_control_update_request(&update),
                    None => {
                        debug!(control_id = %update.control_id, "communicator not started, dropping update");
                    }
                },
                RelayAction::Echo(update) => {
                    effects.push(Effect::emit(request::control_updates(&[update])));
                }
            }
        }
        effects
    }

    // ── Communicator callbacks ───────────────────────────────────────

    fn on_communicator(&mut self, event: CommunicatorEvent) -> Vec<Effect> {
        match event {
            CommunicatorEvent::ValueObserved { control_id, value } => {
                let Some(control) = self.store.control(&control_id) else {
                    warn!(%control_id, "value reported for unknown control");
                    return Vec::new();
                };
                let update = relay::observed_update(&control, value, &self.endpoint_id);
                vec![Effect::emit(request::control_updates(&[update]))]
            }
            CommunicatorEvent::StatusChanged(patch) => self.push_status(&patch),
        }
    }

    fn push_status(&self, patch: &EndpointStatusPatch) -> Vec<Effect> {
        let Some(current) = self.endpoint() else {
            debug!("status reported before the endpoint loaded");
            return Vec::new();
        };
        let mut endpoint = Endpoint::clone(&current);
        endpoint.status.apply(patch);
        let request = DataRequest::update_status(&self.endpoint_id, &endpoint.status);
        self.store.upsert_endpoint(endpoint);
        vec![Effect::Request(request)]
    }
}
