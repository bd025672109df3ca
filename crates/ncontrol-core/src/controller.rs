// ── Agent controller ──
//
// Async driver around the `Agent` state machine. Owns the server
// channel, multiplexes channel events, request completions and
// communicator callbacks onto one loop, and carries out the effects the
// agent returns. All agent state is touched from this loop only.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ncontrol_api::{ChannelConfig, ChannelHandle, ReconnectConfig, websocket_url};

use crate::agent::{Agent, AgentEvent, Effect};
use crate::config::AgentConfig;
use crate::error::CoreError;
use crate::registry::CommunicatorRegistry;
use crate::request::Continuation;
use crate::store::DataStore;

type Completion = (Continuation, Result<Value, ncontrol_api::Error>);

/// Runs one agent against one server until cancelled or a fatal error.
pub struct Controller {
    config: AgentConfig,
    registry: CommunicatorRegistry,
    store: Arc<DataStore>,
}

impl Controller {
    pub fn new(config: AgentConfig, registry: CommunicatorRegistry) -> Self {
        Self {
            config,
            registry,
            store: Arc::new(DataStore::new()),
        }
    }

    pub fn store(&self) -> Arc<DataStore> {
        Arc::clone(&self.store)
    }

    /// Connect and serve until `cancel` fires.
    ///
    /// Returns `Err` only for fatal conditions; connection loss is
    /// retried forever in the background.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), CoreError> {
        let url = websocket_url(&self.config.server_url, &self.config.io_path)?;
        info!(%url, endpoint_id = %self.config.endpoint_id, "connecting");

        let channel_config = ChannelConfig {
            url,
            auth_id: self.config.auth_id.clone(),
            request_timeout: self.config.request_timeout,
            reconnect: ReconnectConfig {
                initial_delay: self.config.reconnect_initial_delay,
                max_delay: self.config.reconnect_max_delay,
            },
        };
        let (channel, mut channel_rx) = ChannelHandle::connect(channel_config, cancel.child_token())?;

        let (communicator_tx, mut communicator_rx) = mpsc::unbounded_channel();
        let (completion_tx, mut completion_rx) = mpsc::unbounded_channel::<Completion>();
        let mut agent = Agent::new(&self.config, self.registry, self.store, communicator_tx);

        let result = loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("shutdown requested");
                    break Ok(());
                }
                Some(event) = channel_rx.recv() => AgentEvent::Channel(event),
                Some((continuation, result)) = completion_rx.recv() => {
                    AgentEvent::Acked { continuation, result }
                }
                Some(event) = communicator_rx.recv() => AgentEvent::Communicator(event),
                else => {
                    debug!("all event sources closed");
                    break Ok(());
                }
            };

            match agent.handle(event) {
                Ok(effects) => execute(&channel, &completion_tx, effects),
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "fatal agent error");
                    break Err(e);
                }
                Err(e) => warn!(error = %e, "agent error, continuing"),
            }
        };

        agent.shutdown();
        channel.shutdown();
        result
    }
}

fn execute(
    channel: &ChannelHandle,
    completions: &mpsc::UnboundedSender<Completion>,
    effects: Vec<Effect>,
) {
    for effect in effects {
        match effect {
            Effect::Emit { event, data } => {
                if let Err(e) = channel.emit(event, data) {
                    warn!(event, error = %e, "failed to emit");
                }
            }
            Effect::Request(request) => {
                debug!(event = request.event, continuation = %request.continuation, "sending request");
                let reply = channel.request(request.event, request.data);
                let completions = completions.clone();
                let continuation = request.continuation;
                tokio::spawn(async move {
                    let result = reply.await;
                    if completions.send((continuation, result)).is_err() {
                        debug!(%continuation, "agent stopped before request completed");
                    }
                });
            }
        }
    }
}
