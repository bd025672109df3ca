//! Persistent server channel with auto-reconnect.
//!
//! Opens a websocket to the coordination server, keeps it open with
//! exponential backoff + jitter, and exposes two ways to talk to the
//! server: fire-and-forget [`emit`](ChannelHandle::emit) and
//! [`request`](ChannelHandle::request), which waits for exactly one
//! acknowledgement. Lifecycle changes and server-pushed events arrive on
//! the [`ChannelEvent`] receiver returned by [`ChannelHandle::connect`].
//!
//! # Example
//!
//! ```rust,ignore
//! use ncontrol_api::channel::{ChannelConfig, ChannelEvent, ChannelHandle};
//! use tokio_util::sync::CancellationToken;
//!
//! let (channel, mut events) = ChannelHandle::connect(config, CancellationToken::new())?;
//!
//! while let Some(event) = events.recv().await {
//!     if matches!(event, ChannelEvent::Connected) {
//!         let reply = channel.request("get-data", serde_json::json!({"table": "endpoints"})).await?;
//!         println!("{reply}");
//!     }
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::frame::{AUTH_HEADER, Frame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingAcks = DashMap<u64, oneshot::Sender<Value>>;

// ── ChannelEvent ─────────────────────────────────────────────────────

/// Something that happened on the server channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The first connection of this channel is open.
    Connected,
    /// A later connection is open after the previous one dropped.
    /// `attempt` counts the failed tries since the drop.
    Reconnected { attempt: u32 },
    /// A connection attempt failed.
    ConnectError(String),
    /// An open connection failed.
    Error(String),
    /// The server pushed a named event.
    Message { event: String, data: Value },
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

// ── ChannelConfig ────────────────────────────────────────────────────

/// Everything needed to open the server channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Fully resolved websocket URL (see [`websocket_url`]).
    pub url: Url,
    /// Value of the [`AUTH_HEADER`] sent on every upgrade request.
    pub auth_id: SecretString,
    /// How long [`ChannelHandle::request`] waits for an acknowledgement.
    pub request_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

/// Build the websocket URL from the configured server URL and path.
///
/// `http`/`https` map to `ws`/`wss`; `ws`/`wss` are kept as-is.
pub fn websocket_url(server: &Url, path: &str) -> Result<Url, Error> {
    let scheme = match server.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(Error::UnsupportedScheme(other.to_owned())),
    };

    let mut url = server.clone();
    url.set_scheme(scheme)
        .map_err(|()| Error::UnsupportedScheme(server.scheme().to_owned()))?;
    url.set_path(path);
    Ok(url)
}

// ── ChannelHandle ────────────────────────────────────────────────────

/// Handle to a running server channel.
///
/// Cheaply cloneable. Frames emitted while the connection is down are
/// queued and flushed once it is back. Call [`shutdown`](Self::shutdown)
/// to tear down the background task.
#[derive(Clone)]
pub struct ChannelHandle {
    outbound: mpsc::UnboundedSender<Frame>,
    pending: Arc<PendingAcks>,
    next_ack: Arc<AtomicU64>,
    request_timeout: Duration,
    cancel: CancellationToken,
}

impl ChannelHandle {
    /// Spawn the connection loop and return a handle plus the event receiver.
    ///
    /// Returns immediately. The first connection attempt happens in the
    /// background; [`ChannelEvent::Connected`] reports when it is open.
    pub fn connect(
        config: ChannelConfig,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChannelEvent>), Error> {
        let uri: tungstenite::http::Uri = config
            .url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(PendingAcks::new());

        let task = ConnectionTask {
            uri,
            auth_id: config.auth_id,
            reconnect: config.reconnect,
            pending: Arc::clone(&pending),
            event_tx,
            cancel: cancel.clone(),
        };
        tokio::spawn(task.run(outbound_rx));

        let handle = Self {
            outbound,
            pending,
            next_ack: Arc::new(AtomicU64::new(1)),
            request_timeout: config.request_timeout,
            cancel,
        };
        Ok((handle, event_rx))
    }

    /// Send a named event without waiting for any reply.
    pub fn emit(&self, event: &str, data: Value) -> Result<(), Error> {
        self.outbound
            .send(Frame::event(event, data))
            .map_err(|_| Error::ChannelClosed)
    }

    /// Send a named request and wait for its acknowledgement payload.
    ///
    /// The frame is queued before this returns, so requests reach the
    /// server in call order even when the futures are polled out of
    /// order. Fails with [`Error::Timeout`] when no acknowledgement
    /// arrives within the configured window; a late acknowledgement is
    /// then discarded.
    pub fn request(
        &self,
        event: &str,
        data: Value,
    ) -> impl Future<Output = Result<Value, Error>> + Send + 'static {
        let ack = self.next_ack.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(ack, tx);

        let queued = self.outbound.send(Frame::request(event, data, ack)).is_ok();
        if !queued {
            self.pending.remove(&ack);
        }

        let pending = Arc::clone(&self.pending);
        let timeout = self.request_timeout;
        let event = event.to_owned();
        async move {
            if !queued {
                return Err(Error::ChannelClosed);
            }
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(data)) => Ok(data),
                Ok(Err(_)) => Err(Error::ChannelClosed),
                Err(_) => {
                    pending.remove(&ack);
                    Err(Error::Timeout {
                        event,
                        timeout_secs: timeout.as_secs(),
                    })
                }
            }
        }
    }

    /// Number of requests still waiting for an acknowledgement.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Signal the background task to shut down gracefully.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background connection loop ───────────────────────────────────────

/// How a single connection ended without an error.
enum SessionEnd {
    /// The server closed the socket; reconnect.
    Closed,
    /// Cancelled, or every handle was dropped; stop for good.
    Shutdown,
}

struct ConnectionTask {
    uri: tungstenite::http::Uri,
    auth_id: SecretString,
    reconnect: ReconnectConfig,
    pending: Arc<PendingAcks>,
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
    cancel: CancellationToken,
}

impl ConnectionTask {
    /// Main loop: connect → serve → on drop, backoff → reconnect.
    async fn run(self, mut outbound_rx: mpsc::UnboundedReceiver<Frame>) {
        let mut attempt: u32 = 0;
        let mut opened: u64 = 0;

        loop {
            let opening = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                result = self.open() => result,
            };

            match opening {
                Ok(ws) => {
                    opened += 1;
                    let lifecycle = if opened == 1 {
                        ChannelEvent::Connected
                    } else {
                        ChannelEvent::Reconnected { attempt }
                    };
                    attempt = 0;
                    let _ = self.event_tx.send(lifecycle);

                    match self.serve(ws, &mut outbound_rx).await {
                        Ok(SessionEnd::Shutdown) => break,
                        // Server hung up cleanly; dial straight back.
                        Ok(SessionEnd::Closed) => {
                            tracing::info!("server closed the connection, reconnecting");
                            continue;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "server connection failed");
                            let _ = self.event_tx.send(ChannelEvent::Error(e.to_string()));
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "connection attempt failed");
                    let _ = self.event_tx.send(ChannelEvent::ConnectError(e.to_string()));
                }
            }

            let delay = calculate_backoff(attempt, &self.reconnect);
            tracing::info!(
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                attempt,
                "waiting before reconnect"
            );

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }

            attempt = attempt.saturating_add(1);
        }

        tracing::debug!("connection loop exiting");
    }

    /// Open a single websocket, presenting the auth identity header.
    async fn open(&self) -> Result<WsStream, Error> {
        tracing::info!(url = %self.uri, "connecting to server");

        let request = ClientRequestBuilder::new(self.uri.clone())
            .with_header(AUTH_HEADER, self.auth_id.expose_secret());

        let (ws, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        tracing::info!("server connection open");
        Ok(ws)
    }

    /// Pump frames in both directions until the connection drops.
    async fn serve(
        &self,
        ws: WsStream,
        outbound_rx: &mut mpsc::UnboundedReceiver<Frame>,
    ) -> Result<SessionEnd, Error> {
        let (mut write, mut read) = ws.split();

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    let _ = write.send(tungstenite::Message::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else {
                        tracing::debug!("all channel handles dropped");
                        let _ = write.send(tungstenite::Message::Close(None)).await;
                        return Ok(SessionEnd::Shutdown);
                    };
                    let text = frame.encode()?;
                    tracing::trace!(frame = %text, "sending frame");
                    write
                        .send(tungstenite::Message::text(text))
                        .await
                        .map_err(|e| Error::WebSocket(e.to_string()))?;
                }
                message = read.next() => {
                    match message {
                        Some(Ok(tungstenite::Message::Text(text))) => {
                            dispatch(&text, &self.pending, &self.event_tx);
                        }
                        Some(Ok(tungstenite::Message::Close(close))) => {
                            let code = close.as_ref().map(|c| u16::from(c.code));
                            let reason = close.as_ref().map(|c| c.reason.to_string()).unwrap_or_default();
                            tracing::info!(?code, %reason, "server closed the channel");
                            return Ok(SessionEnd::Closed);
                        }
                        // Pings are answered by tungstenite; nothing else carries frames.
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(Error::WebSocket(e.to_string())),
                        None => {
                            tracing::info!("server channel ended without a close frame");
                            return Ok(SessionEnd::Closed);
                        }
                    }
                }
            }
        }
    }
}

// ── Inbound dispatch ─────────────────────────────────────────────────

/// Route one inbound text frame: acknowledgements complete a pending
/// request, events go to the event receiver.
fn dispatch(text: &str, pending: &PendingAcks, event_tx: &mpsc::UnboundedSender<ChannelEvent>) {
    let frame = match Frame::decode(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse server frame");
            return;
        }
    };

    let Frame { event, data, ack } = frame;
    match (event, ack) {
        (None, Some(ack)) => {
            if let Some((_, tx)) = pending.remove(&ack) {
                let _ = tx.send(data);
            } else {
                tracing::debug!(ack, "acknowledgement for unknown or expired request");
            }
        }
        (Some(event), None) => {
            let _ = event_tx.send(ChannelEvent::Message { event, data });
        }
        (Some(event), Some(ack)) => {
            tracing::debug!(event, ack, "server requests are not supported, ignoring");
        }
        (None, None) => {
            tracing::debug!("frame has neither event nor ack, ignoring");
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Delay before reconnect attempt `attempt` (zero-based).
///
/// Doubles from `initial_delay` up to `max_delay`, then scales by a fixed
/// per-attempt factor between 0.75 and 1.25 so agents restarted together
/// do not all knock on the server in the same instant.
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let doubled = config
        .initial_delay
        .checked_mul(1_u32 << attempt.min(31))
        .unwrap_or(config.max_delay);
    doubled.min(config.max_delay).mul_f64(spread(attempt))
}

fn spread(attempt: u32) -> f64 {
    const FACTORS: [f64; 8] = [1.0, 1.2, 0.85, 1.1, 0.8, 1.25, 0.9, 0.75];
    usize::try_from(attempt % 8)
        .ok()
        .and_then(|i| FACTORS.get(i).copied())
        .unwrap_or(1.0)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn backoff_increases_exponentially() {
        let config = ReconnectConfig::default();

        let d0 = calculate_backoff(0, &config);
        let d1 = calculate_backoff(1, &config);
        let d2 = calculate_backoff(2, &config);

        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        };

        let d10 = calculate_backoff(10, &config);
        // Spread tops out at 1.25, so 12.5s at most.
        assert!(d10 <= Duration::from_secs(13), "delay {d10:?} not capped");

        let huge = calculate_backoff(u32::MAX, &config);
        assert!(huge <= Duration::from_secs(13), "delay {huge:?} not capped");
    }

    #[test]
    fn spread_stays_within_a_quarter() {
        for attempt in 0..32 {
            let factor = spread(attempt);
            assert!((0.75..=1.25).contains(&factor), "attempt {attempt}: {factor}");
        }
    }

    #[test]
    fn websocket_url_maps_schemes_and_path() {
        let http = Url::parse("http://localhost:2880/").unwrap();
        assert_eq!(
            websocket_url(&http, "/socket.io").unwrap().as_str(),
            "ws://localhost:2880/socket.io"
        );

        let https = Url::parse("https://devctrl.example.com").unwrap();
        assert_eq!(
            websocket_url(&https, "/ws").unwrap().as_str(),
            "wss://devctrl.example.com/ws"
        );

        let ftp = Url::parse("ftp://example.com").unwrap();
        assert!(matches!(
            websocket_url(&ftp, "/"),
            Err(Error::UnsupportedScheme(s)) if s == "ftp"
        ));
    }

    #[test]
    fn dispatch_completes_pending_request() {
        let pending = PendingAcks::new();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (tx, mut rx) = oneshot::channel();
        pending.insert(4, tx);

        dispatch(r#"{"ack": 4, "data": {"add": {}}}"#, &pending, &event_tx);

        assert_eq!(rx.try_recv().unwrap(), json!({ "add": {} }));
        assert!(pending.is_empty());
        assert!(event_rx.try_recv().is_err());
    }

    #[test]
    fn dispatch_forwards_server_events() {
        let pending = PendingAcks::new();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        dispatch(
            r#"{"event": "control-updates", "data": [{"_id": "u1"}]}"#,
            &pending,
            &event_tx,
        );

        assert_eq!(
            event_rx.try_recv().unwrap(),
            ChannelEvent::Message {
                event: "control-updates".into(),
                data: json!([{ "_id": "u1" }]),
            }
        );
    }

    #[test]
    fn dispatch_ignores_unknown_ack_and_garbage() {
        let pending = PendingAcks::new();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        dispatch(r#"{"ack": 99, "data": null}"#, &pending, &event_tx);
        dispatch("not json at all", &pending, &event_tx);

        assert!(event_rx.try_recv().is_err());
    }
}
