//! # Push Transport
//!
//! WebSocket client for cloud push deliveries, with automatic reconnection,
//! backoff and topic routing.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    WebSocket Connection States                          │
//! │                                                                         │
//! │  ┌────────────┐    spawn()      ┌────────────┐                         │
//! │  │Disconnected│ ──────────────► │ Connecting │                         │
//! │  └────────────┘                 └─────┬──────┘                         │
//! │        ▲                              │                                 │
//! │        │                    success   │   failure                       │
//! │        │                        ┌─────┴─────┐                          │
//! │        │                        ▼           ▼                           │
//! │        │              ┌────────────┐  ┌────────────┐                   │
//! │        │              │ Connected  │  │ Backoff    │                   │
//! │        │              │ (subscribe │  └─────┬──────┘                   │
//! │        │              │  frames    │        │                           │
//! │        │              │  re-sent)  │        │  timer expired            │
//! │        │              └─────┬──────┘        │                           │
//! │        │              disconnect/error      │                           │
//! │        │                    ▼               │                           │
//! │        │              ┌────────────┐        │                           │
//! │        └───────────── │Reconnecting│ ◄──────┘                          │
//! │         (shutdown)    └────────────┘                                    │
//! │                                                                         │
//! │  ROUTING                                                               │
//! │  ───────                                                               │
//! │  {"topic": T, "payload": P}  ──►  every live subscriber of T gets P    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::protocol::{ClientFrame, PushEnvelope};

type Subscribers = Arc<RwLock<HashMap<String, Vec<mpsc::Sender<Value>>>>>;

// =============================================================================
// Transport State
// =============================================================================

/// Connection state for the push socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected.
    Disconnected,
    /// Attempting to connect.
    Connecting,
    /// Connected and subscribed.
    Connected,
    /// Waiting before reconnection attempt.
    Backoff,
    /// Reconnection in progress.
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Backoff => write!(f, "backoff"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

// =============================================================================
// Transport Configuration
// =============================================================================

/// Configuration for the push socket.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// WebSocket URL to connect to.
    pub url: String,

    /// Bearer API key, sent as a query parameter on the handshake URL.
    pub api_key: Option<String>,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Initial reconnect backoff.
    pub initial_backoff: Duration,

    /// Maximum reconnect backoff.
    pub max_backoff: Duration,

    /// Ping interval for keepalive.
    pub ping_interval: Duration,

    /// Capacity of each subscriber's channel.
    pub subscriber_buffer: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        PushConfig {
            url: String::new(),
            api_key: None,
            connect_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            ping_interval: Duration::from_secs(30),
            subscriber_buffer: 32,
        }
    }
}

// =============================================================================
// Transport Handle
// =============================================================================

/// Handle for subscribing to topics and observing the socket.
#[derive(Clone)]
pub struct PushHandle {
    /// Frames to send on the live connection.
    outgoing_tx: mpsc::Sender<ClientFrame>,

    /// Topic → subscriber channels.
    subscribers: Subscribers,

    /// Current connection state.
    state: Arc<RwLock<ConnectionState>>,

    /// Shutdown signal.
    shutdown_tx: mpsc::Sender<()>,

    subscriber_buffer: usize,
}

impl PushHandle {
    /// Subscribes to a topic. Deliveries arrive on the returned receiver.
    ///
    /// The subscription survives reconnects: subscribe frames for every known
    /// topic are re-sent each time the socket comes back.
    pub async fn subscribe(&self, topic: &str) -> SyncResult<mpsc::Receiver<Value>> {
        let (tx, rx) = mpsc::channel(self.subscriber_buffer.max(1));

        let first_for_topic = {
            let mut subscribers = self.subscribers.write().await;
            let entry = subscribers.entry(topic.to_string()).or_default();
            entry.push(tx);
            entry.len() == 1
        };

        if first_for_topic && self.is_connected().await {
            self.outgoing_tx
                .send(ClientFrame::subscribe(topic))
                .await
                .map_err(|_| SyncError::ChannelError("Push transport stopped".into()))?;
        }

        debug!(topic, "Subscribed to push topic");
        Ok(rx)
    }

    /// Returns the current connection state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Returns true if currently connected.
    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Failed to send shutdown signal".into()))
    }
}

// =============================================================================
// Push Transport
// =============================================================================

/// WebSocket push client with automatic reconnection.
///
/// ## Usage
/// ```rust,ignore
/// let handle = PushTransport::spawn(PushConfig {
///     url: "wss://push.haven.example/v1/socket".into(),
///     ..Default::default()
/// });
///
/// let mut updates = handle.subscribe("config.updated").await?;
/// while let Some(payload) = updates.recv().await {
///     engine.apply_push(&payload).await?;
/// }
/// ```
pub struct PushTransport {
    config: PushConfig,
    state: Arc<RwLock<ConnectionState>>,
    subscribers: Subscribers,
    outgoing_rx: mpsc::Receiver<ClientFrame>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl PushTransport {
    /// Creates the transport and spawns its background task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(config: PushConfig) -> PushHandle {
        let (outgoing_tx, outgoing_rx) = mpsc::channel::<ClientFrame>(32);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));
        let subscribers: Subscribers = Arc::new(RwLock::new(HashMap::new()));
        let subscriber_buffer = config.subscriber_buffer;

        let transport = PushTransport {
            config,
            state: state.clone(),
            subscribers: subscribers.clone(),
            outgoing_rx,
            shutdown_rx,
        };

        tokio::spawn(transport.run());

        PushHandle {
            outgoing_tx,
            subscribers,
            state,
            shutdown_tx,
            subscriber_buffer,
        }
    }

    /// Main transport loop.
    async fn run(mut self) {
        info!(url = %self.config.url, "Push transport starting");

        let mut backoff = self.create_backoff();
        let mut attempt = 0u32;

        loop {
            if self.shutdown_rx.try_recv().is_ok() {
                info!("Push transport received shutdown signal");
                break;
            }

            *self.state.write().await = ConnectionState::Connecting;

            match self.connect_with_timeout().await {
                Ok(ws_stream) => {
                    info!("Push socket connected");
                    *self.state.write().await = ConnectionState::Connected;

                    backoff.reset();
                    attempt = 0;

                    match self.connection_loop(ws_stream).await {
                        Ok(true) => break,
                        Ok(false) => info!("Push socket closed by peer"),
                        Err(e) => warn!(error = %e, "Push connection lost"),
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to connect push socket");
                }
            }

            *self.state.write().await = ConnectionState::Backoff;
            attempt += 1;

            let Some(duration) = backoff.next_backoff() else {
                error!("Backoff exhausted");
                break;
            };

            debug!(?duration, attempt, "Waiting before reconnect");

            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    *self.state.write().await = ConnectionState::Reconnecting;
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown during backoff");
                    break;
                }
            }
        }

        *self.state.write().await = ConnectionState::Disconnected;
        info!("Push transport stopped");
    }

    /// Connects with timeout.
    async fn connect_with_timeout(&self) -> SyncResult<WebSocketStream<MaybeTlsStream<TcpStream>>> {
        let url = self.handshake_url()?;

        match timeout(self.config.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((ws_stream, response))) => {
                debug!(status = ?response.status(), "WebSocket handshake complete");
                Ok(ws_stream)
            }
            Ok(Err(e)) => Err(SyncError::from(e)),
            Err(_) => Err(SyncError::Timeout(self.config.connect_timeout.as_secs())),
        }
    }

    fn handshake_url(&self) -> SyncResult<url::Url> {
        let mut url = url::Url::parse(&self.config.url)?;
        if let Some(key) = &self.config.api_key {
            url.query_pairs_mut().append_pair("api_key", key);
        }
        Ok(url)
    }

    /// Runs one live connection. Returns `Ok(true)` on shutdown, `Ok(false)`
    /// when the peer closed the socket.
    async fn connection_loop(
        &mut self,
        ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    ) -> SyncResult<bool> {
        let (mut write, mut read) = ws_stream.split();

        // Re-establish every subscription on the fresh socket.
        let topics: Vec<String> = self.subscribers.read().await.keys().cloned().collect();
        for topic in topics {
            let json = ClientFrame::subscribe(topic.as_str()).to_json()?;
            write.send(WsMessage::Text(json.into())).await?;
            debug!(topic = %topic, "Sent subscribe frame");
        }

        let mut ping_interval = tokio::time::interval(self.config.ping_interval);
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(frame) = self.outgoing_rx.recv() => {
                    let json = frame.to_json()?;
                    write.send(WsMessage::Text(json.into())).await?;
                }

                Some(result) = read.next() => {
                    match result {
                        Ok(WsMessage::Text(text)) => self.route(text.as_str()).await,
                        Ok(WsMessage::Ping(data)) => {
                            write.send(WsMessage::Pong(data)).await?;
                        }
                        Ok(WsMessage::Pong(_)) => {
                            debug!("Received pong");
                        }
                        Ok(WsMessage::Close(frame)) => {
                            info!(?frame, "Received close frame");
                            return Ok(false);
                        }
                        Ok(WsMessage::Binary(_)) => {
                            warn!("Received unexpected binary message");
                        }
                        Ok(WsMessage::Frame(_)) => {}
                        Err(e) => {
                            return Err(SyncError::from(e));
                        }
                    }
                }

                _ = ping_interval.tick() => {
                    write.send(WsMessage::Ping(Vec::new().into())).await?;
                    debug!("Sent ping");
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, closing push socket");
                    let _ = write.send(WsMessage::Close(None)).await;
                    return Ok(true);
                }
            }
        }
    }

    /// Delivers an envelope to the live subscribers of its topic.
    async fn route(&self, text: &str) {
        let envelope = match PushEnvelope::from_json(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Failed to parse push envelope");
                return;
            }
        };

        let mut subscribers = self.subscribers.write().await;
        let Some(senders) = subscribers.get_mut(&envelope.topic) else {
            debug!(topic = %envelope.topic, "No subscriber for topic");
            return;
        };

        senders.retain(|tx| !tx.is_closed());
        for tx in senders.iter() {
            if tx.send(envelope.payload.clone()).await.is_err() {
                debug!(topic = %envelope.topic, "Subscriber dropped during delivery");
            }
        }
    }

    /// Creates the exponential backoff configuration.
    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.config.initial_backoff,
            max_interval: self.config.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}
