//! Swarm Session
//!
//! Owns the single duplex WebSocket to the sportsbook feed. All frame I/O
//! and the request-correlation map live inside the session task; callers
//! interact through a command channel and await oneshot replies, so the map
//! has exactly one mutator.
//!
//! # Lifecycle
//!
//! The session task connects, performs the `request_session` handshake
//! within the connect deadline, then serves correlated requests and routes
//! delta frames into the subscription registry until the connection dies.
//! On death every pending reply fails with `UpstreamGone`, the registry is
//! cleared (new sessions issue new subscription ids), and groups learn about
//! the transition through the session event channel so they can re-subscribe
//! once `Connected` fires again.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, SwarmCodec, SwarmFrame};
use super::messages::{self, CommandFrame};
use super::reconnect::Backoff;
use super::ring::RollingWindow;
use crate::infrastructure::config::{SwarmSettings, TimeoutSettings, WebSocketSettings};
use crate::infrastructure::registry::{SubscriptionRegistry, SubscriptionUpdate};

/// How often the session task sweeps pending requests for expiry.
const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Command channel depth; requests queue here while a reconnect is in
/// flight.
const COMMAND_BUFFER: usize = 64;

// =============================================================================
// Errors & Events
// =============================================================================

/// Errors surfaced by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Connect attempt or handshake exceeded the deadline.
    #[error("upstream connect failed: {0}")]
    ConnectFailed(String),

    /// The handshake was answered with a rejection.
    #[error("session handshake rejected: {0}")]
    HandshakeRejected(String),

    /// A correlated request exceeded its deadline.
    #[error("upstream request timed out")]
    RequestTimeout,

    /// The server answered a request with a non-zero status code.
    #[error("upstream rejected request with code {0}")]
    RequestRejected(i64),

    /// The connection closed before the reply arrived.
    #[error("upstream connection gone")]
    UpstreamGone,

    /// A subscribe reply carried no subscription id.
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Frame could not be encoded.
    #[error("frame encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Frame could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Connection transitions broadcast to interested groups.
#[derive(Debug, Clone, Copy)]
pub enum SessionEvent {
    /// Session handshake completed; subscriptions can be (re)established.
    Connected,
    /// Connection lost; all subscription ids are now invalid.
    Disconnected,
    /// A reconnect attempt is being made.
    Reconnecting {
        /// Reconnection attempt number.
        attempt: u32,
    },
}

/// Snapshot of session health counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionHealth {
    /// Whether the session is currently connected and handshaken.
    pub connected: bool,
    /// Total inbound frames observed.
    pub total_messages: u64,
    /// Inbound frames that failed to decode.
    pub parse_errors: u64,
    /// Frames observed in the last 60 seconds (ring-bounded).
    pub messages_last_minute: usize,
}

// =============================================================================
// Session Commands
// =============================================================================

enum SessionCommand {
    Request {
        command: String,
        params: Value,
        timeout: Duration,
        reply: oneshot::Sender<Result<Value, SessionError>>,
    },
}

struct PendingReply {
    reply: oneshot::Sender<Result<Value, SessionError>>,
    deadline: Instant,
}

// =============================================================================
// Session
// =============================================================================

/// The process-wide upstream session.
pub struct SwarmSession {
    swarm: SwarmSettings,
    timeouts: TimeoutSettings,
    websocket: WebSocketSettings,
    registry: Arc<SubscriptionRegistry>,
    codec: SwarmCodec,
    cmd_tx: mpsc::Sender<SessionCommand>,
    cmd_rx: parking_lot::Mutex<Option<mpsc::Receiver<SessionCommand>>>,
    events_tx: broadcast::Sender<SessionEvent>,
    connected: AtomicBool,
    session_token: parking_lot::RwLock<Option<String>>,
    total_messages: AtomicU64,
    parse_errors: AtomicU64,
    window: RollingWindow,
    cancel: CancellationToken,
}

impl SwarmSession {
    /// Create a session. `run` must be spawned for it to make progress.
    #[must_use]
    pub fn new(
        swarm: SwarmSettings,
        websocket: WebSocketSettings,
        timeouts: TimeoutSettings,
        registry: Arc<SubscriptionRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, _) = broadcast::channel(32);
        Self {
            swarm,
            timeouts,
            websocket,
            registry,
            codec: SwarmCodec::new(),
            cmd_tx,
            cmd_rx: parking_lot::Mutex::new(Some(cmd_rx)),
            events_tx,
            connected: AtomicBool::new(false),
            session_token: parking_lot::RwLock::new(None),
            total_messages: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            window: RollingWindow::default(),
            cancel,
        }
    }

    /// Subscribe to connection transitions.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Whether the session is connected and handshaken.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// The current session token, when a handshake is live.
    #[must_use]
    pub fn session_token(&self) -> Option<String> {
        self.session_token.read().clone()
    }

    /// Health counter snapshot.
    #[must_use]
    pub fn health(&self) -> SessionHealth {
        SessionHealth {
            connected: self.is_connected(),
            total_messages: self.total_messages.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            messages_last_minute: self.window.count(),
        }
    }

    /// Wait until the session is connected.
    ///
    /// Idempotent: an already-connected session returns immediately.
    ///
    /// # Errors
    ///
    /// `ConnectFailed` if no connection is established within the connect
    /// deadline, `UpstreamGone` if the session task has stopped.
    pub async fn ensure(&self) -> Result<(), SessionError> {
        if self.is_connected() {
            return Ok(());
        }

        let mut events = self.events_tx.subscribe();
        // Re-check after subscribing so a transition between the check and
        // the subscribe is not missed.
        if self.is_connected() {
            return Ok(());
        }

        let wait = async {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::Connected) => return Ok(()),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if self.is_connected() {
                            return Ok(());
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(SessionError::UpstreamGone);
                    }
                }
            }
        };

        match tokio::time::timeout(self.timeouts.connect, wait).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::ConnectFailed(
                "no upstream connection within deadline".to_string(),
            )),
        }
    }

    /// Issue a correlated request and await its reply.
    ///
    /// # Errors
    ///
    /// `RequestTimeout` when the deadline passes, `RequestRejected` on a
    /// non-zero reply code, `UpstreamGone` if the connection (or session
    /// task) dies first.
    pub async fn request(
        &self,
        command: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::Request {
                command: command.to_string(),
                params,
                timeout,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SessionError::UpstreamGone)?;

        // The session task enforces the deadline once it has the request;
        // this outer timeout also bounds the time a command can sit queued
        // while a (re)connect is in flight.
        match tokio::time::timeout(timeout + EXPIRY_SWEEP_INTERVAL, reply_rx).await {
            Ok(reply) => reply.map_err(|_| SessionError::UpstreamGone)?,
            Err(_) => Err(SessionError::RequestTimeout),
        }
    }

    /// `request` with the default deadline.
    ///
    /// # Errors
    ///
    /// See [`SwarmSession::request`].
    pub async fn request_default(&self, command: &str, params: Value) -> Result<Value, SessionError> {
        self.request(command, params, self.timeouts.request).await
    }

    /// `request` with the short snapshot deadline.
    ///
    /// # Errors
    ///
    /// See [`SwarmSession::request`].
    pub async fn request_snapshot(
        &self,
        command: &str,
        params: Value,
    ) -> Result<Value, SessionError> {
        self.request(command, params, self.timeouts.snapshot).await
    }

    /// Establish a standing subscription.
    ///
    /// Registers the returned subscription id with the registry so deltas
    /// flow into `updates`, and returns the id together with the initial
    /// document.
    ///
    /// # Errors
    ///
    /// `SubscribeFailed` when the reply carries no subscription id, plus the
    /// [`SwarmSession::request`] errors.
    pub async fn subscribe(
        &self,
        params: Value,
        updates: mpsc::UnboundedSender<SubscriptionUpdate>,
    ) -> Result<(String, Value), SessionError> {
        let reply = self.request_default("get", params).await?;

        let sub_id = match reply.get("subid") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(SessionError::SubscribeFailed(
                    "reply carried no subscription id".to_string(),
                ));
            }
        };

        let initial = reply.get("data").cloned().unwrap_or(Value::Null);
        self.registry.register(&sub_id, initial.clone(), updates);
        Ok((sub_id, initial))
    }

    /// Cancel a subscription and drop its registry entry.
    ///
    /// Best-effort: failures only matter when the connection is already
    /// gone, in which case the id is invalid anyway.
    pub async fn unsubscribe(&self, sub_id: &str) {
        self.registry.remove(sub_id);
        if let Err(e) = self
            .request(
                "unsubscribe",
                messages::unsubscribe_params(sub_id),
                self.timeouts.snapshot,
            )
            .await
        {
            tracing::debug!(sub_id, error = %e, "unsubscribe request failed");
        }
    }

    // =========================================================================
    // Session Task
    // =========================================================================

    /// Run the session connection loop until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error only when the reconnect policy gives up.
    ///
    /// # Panics
    ///
    /// Panics if called twice; the command receiver is single-consumer.
    pub async fn run(self: Arc<Self>) -> Result<(), SessionError> {
        let mut cmd_rx = self
            .cmd_rx
            .lock()
            .take()
            .expect("SwarmSession::run called twice");

        let mut reconnect = Backoff::from_settings(&self.websocket);

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("swarm session cancelled");
                return Ok(());
            }

            match self.connect_and_run(&mut cmd_rx, &mut reconnect).await {
                Ok(()) => {
                    tracing::info!("swarm session closed gracefully");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "swarm connection error");

                    let Some(delay) = reconnect.next_delay() else {
                        return Err(SessionError::ConnectFailed(
                            "maximum reconnection attempts exceeded".to_string(),
                        ));
                    };
                    let attempt = reconnect.attempts();
                    tracing::info!(attempt, delay_ms = delay.as_millis(), "reconnecting to swarm");
                    let _ = self.events_tx.send(SessionEvent::Reconnecting { attempt });

                    // Requests issued while disconnected fail fast instead of
                    // silently waiting out the backoff.
                    let sleep = tokio::time::sleep(delay);
                    tokio::pin!(sleep);
                    loop {
                        tokio::select! {
                            () = self.cancel.cancelled() => return Ok(()),
                            () = &mut sleep => break,
                            Some(cmd) = cmd_rx.recv() => {
                                let SessionCommand::Request { reply, .. } = cmd;
                                let _ = reply.send(Err(SessionError::UpstreamGone));
                            }
                        }
                    }
                }
            }
        }
    }

    async fn connect_and_run(
        &self,
        cmd_rx: &mut mpsc::Receiver<SessionCommand>,
        reconnect: &mut Backoff,
    ) -> Result<(), SessionError> {
        tracing::info!(url = %self.swarm.url, "connecting to swarm feed");

        let connect = tokio_tungstenite::connect_async(self.swarm.url.as_str());
        let (ws_stream, _response) = tokio::time::timeout(self.timeouts.connect, connect)
            .await
            .map_err(|_| SessionError::ConnectFailed("connect timed out".to_string()))??;

        let (mut write, mut read) = ws_stream.split();

        // Handshake: correlation id 1 is always the session request.
        let handshake = CommandFrame::new(
            "request_session",
            messages::session_params(self.swarm.site_id, &self.swarm.language),
            1,
        );
        write.send(Message::Text(handshake.to_json()?.into())).await?;

        let token = self.await_handshake(&mut write, &mut read).await?;
        tracing::info!("swarm session established");
        *self.session_token.write() = Some(token);
        self.connected.store(true, Ordering::Relaxed);
        crate::infrastructure::metrics::set_upstream_connected("swarm", true);
        reconnect.reset();
        let _ = self.events_tx.send(SessionEvent::Connected);

        let mut pending: HashMap<u64, PendingReply> = HashMap::new();
        let result = self
            .serve(&mut write, &mut read, cmd_rx, &mut pending)
            .await;

        // Invalidation runs on every exit path, clean or not.
        for (_, entry) in pending.drain() {
            let _ = entry.reply.send(Err(SessionError::UpstreamGone));
        }
        self.connected.store(false, Ordering::Relaxed);
        crate::infrastructure::metrics::set_upstream_connected("swarm", false);
        *self.session_token.write() = None;
        self.registry.clear();
        let _ = self.events_tx.send(SessionEvent::Disconnected);

        result
    }

    async fn await_handshake<W, R>(&self, write: &mut W, read: &mut R) -> Result<String, SessionError>
    where
        W: SinkExt<Message> + Unpin,
        W::Error: Into<tokio_tungstenite::tungstenite::Error>,
        R: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        let deadline = Instant::now() + self.timeouts.connect;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SessionError::ConnectFailed("handshake timed out".to_string()));
            }

            let msg = match tokio::time::timeout(remaining, read.next()).await {
                Err(_) => {
                    return Err(SessionError::ConnectFailed("handshake timed out".to_string()));
                }
                Ok(None) => return Err(SessionError::UpstreamGone),
                Ok(Some(msg)) => msg?,
            };

            match msg {
                Message::Text(text) => {
                    self.record_inbound();
                    match self.codec.decode(&text) {
                        Ok(SwarmFrame::Reply { rid: 1, code, data }) => {
                            if code != 0 {
                                return Err(SessionError::HandshakeRejected(format!(
                                    "code {code}"
                                )));
                            }
                            return extract_session_id(&data);
                        }
                        Ok(_) => {}
                        Err(_) => self.record_parse_error(),
                    }
                }
                Message::Ping(payload) => {
                    write
                        .send(Message::Pong(payload))
                        .await
                        .map_err(|e| SessionError::WebSocket(e.into()))?;
                }
                Message::Close(_) => return Err(SessionError::UpstreamGone),
                _ => {}
            }
        }
    }

    async fn serve<W, R>(
        &self,
        write: &mut W,
        read: &mut R,
        cmd_rx: &mut mpsc::Receiver<SessionCommand>,
        pending: &mut HashMap<u64, PendingReply>,
    ) -> Result<(), SessionError>
    where
        W: SinkExt<Message> + Unpin,
        W::Error: Into<tokio_tungstenite::tungstenite::Error>,
        R: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        // rid 1 was the handshake.
        let mut next_rid: u64 = 2;

        let mut expiry = tokio::time::interval(EXPIRY_SWEEP_INTERVAL);
        expiry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut ping = tokio::time::interval(self.websocket.heartbeat_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),

                Some(cmd) = cmd_rx.recv() => {
                    let SessionCommand::Request { command, params, timeout, reply } = cmd;
                    let rid = next_rid;
                    next_rid += 1;

                    let frame = CommandFrame::new(command, params, rid);
                    let json = frame.to_json()?;
                    pending.insert(rid, PendingReply {
                        reply,
                        deadline: Instant::now() + timeout,
                    });

                    if let Err(e) = write.send(Message::Text(json.into())).await {
                        if let Some(entry) = pending.remove(&rid) {
                            let _ = entry.reply.send(Err(SessionError::UpstreamGone));
                        }
                        return Err(SessionError::WebSocket(e.into()));
                    }
                }

                _ = expiry.tick() => {
                    let now = Instant::now();
                    let expired: Vec<u64> = pending
                        .iter()
                        .filter(|(_, p)| p.deadline <= now)
                        .map(|(rid, _)| *rid)
                        .collect();
                    for rid in expired {
                        if let Some(entry) = pending.remove(&rid) {
                            tracing::debug!(rid, "upstream request timed out");
                            let _ = entry.reply.send(Err(SessionError::RequestTimeout));
                        }
                    }
                }

                _ = ping.tick() => {
                    write
                        .send(Message::Ping(Vec::new().into()))
                        .await
                        .map_err(|e| SessionError::WebSocket(e.into()))?;
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_text(&text, pending),
                        Some(Ok(Message::Ping(payload))) => {
                            write
                                .send(Message::Pong(payload))
                                .await
                                .map_err(|e| SessionError::WebSocket(e.into()))?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("swarm sent close frame");
                            return Err(SessionError::UpstreamGone);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("swarm stream ended");
                            return Err(SessionError::UpstreamGone);
                        }
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str, pending: &mut HashMap<u64, PendingReply>) {
        self.record_inbound();

        let frame = match self.codec.decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                self.record_parse_error();
                tracing::debug!(error = %e, "undecodable swarm frame");
                return;
            }
        };

        match frame {
            SwarmFrame::Reply { rid, code, data } => {
                let Some(entry) = pending.remove(&rid) else {
                    tracing::debug!(rid, "reply for unknown or expired request");
                    return;
                };
                let result = if code == 0 {
                    Ok(data)
                } else {
                    Err(SessionError::RequestRejected(code))
                };
                let _ = entry.reply.send(result);
            }
            SwarmFrame::Delta { updates } => {
                for (sub_id, delta) in &updates {
                    if !self.registry.apply(sub_id, delta) {
                        tracing::trace!(sub_id, "delta for unknown subscription");
                    }
                }
            }
        }
    }

    fn record_inbound(&self) {
        self.total_messages.fetch_add(1, Ordering::Relaxed);
        self.window.record();
        crate::infrastructure::metrics::record_upstream_frame("swarm");
    }

    fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
        crate::infrastructure::metrics::record_upstream_parse_error("swarm");
    }
}

/// Pull the session id out of a handshake reply, tolerating one extra
/// nesting level.
fn extract_session_id(data: &Value) -> Result<String, SessionError> {
    let sid = data
        .get("sid")
        .or_else(|| data.get("data").and_then(|d| d.get("sid")))
        .and_then(Value::as_str)
        .unwrap_or("");
    if sid.is_empty() {
        return Err(SessionError::HandshakeRejected(
            "empty session id".to_string(),
        ));
    }
    Ok(sid.to_string())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::infrastructure::config::{SwarmSettings, TimeoutSettings, WebSocketSettings};

    fn make_session() -> Arc<SwarmSession> {
        Arc::new(SwarmSession::new(
            SwarmSettings::default(),
            WebSocketSettings::default(),
            TimeoutSettings {
                connect: Duration::from_millis(50),
                ..TimeoutSettings::default()
            },
            Arc::new(SubscriptionRegistry::new()),
            CancellationToken::new(),
        ))
    }

    #[test]
    fn extract_session_id_direct() {
        assert_eq!(extract_session_id(&json!({"sid": "abc"})).unwrap(), "abc");
    }

    #[test]
    fn extract_session_id_nested() {
        assert_eq!(
            extract_session_id(&json!({"data": {"sid": "xyz"}})).unwrap(),
            "xyz"
        );
    }

    #[test]
    fn extract_session_id_rejects_empty() {
        assert!(matches!(
            extract_session_id(&json!({"sid": ""})),
            Err(SessionError::HandshakeRejected(_))
        ));
        assert!(matches!(
            extract_session_id(&json!({})),
            Err(SessionError::HandshakeRejected(_))
        ));
    }

    #[tokio::test]
    async fn ensure_times_out_without_connection() {
        let session = make_session();
        let result = session.ensure().await;
        assert!(matches!(result, Err(SessionError::ConnectFailed(_))));
    }

    #[tokio::test]
    async fn handle_text_routes_reply_to_pending() {
        let session = make_session();
        let (tx, rx) = oneshot::channel();
        let mut pending = HashMap::new();
        pending.insert(
            7,
            PendingReply { reply: tx, deadline: Instant::now() + Duration::from_secs(1) },
        );

        session.handle_text(r#"{"rid":"7","code":0,"data":{"ok":true}}"#, &mut pending);

        assert!(pending.is_empty());
        let reply = rx.await.unwrap().unwrap();
        assert_eq!(reply["ok"], json!(true));
    }

    #[tokio::test]
    async fn handle_text_rejected_code_surfaces_error() {
        let session = make_session();
        let (tx, rx) = oneshot::channel();
        let mut pending = HashMap::new();
        pending.insert(
            3,
            PendingReply { reply: tx, deadline: Instant::now() + Duration::from_secs(1) },
        );

        session.handle_text(r#"{"rid":3,"code":21,"data":null}"#, &mut pending);

        assert!(matches!(
            rx.await.unwrap(),
            Err(SessionError::RequestRejected(21))
        ));
    }

    #[tokio::test]
    async fn handle_text_counts_parse_errors() {
        let session = make_session();
        let mut pending = HashMap::new();
        session.handle_text("{broken", &mut pending);
        session.handle_text("[1,2]", &mut pending);

        let health = session.health();
        assert_eq!(health.total_messages, 2);
        assert_eq!(health.parse_errors, 2);
    }

    #[tokio::test]
    async fn delta_routes_into_registry() {
        let session = make_session();
        let (tx, mut rx) = mpsc::unbounded_channel();
        session
            .registry
            .register("sub-9", json!({"game": {}}), tx);

        let mut pending = HashMap::new();
        session.handle_text(
            r#"{"rid":"0","data":{"sub-9":{"game":{"1":{"id":1}}}}}"#,
            &mut pending,
        );

        let update = rx.try_recv().unwrap();
        assert_eq!(update.sub_id, "sub-9");
        assert_eq!(update.state["game"]["1"]["id"], json!(1));
    }

    #[tokio::test]
    async fn health_reports_rolling_count() {
        let session = make_session();
        let mut pending = HashMap::new();
        for _ in 0..4 {
            session.handle_text(r#"{"rid":"0","data":{}}"#, &mut pending);
        }
        let health = session.health();
        assert_eq!(health.messages_last_minute, 4);
        assert!(!health.connected);
    }
}
