//! Live-Tracker Proxy
//!
//! Per-game bridge to the animation feed. Each game with at least one
//! subscriber gets one instance that owns its own WebSocket, forwards every
//! inbound frame unchanged as an unnamed SSE event, and batch-reports
//! throughput to the metrics aggregator. The instance disconnects when its
//! heartbeat tick observes an empty subscriber set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::broadcast::{ClientSet, SseClient, SseFrame};
use crate::infrastructure::config::{TrackerSettings, WebSocketSettings};
use crate::infrastructure::metrics;
use crate::infrastructure::stats::{MetricsAggregator, TrackerReport};
use crate::infrastructure::swarm::reconnect::Backoff;

/// Batch report cadence.
const REPORT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

/// Heartbeat (and idle-check) cadence.
const HEARTBEAT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15);

/// Message count that forces an early batch report.
const REPORT_MESSAGE_THRESHOLD: u64 = 50;

/// Parse-error count that forces an early batch report.
const REPORT_PARSE_ERROR_THRESHOLD: u64 = 5;

/// Connect deadline for the tracker feed.
const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);

/// Tracker transport errors.
#[derive(Debug, thiserror::Error)]
enum TrackerError {
    #[error("tracker connect failed: {0}")]
    ConnectFailed(String),

    #[error("tracker WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("tracker connection closed")]
    ConnectionClosed,
}

/// Why a tracker connection loop ended.
enum EndReason {
    /// Hub shutdown or instance teardown.
    Cancelled,
    /// The heartbeat tick saw no subscribers left.
    Idle,
}

/// Aggregate counters for the health surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TrackerEdgeStats {
    /// Live tracker instances.
    pub instances: usize,
    /// Subscribers across all instances.
    pub subscribers: usize,
}

// =============================================================================
// Manager
// =============================================================================

/// Registry of per-game tracker instances.
pub struct TrackerManager {
    settings: TrackerSettings,
    websocket: WebSocketSettings,
    aggregator: Arc<MetricsAggregator>,
    client_buffer: usize,
    instances: RwLock<HashMap<i64, Arc<TrackerInstance>>>,
    cancel: CancellationToken,
}

impl TrackerManager {
    /// Create the manager.
    #[must_use]
    pub fn new(
        settings: TrackerSettings,
        websocket: WebSocketSettings,
        aggregator: Arc<MetricsAggregator>,
        client_buffer: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            settings,
            websocket,
            aggregator,
            client_buffer,
            instances: RwLock::new(HashMap::new()),
            cancel,
        }
    }

    /// Per-subscriber frame buffer size (shared with the SSE edge).
    #[must_use]
    pub const fn client_buffer(&self) -> usize {
        self.client_buffer
    }

    /// Attach a subscriber to a game's tracker, connecting on first use.
    pub fn attach(self: &Arc<Self>, game_id: i64, client: SseClient) {
        let instance = {
            let mut instances = self.instances.write();
            match instances.get(&game_id) {
                Some(existing) if !existing.cancel.is_cancelled() => Arc::clone(existing),
                _ => {
                    let instance = TrackerInstance::spawn(
                        game_id,
                        self.settings.clone(),
                        self.websocket.clone(),
                        Arc::clone(&self.aggregator),
                        Arc::downgrade(self),
                        self.cancel.child_token(),
                    );
                    instances.insert(game_id, Arc::clone(&instance));
                    instance
                }
            }
        };
        instance.attach_client(client);
    }

    /// Current edge stats for health reporting.
    #[must_use]
    pub fn stats(&self) -> TrackerEdgeStats {
        let instances = self.instances.read();
        TrackerEdgeStats {
            instances: instances.len(),
            subscribers: instances.values().map(|i| i.clients.len()).sum(),
        }
    }

    fn remove_instance(&self, game_id: i64, instance: &Arc<TrackerInstance>) {
        let mut instances = self.instances.write();
        if let Some(current) = instances.get(&game_id)
            && Arc::ptr_eq(current, instance)
        {
            instances.remove(&game_id);
        }
    }
}

// =============================================================================
// Instance
// =============================================================================

#[derive(Default)]
struct ReportBatch {
    messages: u64,
    parse_errors: u64,
}

/// One game's tracker bridge.
pub struct TrackerInstance {
    game_id: i64,
    settings: TrackerSettings,
    websocket: WebSocketSettings,
    aggregator: Arc<MetricsAggregator>,
    manager: Weak<TrackerManager>,
    clients: ClientSet,
    connected: AtomicBool,
    batch: Mutex<ReportBatch>,
    cancel: CancellationToken,
}

impl TrackerInstance {
    fn spawn(
        game_id: i64,
        settings: TrackerSettings,
        websocket: WebSocketSettings,
        aggregator: Arc<MetricsAggregator>,
        manager: Weak<TrackerManager>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let instance = Arc::new(Self {
            game_id,
            settings,
            websocket,
            aggregator,
            manager,
            clients: ClientSet::new(),
            connected: AtomicBool::new(false),
            batch: Mutex::new(ReportBatch::default()),
            cancel,
        });
        tokio::spawn(Arc::clone(&instance).run());
        instance
    }

    fn attach_client(&self, client: SseClient) {
        let _ = client.send(SseFrame::padding());
        if self.connected.load(Ordering::Relaxed) {
            let _ = client.send(self.ready_frame());
        }
        self.clients.insert(client);
    }

    fn ready_frame(&self) -> SseFrame {
        SseFrame::named("ready", &json!({"gameId": self.game_id}))
            .unwrap_or_else(|_| SseFrame::comment("ready"))
    }

    fn end_frame(&self) -> SseFrame {
        SseFrame::named("end", &json!({"gameId": self.game_id}))
            .unwrap_or_else(|_| SseFrame::comment("end"))
    }

    async fn run(self: Arc<Self>) {
        let mut reconnect = Backoff::from_settings(&self.websocket);

        loop {
            match self.connect_and_forward(&mut reconnect).await {
                Ok(EndReason::Cancelled) => {
                    self.clients.broadcast(&self.end_frame());
                    break;
                }
                Ok(EndReason::Idle) => {
                    tracing::info!(game_id = self.game_id, "tracker idle, disconnecting");
                    break;
                }
                Err(e) => {
                    tracing::warn!(game_id = self.game_id, error = %e, "tracker connection error");
                    self.clients.broadcast(&self.end_frame());
                    self.flush_batch();

                    if self.clients.is_empty() {
                        break;
                    }
                    let Some(delay) = reconnect.next_delay() else {
                        self.clients
                            .broadcast(&SseFrame::error("tracker feed unavailable"));
                        break;
                    };
                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.connected.store(false, Ordering::Relaxed);
        self.flush_batch();
        self.aggregator.release_lease(self.game_id);
        if let Some(manager) = self.manager.upgrade() {
            manager.remove_instance(self.game_id, &self);
        }
        tracing::debug!(game_id = self.game_id, "tracker instance stopped");
    }

    async fn connect_and_forward(
        &self,
        reconnect: &mut Backoff,
    ) -> Result<EndReason, TrackerError> {
        tracing::info!(game_id = self.game_id, url = %self.settings.url, "connecting tracker feed");

        let connect = tokio_tungstenite::connect_async(self.settings.url.as_str());
        let (ws_stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| TrackerError::ConnectFailed("connect timed out".to_string()))??;
        let (mut write, mut read) = ws_stream.split();

        let subscribe = json!({
            "command": "subscribe",
            "params": {
                "gameId": self.game_id,
                "feed_type": "live",
                "snapshot": true,
                "partner_id": self.settings.partner_id,
                "site_ref": self.settings.site_ref,
            },
        });
        write.send(Message::Text(subscribe.to_string().into())).await?;

        self.connected.store(true, Ordering::Relaxed);
        reconnect.reset();
        self.clients.broadcast(&self.ready_frame());
        self.flush_batch();

        let mut report = tokio::time::interval(REPORT_INTERVAL);
        report.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let result = loop {
            tokio::select! {
                () = self.cancel.cancelled() => break Ok(EndReason::Cancelled),

                _ = report.tick() => self.flush_batch(),

                _ = heartbeat.tick() => {
                    self.clients.broadcast(&SseFrame::comment("hb"));
                    let _ = self.clients.sweep();
                    if self.clients.is_empty() {
                        break Ok(EndReason::Idle);
                    }
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.forward(&text),
                        Some(Ok(Message::Ping(payload))) => {
                            if let Err(e) = write.send(Message::Pong(payload)).await {
                                break Err(e.into());
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break Err(TrackerError::ConnectionClosed),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break Err(e.into()),
                    }
                }
            }
        };

        self.connected.store(false, Ordering::Relaxed);
        result
    }

    /// Forward one inbound frame unchanged as an unnamed event.
    fn forward(&self, text: &str) {
        metrics::record_upstream_frame("tracker");

        let force_flush = {
            let mut batch = self.batch.lock();
            batch.messages += 1;
            if serde_json::from_str::<serde_json::Value>(text).is_err() {
                batch.parse_errors += 1;
                metrics::record_upstream_parse_error("tracker");
            }
            batch.messages >= REPORT_MESSAGE_THRESHOLD
                || batch.parse_errors >= REPORT_PARSE_ERROR_THRESHOLD
        };

        self.clients.broadcast(&SseFrame::unnamed_raw(text));

        if force_flush {
            self.flush_batch();
        }
    }

    /// Report and reset the current batch; also renews this game's lease.
    fn flush_batch(&self) {
        let batch = {
            let mut guard = self.batch.lock();
            std::mem::take(&mut *guard)
        };
        self.aggregator.record_report(&TrackerReport {
            game_id: self.game_id,
            messages: batch.messages,
            parse_errors: batch.parse_errors,
            sse_clients: self.clients.len(),
            upstream_connected: self.connected.load(Ordering::Relaxed),
        });
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::FileStore;

    async fn manager() -> (Arc<TrackerManager>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FileStore::open(dir.path()).await.unwrap());
        let aggregator = Arc::new(MetricsAggregator::new(storage));
        let manager = Arc::new(TrackerManager::new(
            TrackerSettings {
                // Unroutable: connection attempts fail fast in tests.
                url: "ws://127.0.0.1:1/".to_string(),
                ..TrackerSettings::default()
            },
            WebSocketSettings::default(),
            aggregator,
            32,
            CancellationToken::new(),
        ));
        (manager, dir)
    }

    #[tokio::test]
    async fn attach_creates_instance_and_sends_padding() {
        let (manager, _dir) = manager().await;
        let (client, mut rx) = SseClient::channel(32);

        manager.attach(42, client);

        assert_eq!(manager.stats().instances, 1);
        assert_eq!(manager.stats().subscribers, 1);

        // First frame is always the anti-buffering padding.
        let frame = rx.recv().await.unwrap();
        assert!(matches!(frame, SseFrame::Comment(_)));
    }

    #[tokio::test]
    async fn second_attach_reuses_instance() {
        let (manager, _dir) = manager().await;
        let (c1, _rx1) = SseClient::channel(32);
        let (c2, _rx2) = SseClient::channel(32);

        manager.attach(42, c1);
        manager.attach(42, c2);

        assert_eq!(manager.stats().instances, 1);
        assert_eq!(manager.stats().subscribers, 2);
    }

    #[tokio::test]
    async fn distinct_games_get_distinct_instances() {
        let (manager, _dir) = manager().await;
        let (c1, _rx1) = SseClient::channel(32);
        let (c2, _rx2) = SseClient::channel(32);

        manager.attach(1, c1);
        manager.attach(2, c2);

        assert_eq!(manager.stats().instances, 2);
    }
}
