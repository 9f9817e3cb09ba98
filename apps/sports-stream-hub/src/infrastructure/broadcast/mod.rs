//! SSE Broadcast Primitives
//!
//! Frame model and per-subscriber sinks for the fan-out groups. Each
//! subscriber owns a bounded frame channel; the HTTP edge drains the
//! receiving half into the response body. Writes never await: a full or
//! closed channel marks the subscriber dead and it is removed before any
//! further frame is attempted, so one stalled consumer cannot hold back the
//! rest of its group.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Size of the anti-buffering padding comment sent on attach. Large enough
/// to push intermediary proxies past their initial buffer.
const PADDING_BYTES: usize = 2048;

// =============================================================================
// Frames
// =============================================================================

/// One server-sent-events frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// Named event: `event: <name>\ndata: <json>\n\n`.
    Named {
        /// Event name.
        event: String,
        /// JSON body.
        data: String,
    },
    /// Unnamed event: `data: <json>\n\n`.
    Unnamed {
        /// JSON body.
        data: String,
    },
    /// Comment frame used for liveness and padding: `: <text>\n\n`.
    Comment(String),
}

impl SseFrame {
    /// Build a named event from a serializable body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body fails to serialize.
    pub fn named<T: Serialize>(event: &str, body: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::Named {
            event: event.to_string(),
            data: serde_json::to_string(body)?,
        })
    }

    /// Build an unnamed event from an already-encoded JSON body.
    #[must_use]
    pub fn unnamed_raw(data: impl Into<String>) -> Self {
        Self::Unnamed { data: data.into() }
    }

    /// Build a comment frame.
    #[must_use]
    pub fn comment(text: impl Into<String>) -> Self {
        Self::Comment(text.into())
    }

    /// The attach-time padding comment that defeats intermediary buffering.
    #[must_use]
    pub fn padding() -> Self {
        Self::Comment(" ".repeat(PADDING_BYTES))
    }

    /// The attach-time readiness marker.
    #[must_use]
    pub fn ready() -> Self {
        Self::Comment("ready".to_string())
    }

    /// An `error` event with the standard `{error: ...}` body.
    #[must_use]
    pub fn error(message: &str) -> Self {
        Self::Named {
            event: "error".to_string(),
            data: serde_json::json!({"error": message}).to_string(),
        }
    }

    /// Encode the frame to its wire bytes.
    #[must_use]
    pub fn to_wire(&self) -> Bytes {
        let text = match self {
            Self::Named { event, data } => format!("event: {event}\ndata: {data}\n\n"),
            Self::Unnamed { data } => format!("data: {data}\n\n"),
            Self::Comment(text) => format!(": {text}\n\n"),
        };
        Bytes::from(text)
    }
}

// =============================================================================
// Clients
// =============================================================================

/// Unique subscriber id.
pub type ClientId = Uuid;

/// One SSE subscriber's sending half.
#[derive(Debug, Clone)]
pub struct SseClient {
    id: ClientId,
    tx: mpsc::Sender<SseFrame>,
}

impl SseClient {
    /// Create a client and the receiver the HTTP edge drains.
    #[must_use]
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<SseFrame>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { id: Uuid::new_v4(), tx }, rx)
    }

    /// The subscriber's id.
    #[must_use]
    pub const fn id(&self) -> ClientId {
        self.id
    }

    /// Queue a frame without waiting.
    ///
    /// # Errors
    ///
    /// Fails when the subscriber is gone or its buffer is full; either way
    /// the subscriber is treated as dead.
    pub fn send(&self, frame: SseFrame) -> Result<(), ClientGone> {
        self.tx.try_send(frame).map_err(|_| ClientGone(self.id))
    }

    /// Whether the receiving half has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Marker error: the subscriber cannot take further frames.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("subscriber {0} gone")]
pub struct ClientGone(pub ClientId);

// =============================================================================
// Client Set
// =============================================================================

/// Result of one broadcast pass.
#[derive(Debug, Default)]
pub struct BroadcastOutcome {
    /// Subscribers that accepted the frame.
    pub delivered: usize,
    /// Subscribers removed because their sink failed.
    pub removed: Vec<ClientId>,
}

/// The subscriber set of one group.
///
/// All mutation happens under one short-lived lock; removal of a failed
/// subscriber happens before the broadcast pass moves on, so a dead sink is
/// never written twice.
#[derive(Debug, Default)]
pub struct ClientSet {
    clients: Mutex<HashMap<ClientId, SseClient>>,
}

impl ClientSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber.
    pub fn insert(&self, client: SseClient) {
        self.clients.lock().insert(client.id(), client);
    }

    /// Remove a subscriber by id.
    pub fn remove(&self, id: ClientId) -> bool {
        self.clients.lock().remove(&id).is_some()
    }

    /// Current subscriber count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    /// Send a frame to every subscriber, removing the ones whose sink fails.
    pub fn broadcast(&self, frame: &SseFrame) -> BroadcastOutcome {
        let mut outcome = BroadcastOutcome::default();
        let mut clients = self.clients.lock();

        let dead: Vec<ClientId> = clients
            .values()
            .filter_map(|client| client.send(frame.clone()).err().map(|ClientGone(id)| id))
            .collect();

        for id in &dead {
            clients.remove(id);
        }
        outcome.delivered = clients.len();
        outcome.removed = dead;
        outcome
    }

    /// Drop subscribers whose receiving half is gone. Returns removed ids.
    pub fn sweep(&self) -> Vec<ClientId> {
        let mut clients = self.clients.lock();
        let dead: Vec<ClientId> = clients
            .values()
            .filter(|c| c.is_closed())
            .map(SseClient::id)
            .collect();
        for id in &dead {
            clients.remove(id);
        }
        dead
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_frame_wire_format() {
        let frame = SseFrame::named("games", &serde_json::json!({"sportId": 1})).unwrap();
        assert_eq!(frame.to_wire(), Bytes::from("event: games\ndata: {\"sportId\":1}\n\n"));
    }

    #[test]
    fn unnamed_frame_wire_format() {
        let frame = SseFrame::unnamed_raw(r#"{"x":1}"#);
        assert_eq!(frame.to_wire(), Bytes::from("data: {\"x\":1}\n\n"));
    }

    #[test]
    fn comment_frame_wire_format() {
        let frame = SseFrame::comment("hb");
        assert_eq!(frame.to_wire(), Bytes::from(": hb\n\n"));
    }

    #[test]
    fn padding_is_large_enough() {
        assert!(SseFrame::padding().to_wire().len() >= PADDING_BYTES);
    }

    #[test]
    fn error_frame_shape() {
        let frame = SseFrame::error("missing sportId");
        assert_eq!(
            frame,
            SseFrame::Named {
                event: "error".to_string(),
                data: r#"{"error":"missing sportId"}"#.to_string(),
            }
        );
    }

    #[tokio::test]
    async fn broadcast_reaches_all_live_subscribers() {
        let set = ClientSet::new();
        let (c1, mut rx1) = SseClient::channel(8);
        let (c2, mut rx2) = SseClient::channel(8);
        set.insert(c1);
        set.insert(c2);

        let outcome = set.broadcast(&SseFrame::comment("hb"));
        assert_eq!(outcome.delivered, 2);
        assert!(outcome.removed.is_empty());

        assert_eq!(rx1.recv().await.unwrap(), SseFrame::comment("hb"));
        assert_eq!(rx2.recv().await.unwrap(), SseFrame::comment("hb"));
    }

    #[tokio::test]
    async fn dropped_subscriber_removed_on_broadcast() {
        let set = ClientSet::new();
        let (c1, rx1) = SseClient::channel(8);
        let (c2, mut rx2) = SseClient::channel(8);
        let dead_id = c1.id();
        set.insert(c1);
        set.insert(c2);
        drop(rx1);

        let outcome = set.broadcast(&SseFrame::comment("hb"));
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.removed, vec![dead_id]);
        assert_eq!(set.len(), 1);

        // The surviving subscriber still got the frame.
        assert_eq!(rx2.recv().await.unwrap(), SseFrame::comment("hb"));
    }

    #[tokio::test]
    async fn full_buffer_marks_subscriber_dead() {
        let set = ClientSet::new();
        let (blocked, _rx_kept_but_undrained) = SseClient::channel(1);
        let (healthy, mut rx2) = SseClient::channel(8);
        let blocked_id = blocked.id();
        set.insert(blocked);
        set.insert(healthy);

        // First frame fills the blocked subscriber's buffer.
        let _ = set.broadcast(&SseFrame::comment("1"));
        // Second frame overflows it; the subscriber is removed, others are fine.
        let outcome = set.broadcast(&SseFrame::comment("2"));

        assert!(outcome.removed.contains(&blocked_id));
        assert_eq!(set.len(), 1);
        assert_eq!(rx2.recv().await.unwrap(), SseFrame::comment("1"));
        assert_eq!(rx2.recv().await.unwrap(), SseFrame::comment("2"));
    }

    #[tokio::test]
    async fn sweep_drops_closed_subscribers() {
        let set = ClientSet::new();
        let (c1, rx1) = SseClient::channel(8);
        let (c2, _rx2) = SseClient::channel(8);
        set.insert(c1);
        set.insert(c2);
        drop(rx1);

        let removed = set.sweep();
        assert_eq!(removed.len(), 1);
        assert_eq!(set.len(), 1);
    }
}
