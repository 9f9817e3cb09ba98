//! Fan-out Groups
//!
//! A group is the unit of aggregation between upstream subscriptions and
//! downstream SSE subscribers: one group per counts singleton, per
//! sport+mode, per game, and per competition+mode. Each group runs one
//! driver task that consumes its subscription updates and timers
//! sequentially, which is what preserves upstream arrival order towards its
//! subscribers.

pub mod competition;
pub mod counts;
pub mod game;
pub mod manager;
pub mod odds_cache;
pub mod payloads;
pub mod sport_games;

use std::fmt;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use manager::GroupManager;
pub use odds_cache::{OddsCache, OddsCacheEntry};
pub use payloads::{CountsPayload, GamePayload, GamesPayload, OddsPayload, OddsUpdateEntry};

use crate::infrastructure::broadcast::{ClientSet, SseClient, SseFrame};

// =============================================================================
// Keys
// =============================================================================

/// Live vs prematch variant of a keyed group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamMode {
    /// In-play games.
    Live,
    /// Upcoming games.
    Prematch,
}

impl StreamMode {
    /// Parse from a query-string value.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "live" => Some(Self::Live),
            "prematch" => Some(Self::Prematch),
            _ => None,
        }
    }

    /// Whether this is the live variant.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Live)
    }

    /// Stable name used in group keys and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Prematch => "prematch",
        }
    }
}

/// Natural key of a fan-out group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKey {
    /// The counts singleton.
    Counts,
    /// One sport's game list (and its odds) in one mode.
    SportGames {
        /// Live or prematch.
        mode: StreamMode,
        /// Sport id.
        sport_id: i64,
    },
    /// One game's full detail.
    Game {
        /// Game id.
        game_id: i64,
    },
    /// One competition's odds in one mode.
    CompetitionOdds {
        /// Live or prematch.
        mode: StreamMode,
        /// Sport the competition belongs to.
        sport_id: i64,
        /// Competition id.
        competition_id: i64,
    },
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Counts => write!(f, "counts"),
            Self::SportGames { mode, sport_id } => {
                write!(f, "sport:{}:{sport_id}", mode.as_str())
            }
            Self::Game { game_id } => write!(f, "game:{game_id}"),
            Self::CompetitionOdds { mode, sport_id, competition_id } => {
                write!(f, "competition:{}:{sport_id}:{competition_id}", mode.as_str())
            }
        }
    }
}

// =============================================================================
// Group Core
// =============================================================================

/// State every group kind shares: its subscriber set, held upstream
/// subscription ids, the grace timer, and its teardown token.
pub struct GroupCore {
    key: GroupKey,
    clients: ClientSet,
    cancel: CancellationToken,
    sub_ids: parking_lot::Mutex<Vec<String>>,
    grace: parking_lot::Mutex<Option<JoinHandle<()>>>,
    empty_tx: tokio::sync::mpsc::UnboundedSender<GroupKey>,
}

impl GroupCore {
    /// Create a core; `empty_tx` reaches the manager's janitor.
    #[must_use]
    pub fn new(
        key: GroupKey,
        cancel: CancellationToken,
        empty_tx: tokio::sync::mpsc::UnboundedSender<GroupKey>,
    ) -> Self {
        Self {
            key,
            clients: ClientSet::new(),
            cancel,
            sub_ids: parking_lot::Mutex::new(Vec::new()),
            grace: parking_lot::Mutex::new(None),
            empty_tx,
        }
    }

    /// The group's key.
    #[must_use]
    pub const fn key(&self) -> GroupKey {
        self.key
    }

    /// The group's teardown token.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Register a subscriber, cancelling any running grace timer.
    pub fn attach_client(&self, client: SseClient) {
        if let Some(handle) = self.grace.lock().take() {
            handle.abort();
            tracing::debug!(group = %self.key, "grace cancelled by new subscriber");
        }
        self.clients.insert(client);
    }

    /// Remove a subscriber; notifies the janitor on the empty transition.
    pub fn detach_client(&self, id: crate::infrastructure::broadcast::ClientId) {
        if self.clients.remove(id) && self.clients.is_empty() {
            let _ = self.empty_tx.send(self.key);
        }
    }

    /// Broadcast a frame; failed subscribers are removed and an empty
    /// transition is reported.
    pub fn broadcast(&self, frame: &SseFrame) {
        let was_populated = !self.clients.is_empty();
        let outcome = self.clients.broadcast(frame);
        for id in &outcome.removed {
            tracing::debug!(group = %self.key, client = %id, "subscriber dropped on write failure");
        }
        crate::infrastructure::metrics::record_subscribers_dropped(outcome.removed.len() as u64);
        if was_populated && !outcome.removed.is_empty() && self.clients.is_empty() {
            let _ = self.empty_tx.send(self.key);
        }
    }

    /// Heartbeat tick: emit a liveness comment and sweep cancelled
    /// subscribers.
    pub fn heartbeat_tick(&self) {
        if self.clients.is_empty() {
            return;
        }
        self.broadcast(&SseFrame::comment("hb"));
        let swept = self.clients.sweep();
        if !swept.is_empty() && self.clients.is_empty() {
            let _ = self.empty_tx.send(self.key);
        }
    }

    /// Current subscriber count.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.clients.len()
    }

    /// Whether the group has no subscribers.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.clients.is_empty()
    }

    /// Record a held upstream subscription id.
    pub fn hold_sub(&self, sub_id: String) {
        self.sub_ids.lock().push(sub_id);
    }

    /// Take all held subscription ids (teardown or re-subscribe path).
    #[must_use]
    pub fn take_subs(&self) -> Vec<String> {
        std::mem::take(&mut *self.sub_ids.lock())
    }

    /// Store the grace timer handle. Any previous timer is aborted first so
    /// teardown never races a stale handle.
    pub fn set_grace(&self, handle: JoinHandle<()>) {
        if let Some(previous) = self.grace.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Whether a grace timer is currently armed.
    #[must_use]
    pub fn grace_armed(&self) -> bool {
        self.grace.lock().is_some()
    }

    /// Clear the grace slot, aborting the timer (teardown path).
    pub fn clear_grace(&self) {
        if let Some(handle) = self.grace.lock().take() {
            handle.abort();
        }
    }

    /// Clear the grace slot without aborting. Called from inside the fired
    /// timer task itself, which must not abort its own handle mid-teardown.
    pub fn grace_fired(&self) {
        drop(self.grace.lock().take());
    }
}

/// Behavior common to all group kinds, as seen by the manager and the edge.
pub trait FanoutGroup: Send + Sync {
    /// Shared lifecycle state.
    fn core(&self) -> &GroupCore;

    /// Frames replayed to a new subscriber after padding and `ready`,
    /// in order.
    fn replay_frames(&self) -> Vec<SseFrame>;
}

// =============================================================================
// Tests
// =============================================================================
