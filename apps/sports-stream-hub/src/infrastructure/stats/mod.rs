//! Metrics Aggregator
//!
//! Singleton collector for live-tracker instance reports: totals, a rolling
//! 60-second per-second bucket series, and per-game health leases asserting
//! that a tracker instance still has subscribers. Leases expire unless
//! renewed and are pruned on every read.
//!
//! Everything here is informational. Callers treat the aggregator as
//! fire-and-forget; the hub stays correct if every call is dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;

use crate::infrastructure::storage::FileStore;

/// Bucket series length.
const BUCKET_WINDOW_SECS: i64 = 60;

/// How long a lease survives without renewal.
const LEASE_TTL_MS: i64 = 30_000;

/// Storage key of the persisted aggregate.
const STORAGE_KEY: &str = "metrics";

/// One batch report from a live-tracker instance.
#[derive(Debug, Clone)]
pub struct TrackerReport {
    /// Game the instance bridges.
    pub game_id: i64,
    /// Messages forwarded since the last report.
    pub messages: u64,
    /// Parse failures since the last report.
    pub parse_errors: u64,
    /// Current subscriber count of the instance.
    pub sse_clients: usize,
    /// Whether the instance's upstream is connected.
    pub upstream_connected: bool,
}

/// A per-game health assertion with an expiry.
#[derive(Debug, Clone, Serialize)]
pub struct HealthLease {
    /// Subscribers attached to the tracker instance.
    pub sse_clients: usize,
    /// Whether the tracker upstream is connected.
    pub upstream_connected: bool,
    /// Epoch milliseconds after which the lease is dead.
    pub expires_at_ms: i64,
}

/// Rollups served on the health surface.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerRollups {
    /// Games with at least one subscriber.
    pub active_games: usize,
    /// Total subscribers across live leases.
    pub active_subscribers: usize,
    /// Games whose tracker upstream is connected.
    pub connected_games: usize,
    /// Messages observed across all instances in the last 60 seconds.
    pub messages_last_minute: u64,
}

#[derive(Default)]
struct AggregatorState {
    total_messages: u64,
    total_parse_errors: u64,
    last_seen_ms: i64,
    buckets: VecDeque<(i64, u64)>,
    leases: HashMap<i64, HealthLease>,
}

/// The process-wide aggregator.
pub struct MetricsAggregator {
    state: Mutex<AggregatorState>,
    storage: Arc<FileStore>,
}

impl MetricsAggregator {
    /// Create the aggregator over the given store.
    #[must_use]
    pub fn new(storage: Arc<FileStore>) -> Self {
        Self {
            state: Mutex::new(AggregatorState::default()),
            storage,
        }
    }

    /// Ingest one tracker report.
    pub fn record_report(&self, report: &TrackerReport) {
        let now_ms = Utc::now().timestamp_millis();
        let now_sec = now_ms / 1000;

        {
            let mut state = self.state.lock();
            state.total_messages += report.messages;
            state.total_parse_errors += report.parse_errors;
            state.last_seen_ms = now_ms;

            match state.buckets.back_mut() {
                Some((sec, count)) if *sec == now_sec => *count += report.messages,
                _ => state.buckets.push_back((now_sec, report.messages)),
            }
            while state
                .buckets
                .front()
                .is_some_and(|(sec, _)| *sec < now_sec - BUCKET_WINDOW_SECS)
            {
                state.buckets.pop_front();
            }

            state.leases.insert(
                report.game_id,
                HealthLease {
                    sse_clients: report.sse_clients,
                    upstream_connected: report.upstream_connected,
                    expires_at_ms: now_ms + LEASE_TTL_MS,
                },
            );
        }

        self.persist();
    }

    /// Drop a game's lease immediately (tracker instance ended).
    pub fn release_lease(&self, game_id: i64) {
        self.state.lock().leases.remove(&game_id);
        self.persist();
    }

    /// Current rollups; expired leases are pruned as part of the read.
    #[must_use]
    pub fn rollups(&self) -> TrackerRollups {
        let now_ms = Utc::now().timestamp_millis();
        let now_sec = now_ms / 1000;
        let mut state = self.state.lock();

        state.leases.retain(|_, lease| lease.expires_at_ms > now_ms);

        let active_games = state
            .leases
            .values()
            .filter(|lease| lease.sse_clients > 0)
            .count();
        let active_subscribers = state.leases.values().map(|lease| lease.sse_clients).sum();
        let connected_games = state
            .leases
            .values()
            .filter(|lease| lease.upstream_connected)
            .count();
        let messages_last_minute = state
            .buckets
            .iter()
            .filter(|(sec, _)| *sec >= now_sec - BUCKET_WINDOW_SECS)
            .map(|(_, count)| count)
            .sum();

        TrackerRollups {
            active_games,
            active_subscribers,
            connected_games,
            messages_last_minute,
        }
    }

    /// Queue the aggregate for persistence; the store's flusher coalesces
    /// actual writes.
    fn persist(&self) {
        let snapshot = {
            let state = self.state.lock();
            json!({
                "totals": {
                    "messages": state.total_messages,
                    "parse_errors": state.total_parse_errors,
                    "last_seen_ms": state.last_seen_ms,
                },
                "buckets": state.buckets.iter().collect::<Vec<_>>(),
                "leases": state
                    .leases
                    .iter()
                    .map(|(game_id, lease)| (game_id.to_string(), lease.clone()))
                    .collect::<HashMap<String, HealthLease>>(),
            })
        };
        self.storage.put(STORAGE_KEY, snapshot);
    }
}

// =============================================================================
// Tests
// =============================================================================
