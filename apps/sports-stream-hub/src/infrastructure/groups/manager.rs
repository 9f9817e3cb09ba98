//! Group Manager
//!
//! Owns the group table and every group's lifecycle: creation on first
//! attach, the attach-time replay, grace-period teardown when a group runs
//! out of subscribers, and the counts back-edge (counts emissions fan out to
//! live sport-games subscribers, never the other way around).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::competition::CompetitionOddsGroup;
use super::counts::CountsGroup;
use super::game::GameGroup;
use super::sport_games::SportGamesGroup;
use super::{FanoutGroup, GroupCore, GroupKey, StreamMode};
use crate::domain::markets::{is_football_like, merge_priority};
use crate::infrastructure::broadcast::{SseClient, SseFrame};
use crate::infrastructure::config::GroupSettings;
use crate::infrastructure::hierarchy::HierarchyCache;
use crate::infrastructure::metrics;
use crate::infrastructure::swarm::messages;
use crate::infrastructure::swarm::session::SwarmSession;

/// Aggregate counters exposed on `/api/health`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GroupTableStats {
    /// Number of active groups.
    pub groups: usize,
    /// Total subscribers across all groups.
    pub subscribers: usize,
}

/// The hub's group table and lifecycle coordinator.
pub struct GroupManager {
    session: Arc<SwarmSession>,
    hierarchy: Arc<HierarchyCache>,
    settings: GroupSettings,
    groups: RwLock<HashMap<GroupKey, Arc<dyn FanoutGroup>>>,
    counts: RwLock<Option<Arc<CountsGroup>>>,
    priorities: Mutex<HashMap<i64, (Instant, Vec<String>)>>,
    empty_tx: mpsc::UnboundedSender<GroupKey>,
    empty_rx: Mutex<Option<mpsc::UnboundedReceiver<GroupKey>>>,
    cancel: CancellationToken,
}

impl GroupManager {
    /// Create the manager. `run_janitor` must be spawned for grace handling.
    #[must_use]
    pub fn new(
        session: Arc<SwarmSession>,
        hierarchy: Arc<HierarchyCache>,
        settings: GroupSettings,
        cancel: CancellationToken,
    ) -> Self {
        let (empty_tx, empty_rx) = mpsc::unbounded_channel();
        Self {
            session,
            hierarchy,
            settings,
            groups: RwLock::new(HashMap::new()),
            counts: RwLock::new(None),
            priorities: Mutex::new(HashMap::new()),
            empty_tx,
            empty_rx: Mutex::new(Some(empty_rx)),
            cancel,
        }
    }

    /// The shared upstream session.
    #[must_use]
    pub const fn session(&self) -> &Arc<SwarmSession> {
        &self.session
    }

    /// The taxonomy cache.
    #[must_use]
    pub const fn hierarchy(&self) -> &Arc<HierarchyCache> {
        &self.hierarchy
    }

    /// Group cadence settings.
    #[must_use]
    pub const fn settings(&self) -> &GroupSettings {
        &self.settings
    }

    // =========================================================================
    // Attach
    // =========================================================================

    /// Attach a subscriber to a group, creating the group if needed.
    ///
    /// The new subscriber receives, in order: a padding comment to defeat
    /// intermediary buffering, a `ready` comment, and the group's retained
    /// payloads. Only then does it join the live set, so replay always
    /// precedes live emissions.
    pub fn attach(self: &Arc<Self>, key: GroupKey, client: SseClient, sport_name: Option<String>) {
        // Live sport streams also carry counts events, so the counts
        // singleton is kept warm alongside them.
        if matches!(key, GroupKey::SportGames { mode: StreamMode::Live, .. }) {
            let _ = self.ensure_group(GroupKey::Counts, None);
        }

        let group = self.ensure_group(key, sport_name);

        if client.send(SseFrame::padding()).is_err() || client.send(SseFrame::ready()).is_err() {
            return;
        }
        for frame in group.replay_frames() {
            if client.send(frame).is_err() {
                return;
            }
        }
        group.core().attach_client(client);

        metrics::set_active_subscribers(self.total_subscribers() as f64);
        tracing::debug!(group = %key, subscribers = group.core().subscriber_count(), "subscriber attached");
    }

    fn ensure_group(self: &Arc<Self>, key: GroupKey, sport_name: Option<String>) -> Arc<dyn FanoutGroup> {
        if let Some(existing) = self.groups.read().get(&key) {
            return Arc::clone(existing);
        }

        let mut groups = self.groups.write();
        if let Some(existing) = groups.get(&key) {
            return Arc::clone(existing);
        }

        let core = GroupCore::new(key, self.cancel.child_token(), self.empty_tx.clone());
        let group: Arc<dyn FanoutGroup> = match key {
            GroupKey::Counts => {
                let counts = CountsGroup::spawn(core, Arc::downgrade(self));
                *self.counts.write() = Some(Arc::clone(&counts));
                counts
            }
            GroupKey::SportGames { mode, sport_id } => {
                SportGamesGroup::spawn(core, mode, sport_id, sport_name, Arc::downgrade(self))
            }
            GroupKey::Game { game_id } => GameGroup::spawn(core, game_id, Arc::downgrade(self)),
            GroupKey::CompetitionOdds { mode, sport_id, competition_id } => {
                CompetitionOddsGroup::spawn(
                    core,
                    mode,
                    sport_id,
                    competition_id,
                    sport_name,
                    Arc::downgrade(self),
                )
            }
        };

        groups.insert(key, Arc::clone(&group));
        metrics::set_active_groups(groups.len() as f64);
        tracing::info!(group = %key, "group created");
        group
    }

    // =========================================================================
    // Grace & Teardown
    // =========================================================================

    /// Serve empty-group notifications, arming grace timers.
    pub async fn run_janitor(self: Arc<Self>) {
        let mut empty_rx = self
            .empty_rx
            .lock()
            .take()
            .expect("GroupManager::run_janitor called twice");

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                notification = empty_rx.recv() => {
                    let Some(key) = notification else { break };
                    self.arm_grace(key);
                }
            }
        }
    }

    fn arm_grace(self: &Arc<Self>, key: GroupKey) {
        let Some(group) = self.groups.read().get(&key).map(Arc::clone) else {
            return;
        };
        let core = group.core();
        if !core.is_idle() || core.grace_armed() {
            return;
        }

        let manager = Arc::downgrade(self);
        let grace = self.settings.grace;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(manager) = manager.upgrade() {
                manager.finish_grace(key).await;
            }
        });
        core.set_grace(handle);
        tracing::debug!(group = %key, grace_secs = grace.as_secs(), "grace timer armed");
    }

    async fn finish_grace(self: Arc<Self>, key: GroupKey) {
        {
            let groups = self.groups.read();
            let Some(group) = groups.get(&key) else {
                return;
            };
            group.core().grace_fired();
            if !group.core().is_idle() {
                return;
            }
        }

        // The counts singleton outlives its own subscribers while any live
        // sport stream still needs its emissions.
        if key == GroupKey::Counts && self.has_live_sport_groups() {
            tracing::debug!("counts group kept alive by live sport groups");
            return;
        }

        self.teardown(key).await;
    }

    async fn teardown(&self, key: GroupKey) {
        let group = {
            let mut groups = self.groups.write();
            let Some(group) = groups.get(&key).map(Arc::clone) else {
                return;
            };
            // A subscriber that re-attached while the grace timer was firing
            // wins; the group stays.
            if !group.core().is_idle() {
                return;
            }
            groups.remove(&key);
            group
        };
        if key == GroupKey::Counts {
            *self.counts.write() = None;
        }

        group.core().clear_grace();
        group.core().cancel_token().cancel();

        for sub_id in group.core().take_subs() {
            self.session.unsubscribe(&sub_id).await;
        }

        metrics::set_active_groups(self.groups.read().len() as f64);
        tracing::info!(group = %key, "group removed after grace");

        // Removing the last live sport group may strand an idle counts
        // singleton; give it its own grace window.
        if matches!(key, GroupKey::SportGames { mode: StreamMode::Live, .. })
            && !self.has_live_sport_groups()
            && let Some(counts) = self.counts.read().as_ref()
            && counts.core().is_idle()
        {
            let _ = self.empty_tx.send(GroupKey::Counts);
        }
    }

    // =========================================================================
    // Counts Back-Edge
    // =========================================================================

    /// Fan a frame out to every live sport-games group's subscribers.
    ///
    /// One-way by design: counts iterates the group table, no group calls
    /// back into counts.
    pub fn broadcast_to_live_sport_groups(&self, frame: &SseFrame) {
        for (key, group) in self.groups.read().iter() {
            if matches!(key, GroupKey::SportGames { mode: StreamMode::Live, .. }) {
                group.core().broadcast(frame);
            }
        }
    }

    /// Whether any live sport-games group exists.
    #[must_use]
    pub fn has_live_sport_groups(&self) -> bool {
        self.groups
            .read()
            .keys()
            .any(|key| matches!(key, GroupKey::SportGames { mode: StreamMode::Live, .. }))
    }

    /// The counts frames a live sport stream replays on attach
    /// (`counts` + `prematch_counts`).
    #[must_use]
    pub fn counts_replay_for_live(&self) -> Vec<SseFrame> {
        self.counts
            .read()
            .as_ref()
            .map(|counts| counts.replay_for_live_stream())
            .unwrap_or_default()
    }

    // =========================================================================
    // Market Priority
    // =========================================================================

    /// Effective market-type priority for a sport.
    ///
    /// The dynamically published list is fetched at most once per TTL and
    /// prepended; the static fallback is always appended, so an empty or
    /// failed fetch degrades to the static behavior.
    pub async fn market_priority(&self, sport_id: i64, sport_name: Option<&str>) -> Vec<String> {
        if let Some((fetched_at, list)) = self.priorities.lock().get(&sport_id)
            && fetched_at.elapsed() < self.settings.market_priority_ttl
        {
            return list.clone();
        }

        let dynamic = match self
            .session
            .request_snapshot(
                "get_market_type_priority",
                messages::market_priority_params(sport_id),
            )
            .await
        {
            Ok(data) => parse_priority_list(&data),
            Err(e) => {
                tracing::debug!(sport_id, error = %e, "dynamic market priority unavailable");
                Vec::new()
            }
        };

        let resolved_name = match sport_name {
            Some(name) => name.to_string(),
            None => self.hierarchy.sport_name(sport_id).await.unwrap_or_default(),
        };
        let merged = merge_priority(&dynamic, is_football_like(&resolved_name));

        // An unresolved sport with no dynamic list would pin the wrong
        // static list for a whole TTL; leave it uncached instead.
        if !dynamic.is_empty() || !resolved_name.is_empty() {
            self.priorities
                .lock()
                .insert(sport_id, (Instant::now(), merged.clone()));
        }
        merged
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Current table stats for health reporting.
    #[must_use]
    pub fn stats(&self) -> GroupTableStats {
        let groups = self.groups.read();
        GroupTableStats {
            groups: groups.len(),
            subscribers: groups.values().map(|g| g.core().subscriber_count()).sum(),
        }
    }

    /// Whether a group currently exists (test and health surface).
    #[must_use]
    pub fn contains(&self, key: GroupKey) -> bool {
        self.groups.read().contains_key(&key)
    }

    fn total_subscribers(&self) -> usize {
        self.groups
            .read()
            .values()
            .map(|g| g.core().subscriber_count())
            .sum()
    }
}

/// Tolerant parse of the dynamic priority reply: a bare array of type
/// strings, or an object carrying one under `market_types` / `data`.
fn parse_priority_list(data: &Value) -> Vec<String> {
    let list = match data {
        Value::Array(items) => items,
        Value::Object(obj) => match obj.get("market_types").or_else(|| obj.get("data")) {
            Some(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    list.iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn priority_list_from_bare_array() {
        let data = json!(["P1XP2", "1X2"]);
        assert_eq!(parse_priority_list(&data), vec!["P1XP2", "1X2"]);
    }

    #[test]
    fn priority_list_from_wrapped_object() {
        let data = json!({"market_types": ["W1W2"]});
        assert_eq!(parse_priority_list(&data), vec!["W1W2"]);
        let data = json!({"data": ["P1P2"]});
        assert_eq!(parse_priority_list(&data), vec!["P1P2"]);
    }

    #[test]
    fn priority_list_tolerates_garbage() {
        assert!(parse_priority_list(&json!(null)).is_empty());
        assert!(parse_priority_list(&json!({"other": 1})).is_empty());
        assert_eq!(parse_priority_list(&json!(["A", 5, "B"])), vec!["A", "B"]);
    }
}
