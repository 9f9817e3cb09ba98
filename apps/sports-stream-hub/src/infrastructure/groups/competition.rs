//! Per-Competition Odds Group
//!
//! The sport-odds contract scoped to a single competition; the UI uses it to
//! hydrate a collapsed or expanded competition subtree. Live mode holds a
//! subscription (with one-shot polling as the fallback when the subscribe is
//! rejected). Prematch mode keeps the competition's game id set current and
//! steps a staleness cursor over it: each tick queries at most one chunk of
//! game ids whose cached odds are missing or older than the refresh age.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::manager::GroupManager;
use super::odds_cache::OddsCache;
use super::payloads::{OddsPayload, OddsUpdateEntry};
use super::{FanoutGroup, GroupCore, StreamMode};
use crate::domain::fingerprint::odds_fingerprint;
use crate::domain::markets::{build_odds_row, market_is_blocked, select_main_market};
use crate::domain::payload::{extract_games, get_i64, get_u64};
use crate::infrastructure::broadcast::SseFrame;
use crate::infrastructure::config::GroupSettings;
use crate::infrastructure::metrics;
use crate::infrastructure::registry::SubscriptionUpdate;
use crate::infrastructure::swarm::messages::{
    competition_games_params, competition_odds_params, games_odds_params,
};
use crate::infrastructure::swarm::session::{SessionError, SessionEvent, SwarmSession};

struct CompetitionState {
    priority: Vec<String>,
    game_ids: Vec<i64>,
    odds_cache: OddsCache,
    snapshot_frame: Option<SseFrame>,
    sub: Option<String>,
    subscribed: bool,
}

/// One competition's odds stream in one mode.
pub struct CompetitionOddsGroup {
    core: GroupCore,
    mode: StreamMode,
    sport_id: i64,
    competition_id: i64,
    session: Arc<SwarmSession>,
    settings: GroupSettings,
    manager: Weak<GroupManager>,
    sport_name: Option<String>,
    state: Mutex<CompetitionState>,
    updates_tx: mpsc::UnboundedSender<SubscriptionUpdate>,
    updates_rx: Mutex<Option<mpsc::UnboundedReceiver<SubscriptionUpdate>>>,
}

impl CompetitionOddsGroup {
    /// Create the group and spawn its driver task.
    #[must_use]
    pub fn spawn(
        core: GroupCore,
        mode: StreamMode,
        sport_id: i64,
        competition_id: i64,
        sport_name: Option<String>,
        manager: Weak<GroupManager>,
    ) -> Arc<Self> {
        let (session, settings) = {
            let strong = manager.upgrade().expect("manager alive during group creation");
            (Arc::clone(strong.session()), strong.settings().clone())
        };
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let odds_cache = OddsCache::new(settings.odds_cache_max, settings.odds_cache_ttl);
        let group = Arc::new(Self {
            core,
            mode,
            sport_id,
            competition_id,
            session,
            settings,
            manager,
            sport_name,
            state: Mutex::new(CompetitionState {
                priority: Vec::new(),
                game_ids: Vec::new(),
                odds_cache,
                snapshot_frame: None,
                sub: None,
                subscribed: false,
            }),
            updates_tx,
            updates_rx: Mutex::new(Some(updates_rx)),
        });
        tokio::spawn(Arc::clone(&group).run());
        group
    }

    async fn run(self: Arc<Self>) {
        let mut updates_rx = self
            .updates_rx
            .lock()
            .take()
            .expect("competition driver started twice");
        let mut session_events = self.session.events();

        self.establish().await;

        let mut heartbeat = tokio::time::interval(self.settings.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut snapshot = tokio::time::interval(self.settings.snapshot_interval);
        snapshot.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut games_poll = tokio::time::interval(self.settings.prematch_poll_interval);
        games_poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        games_poll.tick().await; // establish just refreshed the id set
        let mut odds_poll = tokio::time::interval(self.settings.odds_poll_interval);
        odds_poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        odds_poll.tick().await;

        loop {
            tokio::select! {
                () = self.core.cancel_token().cancelled() => break,

                Some(update) = updates_rx.recv() => {
                    let matches_sub = self.state.lock().sub.as_deref() == Some(&update.sub_id);
                    if matches_sub {
                        let _ = self.process_odds(&update.state);
                    }
                }

                _ = heartbeat.tick() => self.core.heartbeat_tick(),

                _ = snapshot.tick() => self.rebuild_snapshot(),

                _ = games_poll.tick(), if !self.mode.is_live() => self.refresh_game_ids().await,

                _ = odds_poll.tick() => self.poll_tick().await,

                event = session_events.recv() => {
                    if let Ok(SessionEvent::Connected) = event {
                        self.establish().await;
                    }
                }
            }
        }
        tracing::debug!(group = %self.core.key(), "competition driver stopped");
    }

    async fn establish(&self) {
        let _ = self.core.take_subs();
        {
            let mut state = self.state.lock();
            state.sub = None;
            state.subscribed = false;
        }

        if let Err(e) = self.session.ensure().await {
            tracing::warn!(group = %self.core.key(), error = %e, "upstream unavailable");
            self.core.broadcast(&SseFrame::error("upstream feed unavailable"));
            return;
        }

        if let Some(manager) = self.manager.upgrade() {
            let priority = manager
                .market_priority(self.sport_id, self.sport_name.as_deref())
                .await;
            self.state.lock().priority = priority;
        }

        if self.mode.is_live() {
            let priority = self.state.lock().priority.clone();
            match self
                .session
                .subscribe(
                    competition_odds_params(self.competition_id, true, &priority, true),
                    self.updates_tx.clone(),
                )
                .await
            {
                Ok((sub_id, initial)) => {
                    self.core.hold_sub(sub_id.clone());
                    let mut state = self.state.lock();
                    state.sub = Some(sub_id);
                    state.subscribed = true;
                    drop(state);
                    let _ = self.process_odds(&initial);
                }
                Err(e) => {
                    tracing::warn!(
                        group = %self.core.key(),
                        error = %e,
                        "competition odds subscribe rejected, falling back to polling"
                    );
                }
            }
        } else {
            self.refresh_game_ids().await;
            self.poll_stale_chunk().await;
        }
    }

    async fn poll_tick(&self) {
        if self.mode.is_live() {
            // One-shot full query only while the subscribe fallback is active.
            if !self.state.lock().subscribed {
                self.poll_live_once().await;
            }
        } else {
            self.poll_stale_chunk().await;
        }
    }

    async fn poll_live_once(&self) {
        let priority = self.state.lock().priority.clone();
        match self
            .session
            .request_snapshot(
                "get",
                competition_odds_params(self.competition_id, true, &priority, false),
            )
            .await
        {
            Ok(doc) => {
                let _ = self.process_odds(&doc);
            }
            Err(e) => {
                tracing::debug!(group = %self.core.key(), error = %e, "competition odds poll failed");
                if matches!(e, SessionError::RequestTimeout) {
                    self.core.broadcast(&SseFrame::error("upstream request timed out"));
                }
            }
        }
    }

    /// Keep the competition's game id set current; the staleness cursor
    /// walks this set.
    async fn refresh_game_ids(&self) {
        match self
            .session
            .request_snapshot(
                "get",
                competition_games_params(self.competition_id, self.mode.is_live()),
            )
            .await
        {
            Ok(doc) => {
                let ids: Vec<i64> = extract_games(&doc)
                    .iter()
                    .filter_map(|game| get_i64(game, "id"))
                    .collect();
                self.state.lock().game_ids = ids;
            }
            Err(e) => {
                tracing::debug!(group = %self.core.key(), error = %e, "competition games poll failed");
                if matches!(e, SessionError::RequestTimeout) {
                    self.core.broadcast(&SseFrame::error("upstream request timed out"));
                }
            }
        }
    }

    /// One cursor step: query the next chunk of games whose cached odds are
    /// missing or stale.
    async fn poll_stale_chunk(&self) {
        let (ids, priority) = {
            let state = self.state.lock();
            let stale: Vec<i64> = state
                .game_ids
                .iter()
                .copied()
                .filter(|id| {
                    state
                        .odds_cache
                        .entry_age(*id)
                        .is_none_or(|age| age > self.settings.odds_refresh_age)
                })
                .take(self.settings.odds_chunk_size)
                .collect();
            (stale, state.priority.clone())
        };
        if ids.is_empty() {
            return;
        }

        match self
            .session
            .request_snapshot("get", games_odds_params(&ids, &priority))
            .await
        {
            Ok(doc) => {
                let seen = self.process_odds(&doc);
                // Queried games absent from the reply have no renderable
                // odds; gate them as `null` so they stop being re-queried
                // every step.
                let mut state = self.state.lock();
                let mut nulled = Vec::new();
                for id in ids {
                    if !seen.contains(&id) && state.odds_cache.gate(id, "", 0, None) {
                        nulled.push(OddsUpdateEntry { game_id: id, odds: None, markets_count: 0 });
                    }
                }
                drop(state);
                self.emit_odds_updates(nulled);
            }
            Err(e) => {
                tracing::debug!(group = %self.core.key(), error = %e, "competition odds poll failed");
                if matches!(e, SessionError::RequestTimeout) {
                    self.core.broadcast(&SseFrame::error("upstream request timed out"));
                }
            }
        }
    }

    /// Gate a document's games through the odds cache and emit the changed
    /// entries. Returns the set of game ids present in the document.
    fn process_odds(&self, doc: &Value) -> HashSet<i64> {
        let mut seen = HashSet::new();
        if doc.is_null() {
            return seen;
        }
        let games = extract_games(doc);
        if games.is_empty() {
            return seen;
        }

        let mut changed = Vec::new();
        {
            let mut state = self.state.lock();
            let priority = state.priority.clone();
            for game in &games {
                let Some(game_id) = get_i64(game, "id") else {
                    continue;
                };
                seen.insert(game_id);
                let markets_count = get_u64(game, "markets_count").unwrap_or(0);

                let (fingerprint, odds) = match select_main_market(game, &priority) {
                    Some(market) => (
                        odds_fingerprint(market),
                        build_odds_row(market, market_is_blocked(market)),
                    ),
                    None => (String::new(), None),
                };

                if state
                    .odds_cache
                    .gate(game_id, &fingerprint, markets_count, odds.clone())
                {
                    changed.push(OddsUpdateEntry { game_id, odds, markets_count });
                }
            }
            state.odds_cache.prune();
        }

        self.emit_odds_updates(changed);
        seen
    }

    /// Emit changed odds entries in chunks bounded by the configured size.
    fn emit_odds_updates(&self, updates: Vec<OddsUpdateEntry>) {
        if updates.is_empty() {
            return;
        }
        for chunk in updates.chunks(self.settings.odds_chunk_size) {
            let payload = OddsPayload {
                sport_id: self.sport_id,
                competition_id: Some(self.competition_id),
                updates: chunk.to_vec(),
            };
            if let Ok(frame) = SseFrame::named("odds", &payload) {
                self.core.broadcast(&frame);
            }
        }
        metrics::record_emission("competition_odds");
    }

    fn rebuild_snapshot(&self) {
        let frame = {
            let mut state = self.state.lock();
            state.odds_cache.prune();
            if state.odds_cache.is_empty() {
                state.snapshot_frame = None;
                return;
            }

            let updates: Vec<OddsUpdateEntry> = state
                .odds_cache
                .snapshot()
                .into_iter()
                .map(|(game_id, entry)| OddsUpdateEntry {
                    game_id,
                    odds: entry.odds,
                    markets_count: entry.markets_count,
                })
                .collect();
            let payload = OddsPayload {
                sport_id: self.sport_id,
                competition_id: Some(self.competition_id),
                updates,
            };
            let Ok(frame) = SseFrame::named("odds", &payload) else {
                return;
            };
            state.snapshot_frame = Some(frame.clone());
            frame
        };

        self.core.broadcast(&frame);
    }
}

impl FanoutGroup for CompetitionOddsGroup {
    fn core(&self) -> &GroupCore {
        &self.core
    }

    fn replay_frames(&self) -> Vec<SseFrame> {
        self.state.lock().snapshot_frame.clone().into_iter().collect()
    }
}
