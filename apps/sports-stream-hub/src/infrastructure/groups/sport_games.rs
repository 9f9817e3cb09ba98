//! Sport-Games Group
//!
//! Carries the authoritative game list for one sport in one mode, plus the
//! per-game main-market odds that accompany it.
//!
//! - **Live**: a standing subscription delivers the sport's in-play games;
//!   a second subscription, filtered to the sport's main market types,
//!   delivers odds deltas. If the games subscribe is rejected the group
//!   falls back to one-shot polling until the next reconnect.
//! - **Prematch**: the game list is polled every few seconds (no
//!   subscription); odds come from a featured-odds subscription for
//!   near-kickoff games plus stale-entry polling in fixed-size chunks.
//!
//! `games` emissions are gated by the sport fingerprint; `odds` emissions
//! carry only the games whose odds fingerprint or market count moved, and a
//! coalesced full snapshot is rebuilt periodically as the attach replay.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::manager::GroupManager;
use super::odds_cache::OddsCache;
use super::payloads::{GamesPayload, OddsPayload, OddsUpdateEntry};
use super::{FanoutGroup, GroupCore, StreamMode};
use crate::domain::fingerprint::{odds_fingerprint, sport_fingerprint};
use crate::domain::markets::{build_odds_row, market_is_blocked, select_main_market};
use crate::domain::payload::{
    extract_games, get_i64, get_u64, is_live_listable, is_prematch_listable,
};
use crate::infrastructure::broadcast::SseFrame;
use crate::infrastructure::config::GroupSettings;
use crate::infrastructure::metrics;
use crate::infrastructure::registry::SubscriptionUpdate;
use crate::infrastructure::swarm::messages::{
    featured_odds_params, games_odds_params, sport_games_params, sport_odds_params,
};
use crate::infrastructure::swarm::session::{SessionEvent, SwarmSession};

struct SportState {
    sport_name: Option<String>,
    priority: Vec<String>,
    games: Vec<Value>,
    games_fp: Option<String>,
    games_frame: Option<SseFrame>,
    odds_cache: OddsCache,
    odds_snapshot_frame: Option<SseFrame>,
    games_sub: Option<String>,
    odds_sub: Option<String>,
    games_subscribed: bool,
}

/// One sport's game list and odds in one mode.
pub struct SportGamesGroup {
    core: GroupCore,
    mode: StreamMode,
    sport_id: i64,
    session: Arc<SwarmSession>,
    settings: GroupSettings,
    manager: Weak<GroupManager>,
    state: Mutex<SportState>,
    updates_tx: mpsc::UnboundedSender<SubscriptionUpdate>,
    updates_rx: Mutex<Option<mpsc::UnboundedReceiver<SubscriptionUpdate>>>,
}

impl SportGamesGroup {
    /// Create the group and spawn its driver task.
    #[must_use]
    pub fn spawn(
        core: GroupCore,
        mode: StreamMode,
        sport_id: i64,
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
            session,
            settings,
            manager,
            state: Mutex::new(SportState {
                sport_name,
                priority: Vec::new(),
                games: Vec::new(),
                games_fp: None,
                games_frame: None,
                odds_cache,
                odds_snapshot_frame: None,
                games_sub: None,
                odds_sub: None,
                games_subscribed: false,
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
            .expect("sport-games driver started twice");
        let mut session_events = self.session.events();

        self.establish().await;

        let mut heartbeat = tokio::time::interval(self.settings.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut snapshot = tokio::time::interval(self.settings.snapshot_interval);
        snapshot.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut games_poll = tokio::time::interval(match self.mode {
            StreamMode::Live => self.settings.fallback_poll_interval,
            StreamMode::Prematch => self.settings.prematch_poll_interval,
        });
        games_poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        games_poll.tick().await; // establish just produced the initial list
        let mut odds_poll = tokio::time::interval(self.settings.odds_poll_interval);
        odds_poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.core.cancel_token().cancelled() => break,

                Some(update) = updates_rx.recv() => self.on_update(&update),

                _ = heartbeat.tick() => self.core.heartbeat_tick(),

                _ = snapshot.tick() => self.rebuild_odds_snapshot(),

                _ = games_poll.tick() => self.games_poll_tick().await,

                _ = odds_poll.tick(), if !self.mode.is_live() => self.odds_poll_tick().await,

                event = session_events.recv() => {
                    if let Ok(SessionEvent::Connected) = event {
                        self.establish().await;
                    }
                }
            }
        }
        tracing::debug!(group = %self.core.key(), "sport-games driver stopped");
    }

    // =========================================================================
    // Subscription Establishment
    // =========================================================================

    async fn establish(&self) {
        let _ = self.core.take_subs();
        {
            let mut state = self.state.lock();
            state.games_sub = None;
            state.odds_sub = None;
            state.games_subscribed = false;
        }

        if let Err(e) = self.session.ensure().await {
            tracing::warn!(group = %self.core.key(), error = %e, "upstream unavailable");
            self.core.broadcast(&SseFrame::error("upstream feed unavailable"));
            return;
        }

        self.resolve_names().await;
        let priority = self.state.lock().priority.clone();

        match self.mode {
            StreamMode::Live => {
                match self
                    .session
                    .subscribe(
                        sport_games_params(self.sport_id, true, true),
                        self.updates_tx.clone(),
                    )
                    .await
                {
                    Ok((sub_id, initial)) => {
                        self.core.hold_sub(sub_id.clone());
                        let mut state = self.state.lock();
                        state.games_sub = Some(sub_id);
                        state.games_subscribed = true;
                        drop(state);
                        self.process_games(&initial);
                    }
                    Err(e) => {
                        tracing::warn!(
                            group = %self.core.key(),
                            error = %e,
                            "games subscribe rejected, falling back to polling"
                        );
                    }
                }

                match self
                    .session
                    .subscribe(
                        sport_odds_params(self.sport_id, &priority, true),
                        self.updates_tx.clone(),
                    )
                    .await
                {
                    Ok((sub_id, initial)) => {
                        self.core.hold_sub(sub_id.clone());
                        self.state.lock().odds_sub = Some(sub_id);
                        let _ = self.process_odds(&initial);
                    }
                    Err(e) => {
                        tracing::warn!(group = %self.core.key(), error = %e, "odds subscribe rejected");
                    }
                }
            }
            StreamMode::Prematch => {
                self.poll_games_once().await;

                match self
                    .session
                    .subscribe(
                        featured_odds_params(self.sport_id, &priority),
                        self.updates_tx.clone(),
                    )
                    .await
                {
                    Ok((sub_id, initial)) => {
                        self.core.hold_sub(sub_id.clone());
                        self.state.lock().odds_sub = Some(sub_id);
                        let _ = self.process_odds(&initial);
                    }
                    Err(e) => {
                        tracing::warn!(
                            group = %self.core.key(),
                            error = %e,
                            "featured odds subscribe rejected"
                        );
                    }
                }
            }
        }
    }

    /// Resolve the sport's display name and market-type priority.
    async fn resolve_names(&self) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };

        let known_name = self.state.lock().sport_name.clone();
        let name = match known_name {
            Some(name) => name,
            None => manager
                .hierarchy()
                .sport_name(self.sport_id)
                .await
                .unwrap_or_default(),
        };

        let priority = manager
            .market_priority(self.sport_id, (!name.is_empty()).then_some(name.as_str()))
            .await;

        let mut state = self.state.lock();
        if state.sport_name.is_none() && !name.is_empty() {
            state.sport_name = Some(name);
        }
        state.priority = priority;
    }

    // =========================================================================
    // Updates & Polling
    // =========================================================================

    fn on_update(&self, update: &SubscriptionUpdate) {
        enum Kind {
            Games,
            Odds,
        }
        let kind = {
            let state = self.state.lock();
            if state.games_sub.as_deref() == Some(&update.sub_id) {
                Some(Kind::Games)
            } else if state.odds_sub.as_deref() == Some(&update.sub_id) {
                Some(Kind::Odds)
            } else {
                None
            }
        };
        match kind {
            Some(Kind::Games) => self.process_games(&update.state),
            Some(Kind::Odds) => {
                let _ = self.process_odds(&update.state);
            }
            None => {}
        }
    }

    async fn games_poll_tick(&self) {
        let should_poll = match self.mode {
            StreamMode::Prematch => true,
            // Live polls only while the subscribe fallback is active.
            StreamMode::Live => !self.state.lock().games_subscribed,
        };
        if should_poll {
            self.poll_games_once().await;
        }
    }

    async fn poll_games_once(&self) {
        match self
            .session
            .request_snapshot(
                "get",
                sport_games_params(self.sport_id, self.mode.is_live(), false),
            )
            .await
        {
            Ok(doc) => self.process_games(&doc),
            Err(e) => {
                tracing::debug!(group = %self.core.key(), error = %e, "games poll failed");
                if matches!(e, crate::infrastructure::swarm::session::SessionError::RequestTimeout) {
                    self.core.broadcast(&SseFrame::error("upstream request timed out"));
                }
            }
        }
    }

    /// One prematch odds cursor step: query the next chunk of games whose
    /// cached odds are missing or stale.
    async fn odds_poll_tick(&self) {
        let (ids, priority) = {
            let state = self.state.lock();
            let stale: Vec<i64> = state
                .games
                .iter()
                .filter_map(|game| get_i64(game, "id"))
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
            Err(e) => tracing::debug!(group = %self.core.key(), error = %e, "odds poll failed"),
        }
    }

    // =========================================================================
    // Processing & Emission
    // =========================================================================

    fn process_games(&self, doc: &Value) {
        if doc.is_null() {
            return;
        }
        let games: Vec<Value> = extract_games(doc)
            .into_iter()
            .filter(|game| match self.mode {
                StreamMode::Live => is_live_listable(game),
                StreamMode::Prematch => is_prematch_listable(game),
            })
            .collect();

        let fingerprint = sport_fingerprint(&games);
        let frame = {
            let mut state = self.state.lock();
            if state.games_fp.as_deref() == Some(&fingerprint) {
                return;
            }
            state.games_fp = Some(fingerprint);
            state.games = games.clone();

            let payload = GamesPayload::new(
                self.sport_id,
                state.sport_name.clone().unwrap_or_default(),
                games,
            );
            let Ok(frame) = SseFrame::named("games", &payload) else {
                return;
            };
            state.games_frame = Some(frame.clone());
            frame
        };

        self.core.broadcast(&frame);
        metrics::record_emission("games");
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
                competition_id: None,
                updates: chunk.to_vec(),
            };
            if let Ok(frame) = SseFrame::named("odds", &payload) {
                self.core.broadcast(&frame);
            }
        }
        metrics::record_emission("odds");
    }

    /// Rebuild the coalesced odds snapshot from the cache; retained for
    /// attach replay and emitted so long-lived subscribers re-sync.
    fn rebuild_odds_snapshot(&self) {
        let frame = {
            let mut state = self.state.lock();
            state.odds_cache.prune();
            if state.odds_cache.is_empty() {
                state.odds_snapshot_frame = None;
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
                competition_id: None,
                updates,
            };
            let Ok(frame) = SseFrame::named("odds", &payload) else {
                return;
            };
            state.odds_snapshot_frame = Some(frame.clone());
            frame
        };

        self.core.broadcast(&frame);
    }
}

impl FanoutGroup for SportGamesGroup {
    fn core(&self) -> &GroupCore {
        &self.core
    }

    fn replay_frames(&self) -> Vec<SseFrame> {
        let mut frames = Vec::new();

        // Live sport streams replay the current counts ahead of the list.
        if self.mode.is_live()
            && let Some(manager) = self.manager.upgrade()
        {
            frames.extend(manager.counts_replay_for_live());
        }

        let state = self.state.lock();
        if let Some(games) = &state.games_frame {
            frames.push(games.clone());
        }
        if let Some(odds) = &state.odds_snapshot_frame {
            frames.push(odds.clone());
        }
        frames
    }
}
