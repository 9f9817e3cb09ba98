//! Per-Game Group
//!
//! One subscription for one game's full detail (fields, markets, events).
//! Emissions are gated by the game fingerprint; a fallback poll covers the
//! case where the subscribe is rejected.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::manager::GroupManager;
use super::payloads::GamePayload;
use super::{FanoutGroup, GroupCore};
use crate::domain::fingerprint::game_fingerprint;
use crate::domain::payload::{extract_games, get_i64};
use crate::infrastructure::broadcast::SseFrame;
use crate::infrastructure::config::GroupSettings;
use crate::infrastructure::metrics;
use crate::infrastructure::registry::SubscriptionUpdate;
use crate::infrastructure::swarm::messages::game_details_params;
use crate::infrastructure::swarm::session::{SessionEvent, SwarmSession};

#[derive(Default)]
struct GameState {
    fingerprint: Option<String>,
    frame: Option<SseFrame>,
    sub: Option<String>,
    subscribed: bool,
}

/// One game's detail stream.
pub struct GameGroup {
    core: GroupCore,
    game_id: i64,
    session: Arc<SwarmSession>,
    settings: GroupSettings,
    state: Mutex<GameState>,
    updates_tx: mpsc::UnboundedSender<SubscriptionUpdate>,
    updates_rx: Mutex<Option<mpsc::UnboundedReceiver<SubscriptionUpdate>>>,
}

impl GameGroup {
    /// Create the group and spawn its driver task.
    #[must_use]
    pub fn spawn(core: GroupCore, game_id: i64, manager: Weak<GroupManager>) -> Arc<Self> {
        let (session, settings) = {
            let strong = manager.upgrade().expect("manager alive during group creation");
            (Arc::clone(strong.session()), strong.settings().clone())
        };
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let group = Arc::new(Self {
            core,
            game_id,
            session,
            settings,
            state: Mutex::new(GameState::default()),
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
            .expect("game driver started twice");
        let mut session_events = self.session.events();

        self.establish().await;

        let mut heartbeat = tokio::time::interval(self.settings.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut fallback = tokio::time::interval(self.settings.fallback_poll_interval);
        fallback.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        fallback.tick().await;

        loop {
            tokio::select! {
                () = self.core.cancel_token().cancelled() => break,

                Some(update) = updates_rx.recv() => {
                    let matches_sub = self.state.lock().sub.as_deref() == Some(&update.sub_id);
                    if matches_sub {
                        self.process(&update.state);
                    }
                }

                _ = heartbeat.tick() => self.core.heartbeat_tick(),

                _ = fallback.tick() => {
                    if !self.state.lock().subscribed {
                        self.poll_once().await;
                    }
                }

                event = session_events.recv() => {
                    if let Ok(SessionEvent::Connected) = event {
                        self.establish().await;
                    }
                }
            }
        }
        tracing::debug!(group = %self.core.key(), "game driver stopped");
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

        match self
            .session
            .subscribe(
                game_details_params(self.game_id, true),
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
                self.process(&initial);
            }
            Err(e) => {
                tracing::warn!(
                    group = %self.core.key(),
                    error = %e,
                    "game subscribe rejected, falling back to polling"
                );
            }
        }
    }

    async fn poll_once(&self) {
        match self
            .session
            .request_snapshot("get", game_details_params(self.game_id, false))
            .await
        {
            Ok(doc) => self.process(&doc),
            Err(e) => {
                tracing::debug!(group = %self.core.key(), error = %e, "game poll failed");
                if matches!(e, crate::infrastructure::swarm::session::SessionError::RequestTimeout) {
                    self.core.broadcast(&SseFrame::error("upstream request timed out"));
                }
            }
        }
    }

    fn process(&self, doc: &Value) {
        if doc.is_null() {
            return;
        }
        let games = extract_games(doc);
        let Some(game) = games
            .iter()
            .find(|g| get_i64(g, "id") == Some(self.game_id))
            .or_else(|| games.first())
        else {
            return;
        };

        let fingerprint = game_fingerprint(game);
        let frame = {
            let mut state = self.state.lock();
            if state.fingerprint.as_deref() == Some(&fingerprint) {
                return;
            }
            state.fingerprint = Some(fingerprint);

            let payload = GamePayload::new(self.game_id, game.clone());
            let Ok(frame) = SseFrame::named("game", &payload) else {
                return;
            };
            state.frame = Some(frame.clone());
            frame
        };

        self.core.broadcast(&frame);
        metrics::record_emission("game");
    }
}

impl FanoutGroup for GameGroup {
    fn core(&self) -> &GroupCore {
        &self.core
    }

    fn replay_frames(&self) -> Vec<SseFrame> {
        self.state.lock().frame.clone().into_iter().collect()
    }
}
