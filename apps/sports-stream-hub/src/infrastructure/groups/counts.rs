//! Counts Group
//!
//! The singleton group carrying per-sport game counts. It holds two upstream
//! subscriptions (live and prematch populations) and re-issues the one-shot
//! count query on a watchdog cadence to catch feed stagnation; emissions are
//! gated by the counts fingerprint either way.
//!
//! Counts emissions serve two audiences: the group's own `/counts-stream`
//! subscribers (events `live_counts` / `prematch_counts`) and every live
//! sport stream's subscribers (events `counts` / `prematch_counts`). The
//! group is therefore kept alive while any live sport-games group exists,
//! even with zero direct subscribers.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::manager::GroupManager;
use super::payloads::CountsPayload;
use super::{FanoutGroup, GroupCore};
use crate::domain::fingerprint::counts_fingerprint;
use crate::domain::payload::parse_sport_counts;
use crate::infrastructure::broadcast::SseFrame;
use crate::infrastructure::config::GroupSettings;
use crate::infrastructure::metrics;
use crate::infrastructure::registry::SubscriptionUpdate;
use crate::infrastructure::swarm::messages::counts_params;
use crate::infrastructure::swarm::session::{SessionError, SessionEvent, SwarmSession};

#[derive(Default)]
struct CountsState {
    live: Option<CountsPayload>,
    prematch: Option<CountsPayload>,
    live_fp: Option<String>,
    prematch_fp: Option<String>,
    live_sub: Option<String>,
    prematch_sub: Option<String>,
}

/// The counts singleton group.
pub struct CountsGroup {
    core: GroupCore,
    session: Arc<SwarmSession>,
    settings: GroupSettings,
    manager: Weak<GroupManager>,
    state: Mutex<CountsState>,
    updates_tx: mpsc::UnboundedSender<SubscriptionUpdate>,
    updates_rx: Mutex<Option<mpsc::UnboundedReceiver<SubscriptionUpdate>>>,
}

impl CountsGroup {
    /// Create the group and spawn its driver task.
    #[must_use]
    pub fn spawn(core: GroupCore, manager: Weak<GroupManager>) -> Arc<Self> {
        let (session, settings) = {
            let strong = manager.upgrade().expect("manager alive during group creation");
            (Arc::clone(strong.session()), strong.settings().clone())
        };
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let group = Arc::new(Self {
            core,
            session,
            settings,
            manager,
            state: Mutex::new(CountsState::default()),
            updates_tx,
            updates_rx: Mutex::new(Some(updates_rx)),
        });
        tokio::spawn(Arc::clone(&group).run());
        group
    }

    /// The counts frames replayed on a live sport stream attach.
    #[must_use]
    pub fn replay_for_live_stream(&self) -> Vec<SseFrame> {
        let state = self.state.lock();
        let mut frames = Vec::new();
        if let Some(live) = &state.live
            && let Ok(frame) = SseFrame::named("counts", live)
        {
            frames.push(frame);
        }
        if let Some(prematch) = &state.prematch
            && let Ok(frame) = SseFrame::named("prematch_counts", prematch)
        {
            frames.push(frame);
        }
        frames
    }

    async fn run(self: Arc<Self>) {
        let mut updates_rx = self
            .updates_rx
            .lock()
            .take()
            .expect("counts driver started twice");
        let mut session_events = self.session.events();

        self.establish().await;

        let mut watchdog = tokio::time::interval(self.settings.watchdog_interval);
        watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        watchdog.tick().await; // the immediate first tick; establish just ran
        let mut heartbeat = tokio::time::interval(self.settings.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.core.cancel_token().cancelled() => break,

                Some(update) = updates_rx.recv() => self.on_update(&update),

                _ = watchdog.tick() => self.watchdog_query().await,

                _ = heartbeat.tick() => self.core.heartbeat_tick(),

                event = session_events.recv() => {
                    if let Ok(SessionEvent::Connected) = event {
                        self.establish().await;
                    }
                }
            }
        }
        tracing::debug!("counts driver stopped");
    }

    /// (Re-)establish both upstream subscriptions.
    async fn establish(&self) {
        let _ = self.core.take_subs();
        {
            let mut state = self.state.lock();
            state.live_sub = None;
            state.prematch_sub = None;
        }

        if let Err(e) = self.try_subscribe().await {
            tracing::warn!(error = %e, "counts subscriptions unavailable");
            self.core
                .broadcast(&SseFrame::error("counts feed unavailable"));
        }
    }

    async fn try_subscribe(&self) -> Result<(), SessionError> {
        self.session.ensure().await?;

        let (live_sub, live_initial) = self
            .session
            .subscribe(counts_params(true, true), self.updates_tx.clone())
            .await?;
        self.core.hold_sub(live_sub.clone());
        self.state.lock().live_sub = Some(live_sub);
        self.process(true, &live_initial);

        let (prematch_sub, prematch_initial) = self
            .session
            .subscribe(counts_params(false, true), self.updates_tx.clone())
            .await?;
        self.core.hold_sub(prematch_sub.clone());
        self.state.lock().prematch_sub = Some(prematch_sub);
        self.process(false, &prematch_initial);

        Ok(())
    }

    fn on_update(&self, update: &SubscriptionUpdate) {
        let is_live = {
            let state = self.state.lock();
            if state.live_sub.as_deref() == Some(&update.sub_id) {
                Some(true)
            } else if state.prematch_sub.as_deref() == Some(&update.sub_id) {
                Some(false)
            } else {
                None
            }
        };
        if let Some(is_live) = is_live {
            self.process(is_live, &update.state);
        }
    }

    /// One-shot re-query both populations; detects feed stagnation that a
    /// dead subscription would otherwise hide.
    async fn watchdog_query(&self) {
        for live in [true, false] {
            match self
                .session
                .request_snapshot("get", counts_params(live, false))
                .await
            {
                Ok(doc) => self.process(live, &doc),
                Err(e) => {
                    tracing::debug!(live, error = %e, "counts watchdog query failed");
                    if matches!(e, SessionError::RequestTimeout) {
                        self.core.broadcast(&SseFrame::error("upstream request timed out"));
                    }
                }
            }
        }
    }

    fn process(&self, live: bool, doc: &Value) {
        if doc.is_null() {
            return;
        }
        let rows = parse_sport_counts(doc);
        let fingerprint = counts_fingerprint(&rows);
        let payload = CountsPayload::from_rows(rows);

        {
            let mut state = self.state.lock();
            let slot = if live { &mut state.live_fp } else { &mut state.prematch_fp };
            if slot.as_deref() == Some(&fingerprint) {
                return;
            }
            *slot = Some(fingerprint);
            if live {
                state.live = Some(payload.clone());
            } else {
                state.prematch = Some(payload.clone());
            }
        }

        let own_event = if live { "live_counts" } else { "prematch_counts" };
        if let Ok(frame) = SseFrame::named(own_event, &payload) {
            self.core.broadcast(&frame);
        }

        // Back-edge: counts fan out to live sport streams, one-way.
        let shared_event = if live { "counts" } else { "prematch_counts" };
        if let Some(manager) = self.manager.upgrade()
            && let Ok(frame) = SseFrame::named(shared_event, &payload)
        {
            manager.broadcast_to_live_sport_groups(&frame);
        }

        metrics::record_emission("counts");
    }
}

impl FanoutGroup for CountsGroup {
    fn core(&self) -> &GroupCore {
        &self.core
    }

    fn replay_frames(&self) -> Vec<SseFrame> {
        let state = self.state.lock();
        let mut frames = Vec::new();
        if let Some(live) = &state.live
            && let Ok(frame) = SseFrame::named("live_counts", live)
        {
            frames.push(frame);
        }
        if let Some(prematch) = &state.prematch
            && let Ok(frame) = SseFrame::named("prematch_counts", prematch)
        {
            frames.push(frame);
        }
        frames
    }
}
