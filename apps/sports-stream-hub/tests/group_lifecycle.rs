//! Group Lifecycle Integration Tests
//!
//! Exercises the manager directly: group creation on attach, the attach
//! preamble, grace-period teardown after the last subscriber leaves, rejoin
//! cancelling the grace timer, and the counts keep-alive rule.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use sports_stream_hub::infrastructure::config::{
    GroupSettings, SwarmSettings, TimeoutSettings, WebSocketSettings,
};
use sports_stream_hub::{
    FileStore, GroupKey, GroupManager, HierarchyCache, SseClient, SseFrame, StreamMode,
    SubscriptionRegistry, SwarmSession,
};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Cadences short enough to observe sweep + grace inside a test.
const HEARTBEAT: Duration = Duration::from_millis(40);
const GRACE: Duration = Duration::from_millis(150);

async fn test_manager() -> (Arc<GroupManager>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();

    let storage = Arc::new(FileStore::open(dir.path()).await.unwrap());
    let registry = Arc::new(SubscriptionRegistry::new());
    let session = Arc::new(SwarmSession::new(
        SwarmSettings {
            // Unroutable: subscribe attempts fail fast, groups run on their
            // local timers only.
            url: "ws://127.0.0.1:1/".to_string(),
            ..SwarmSettings::default()
        },
        WebSocketSettings::default(),
        TimeoutSettings {
            connect: Duration::from_millis(80),
            ..TimeoutSettings::default()
        },
        registry,
        cancel.clone(),
    ));
    let hierarchy = Arc::new(HierarchyCache::new(Arc::clone(&session), Arc::clone(&storage)));

    let manager = Arc::new(GroupManager::new(
        session,
        hierarchy,
        GroupSettings {
            grace: GRACE,
            heartbeat_interval: HEARTBEAT,
            ..GroupSettings::default()
        },
        cancel,
    ));
    tokio::spawn(Arc::clone(&manager).run_janitor());

    (manager, dir)
}

async fn expect_frame(rx: &mut tokio::sync::mpsc::Receiver<SseFrame>) -> SseFrame {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("channel closed")
}

// =============================================================================
// Attach & Replay
// =============================================================================

#[tokio::test]
async fn attach_creates_group_and_sends_preamble() {
    let (manager, _dir) = test_manager().await;
    let key = GroupKey::Game { game_id: 42 };

    let (client, mut rx) = SseClient::channel(64);
    manager.attach(key, client, None);

    assert!(manager.contains(key));
    assert_eq!(manager.stats().subscribers, 1);

    // Padding comment first, then the ready marker, before anything live.
    let padding = expect_frame(&mut rx).await;
    assert!(matches!(&padding, SseFrame::Comment(text) if text.len() >= 2048));
    let ready = expect_frame(&mut rx).await;
    assert_eq!(ready, SseFrame::Comment("ready".to_string()));
}

#[tokio::test]
async fn duplicate_attach_shares_one_group() {
    let (manager, _dir) = test_manager().await;
    let key = GroupKey::SportGames { mode: StreamMode::Prematch, sport_id: 7 };

    let (c1, _rx1) = SseClient::channel(64);
    let (c2, _rx2) = SseClient::channel(64);
    manager.attach(key, c1, None);
    manager.attach(key, c2, None);

    let stats = manager.stats();
    // One prematch group; both subscribers share it.
    assert!(manager.contains(key));
    assert_eq!(stats.subscribers, 2);
}

// =============================================================================
// Grace & Teardown
// =============================================================================

#[tokio::test]
async fn group_removed_after_grace_when_last_subscriber_leaves() {
    let (manager, _dir) = test_manager().await;
    let key = GroupKey::Game { game_id: 100 };

    let (client, rx) = SseClient::channel(64);
    manager.attach(key, client, None);
    assert!(manager.contains(key));

    // Dropping the receiver kills the subscriber; the heartbeat sweep
    // notices, the janitor arms grace, and the group goes away.
    drop(rx);
    tokio::time::sleep(HEARTBEAT * 3 + GRACE * 2).await;

    assert!(!manager.contains(key), "group survived past grace");
    assert_eq!(manager.stats().groups, 0);
}

#[tokio::test]
async fn rejoin_during_grace_cancels_teardown() {
    let (manager, _dir) = test_manager().await;
    let key = GroupKey::Game { game_id: 200 };

    let (c1, rx1) = SseClient::channel(64);
    manager.attach(key, c1, None);
    drop(rx1);

    // Let the sweep notice the empty set and arm the grace timer.
    tokio::time::sleep(HEARTBEAT * 3).await;

    // Rejoin before grace expires.
    let (c2, _rx2) = SseClient::channel(64);
    manager.attach(key, c2, None);

    tokio::time::sleep(GRACE * 3).await;
    assert!(manager.contains(key), "rejoin did not cancel the grace timer");
}

#[tokio::test]
async fn counts_created_with_live_sport_group_and_outlives_it_until_grace() {
    let (manager, _dir) = test_manager().await;
    let live_key = GroupKey::SportGames { mode: StreamMode::Live, sport_id: 1 };

    let (client, rx) = SseClient::channel(64);
    manager.attach(live_key, client, None);

    // The counts singleton rides along with live sport streams.
    assert!(manager.contains(GroupKey::Counts));

    // Last live subscriber leaves: the sport group drains first, then the
    // stranded counts singleton gets its own grace window.
    drop(rx);
    tokio::time::sleep(HEARTBEAT * 3 + GRACE * 2).await;
    assert!(!manager.contains(live_key));

    tokio::time::sleep(GRACE * 3).await;
    assert!(
        !manager.contains(GroupKey::Counts),
        "counts group not cleaned up after live sport groups left"
    );
}

#[tokio::test]
async fn counts_with_own_subscriber_survives_sport_group_teardown() {
    let (manager, _dir) = test_manager().await;
    let live_key = GroupKey::SportGames { mode: StreamMode::Live, sport_id: 1 };

    let (counts_client, _counts_rx) = SseClient::channel(64);
    manager.attach(GroupKey::Counts, counts_client, None);

    let (live_client, live_rx) = SseClient::channel(64);
    manager.attach(live_key, live_client, None);

    drop(live_rx);
    tokio::time::sleep(HEARTBEAT * 3 + GRACE * 3).await;

    assert!(!manager.contains(live_key));
    assert!(
        manager.contains(GroupKey::Counts),
        "counts group with a direct subscriber must survive"
    );
}

// =============================================================================
// Write Isolation
// =============================================================================

#[tokio::test]
async fn dead_subscriber_does_not_disturb_survivors() {
    let (manager, _dir) = test_manager().await;
    let key = GroupKey::Counts;

    let (dead, dead_rx) = SseClient::channel(64);
    let (alive, mut alive_rx) = SseClient::channel(64);
    manager.attach(key, dead, None);
    manager.attach(key, alive, None);
    drop(dead_rx);

    // Survivor keeps receiving heartbeats after the dead peer is swept.
    let mut heartbeats = 0;
    for _ in 0..40 {
        let frame = expect_frame(&mut alive_rx).await;
        if frame == SseFrame::Comment("hb".to_string()) {
            heartbeats += 1;
            if heartbeats >= 3 {
                break;
            }
        }
    }
    assert!(heartbeats >= 3);
    assert_eq!(manager.stats().subscribers, 1);
    assert!(manager.contains(key));
}
