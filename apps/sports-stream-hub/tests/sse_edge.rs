//! SSE Edge Integration Tests
//!
//! Drives the public router: query validation, SSE headers, the attach
//! preamble (padding then `ready`), liveness comments, CORS.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode, header};
use futures_util::StreamExt;
use sports_stream_hub::infrastructure::config::{
    GroupSettings, SwarmSettings, TimeoutSettings, WebSocketSettings,
};
use sports_stream_hub::{
    AppState, FileStore, GroupManager, HierarchyCache, MetricsAggregator, SubscriptionRegistry,
    SwarmSession, TrackerManager, router,
};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;

/// Fast-cadence settings so lifecycle behavior is observable in tests.
fn fast_group_settings() -> GroupSettings {
    GroupSettings {
        grace: Duration::from_millis(150),
        heartbeat_interval: Duration::from_millis(50),
        ..GroupSettings::default()
    }
}

async fn test_router() -> (Router, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();

    let storage = Arc::new(FileStore::open(dir.path()).await.unwrap());
    let registry = Arc::new(SubscriptionRegistry::new());
    let session = Arc::new(SwarmSession::new(
        SwarmSettings {
            // Unroutable: connection attempts fail fast.
            url: "ws://127.0.0.1:1/".to_string(),
            ..SwarmSettings::default()
        },
        WebSocketSettings::default(),
        TimeoutSettings {
            connect: Duration::from_millis(100),
            ..TimeoutSettings::default()
        },
        registry,
        cancel.clone(),
    ));
    let hierarchy = Arc::new(HierarchyCache::new(Arc::clone(&session), Arc::clone(&storage)));
    let aggregator = Arc::new(MetricsAggregator::new(Arc::clone(&storage)));
    let groups = Arc::new(GroupManager::new(
        Arc::clone(&session),
        Arc::clone(&hierarchy),
        fast_group_settings(),
        cancel.clone(),
    ));
    tokio::spawn(Arc::clone(&groups).run_janitor());
    let tracker = Arc::new(TrackerManager::new(
        sports_stream_hub::infrastructure::config::TrackerSettings {
            url: "ws://127.0.0.1:1/".to_string(),
            ..Default::default()
        },
        WebSocketSettings::default(),
        Arc::clone(&aggregator),
        64,
        cancel.clone(),
    ));

    let state = Arc::new(AppState {
        session,
        groups,
        tracker,
        hierarchy,
        aggregator,
        client_buffer: 64,
        started_at: Instant::now(),
    });

    (router(state), dir)
}

async fn collect_body(body: Body) -> String {
    let mut stream = body.into_data_stream();
    let mut collected = Vec::new();
    while let Ok(Some(chunk)) = timeout(Duration::from_secs(1), stream.next()).await {
        collected.extend_from_slice(&chunk.unwrap());
    }
    String::from_utf8(collected).unwrap()
}

async fn next_chunk(
    stream: &mut (impl futures_util::Stream<Item = Result<Bytes, axum::Error>> + Unpin),
) -> String {
    let chunk = timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("timed out waiting for SSE frame")
        .expect("stream ended")
        .expect("stream error");
    String::from_utf8(chunk.to_vec()).unwrap()
}

// =============================================================================
// Query Validation
// =============================================================================

#[tokio::test]
async fn live_stream_requires_sport_id() {
    let (router, _dir) = test_router().await;

    let response = router
        .oneshot(Request::get("/api/live-stream").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = collect_body(response.into_body()).await;
    assert!(body.contains("sportId"));
}

#[tokio::test]
async fn competition_stream_validates_mode() {
    let (router, _dir) = test_router().await;

    let response = router
        .oneshot(
            Request::get("/api/competition-odds-stream?competitionId=9&sportId=1&mode=bogus")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = collect_body(response.into_body()).await;
    assert!(body.contains("mode"));
}

#[tokio::test]
async fn game_stream_requires_game_id() {
    let (router, _dir) = test_router().await;

    let response = router
        .oneshot(
            Request::get("/api/live-game-stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// SSE Contract
// =============================================================================

#[tokio::test]
async fn counts_stream_sends_headers_and_preamble() {
    let (router, _dir) = test_router().await;

    let response = router
        .oneshot(
            Request::get("/api/counts-stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache, no-transform");
    assert_eq!(headers["x-accel-buffering"], "no");

    let mut stream = response.into_body().into_data_stream();

    // Padding first (large comment), then the ready marker.
    let padding = next_chunk(&mut stream).await;
    assert!(padding.starts_with(": "));
    assert!(padding.len() >= 2048);

    let ready = next_chunk(&mut stream).await;
    assert_eq!(ready, ": ready\n\n");
}

#[tokio::test]
async fn live_stream_emits_heartbeat_comments() {
    let (router, _dir) = test_router().await;

    let response = router
        .oneshot(
            Request::get("/api/live-stream?sportId=1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut stream = response.into_body().into_data_stream();

    // Skip the attach preamble, then expect a liveness comment within a
    // couple of heartbeat intervals (upstream is down, so nothing else
    // regular flows).
    let mut saw_heartbeat = false;
    for _ in 0..20 {
        let chunk = next_chunk(&mut stream).await;
        if chunk == ": hb\n\n" {
            saw_heartbeat = true;
            break;
        }
    }
    assert!(saw_heartbeat, "no heartbeat comment observed");
}

#[tokio::test]
async fn second_subscriber_unaffected_by_first_disconnecting() {
    let (router, _dir) = test_router().await;

    let first = router
        .clone()
        .oneshot(
            Request::get("/api/counts-stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let second = router
        .oneshot(
            Request::get("/api/counts-stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Drop the first subscriber's body entirely.
    drop(first);

    let mut stream = second.into_body().into_data_stream();
    let mut comments = 0;
    for _ in 0..30 {
        let chunk = next_chunk(&mut stream).await;
        if chunk.starts_with(": hb") {
            comments += 1;
            if comments >= 2 {
                break;
            }
        }
    }
    assert!(comments >= 2, "surviving subscriber stopped receiving frames");
}

// =============================================================================
// JSON & CORS
// =============================================================================

#[tokio::test]
async fn health_reports_ok() {
    let (router, _dir) = test_router().await;

    let response = router
        .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = collect_body(response.into_body()).await;
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed["status"], "ok");
    assert_eq!(parsed["swarm_ws"]["connected"], false);
    assert!(parsed["live_tracker"].is_object());
}

#[tokio::test]
async fn cors_preflight_for_allowed_origin() {
    let (router, _dir) = test_router().await;

    let response = router
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/counts-stream")
                .header(header::ORIGIN, "https://dob-edge.pages.dev")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let headers = response.headers();
    assert_eq!(
        headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://dob-edge.pages.dev"
    );
    let methods = headers[header::ACCESS_CONTROL_ALLOW_METHODS]
        .to_str()
        .unwrap();
    assert!(methods.contains("GET"));
    assert_eq!(headers[header::ACCESS_CONTROL_MAX_AGE], "86400");
    let vary = headers
        .get_all(header::VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join(", ");
    assert!(vary.to_lowercase().contains("origin"));
}

#[tokio::test]
async fn cors_preflight_for_foreign_origin_carries_no_allowance() {
    let (router, _dir) = test_router().await;

    let response = router
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/counts-stream")
                .header(header::ORIGIN, "https://evil.example.com")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none()
    );
}
