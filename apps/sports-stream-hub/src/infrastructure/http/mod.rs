//! HTTP/SSE Edge
//!
//! The axum router over `/api/*`: JSON endpoints (health, hierarchy,
//! results pass-throughs), the SSE stream endpoints, and the CORS policy
//! for the static UI's origins.

pub mod api;
pub mod sse;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::Request;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::infrastructure::groups::GroupManager;
use crate::infrastructure::hierarchy::HierarchyCache;
use crate::infrastructure::stats::MetricsAggregator;
use crate::infrastructure::swarm::session::SwarmSession;
use crate::infrastructure::tracker::TrackerManager;

/// Preflight cache lifetime.
const CORS_MAX_AGE: Duration = Duration::from_secs(86_400);

/// Shared state handed to every handler.
pub struct AppState {
    /// The upstream swarm session.
    pub session: Arc<SwarmSession>,
    /// The fan-out group table.
    pub groups: Arc<GroupManager>,
    /// The live-tracker registry.
    pub tracker: Arc<TrackerManager>,
    /// The taxonomy cache.
    pub hierarchy: Arc<HierarchyCache>,
    /// The tracker metrics aggregator.
    pub aggregator: Arc<MetricsAggregator>,
    /// Per-subscriber frame buffer size.
    pub client_buffer: usize,
    /// Process start, for uptime reporting.
    pub started_at: Instant,
}

/// Shared state reference.
pub type SharedState = Arc<AppState>;

/// Build the edge router.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/health", get(api::health))
        .route("/api/hierarchy", get(api::hierarchy))
        .route("/api/counts-stream", get(sse::counts_stream))
        .route("/api/live-stream", get(sse::live_stream))
        .route("/api/prematch-stream", get(sse::prematch_stream))
        .route("/api/live-game-stream", get(sse::live_game_stream))
        .route("/api/competition-odds-stream", get(sse::competition_odds_stream))
        .route("/api/live-tracker", get(sse::live_tracker))
        .route("/api/results/competitions", get(api::results_competitions))
        .route("/api/results/games/{sport_id}", get(api::results_games))
        .route("/api/results/game/{game_id}", get(api::results_game))
        .route("/metrics", get(api::metrics_handler))
        .layer(cors_layer())
        .layer(middleware::from_fn(preflight_no_content))
        .with_state(state)
}

/// Downgrade successful CORS preflights to `204 No Content`.
async fn preflight_no_content(request: Request, next: Next) -> Response {
    let is_preflight = request.method() == Method::OPTIONS
        && request.headers().contains_key(header::ORIGIN)
        && request
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);
    let mut response = next.run(request).await;
    if is_preflight && response.status() == StatusCode::OK {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

/// CORS for the UI origins: `dob-edge*.pages.dev` over HTTPS only.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin, _| origin_allowed(origin)))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(CORS_MAX_AGE)
}

fn origin_allowed(origin: &HeaderValue) -> bool {
    let Ok(origin) = origin.to_str() else {
        return false;
    };
    let Some(host) = origin.strip_prefix("https://") else {
        return false;
    };
    host.starts_with("dob-edge") && host.ends_with(".pages.dev") && !host.contains('/')
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed(origin: &str) -> bool {
        origin_allowed(&HeaderValue::from_str(origin).unwrap())
    }

    #[test]
    fn production_origins_allowed() {
        assert!(allowed("https://dob-edge.pages.dev"));
        assert!(allowed("https://dob-edge-preview.pages.dev"));
        assert!(allowed("https://dob-edge-abc123.pages.dev"));
    }

    #[test]
    fn foreign_origins_rejected() {
        assert!(!allowed("https://evil.pages.dev"));
        assert!(!allowed("https://dob-edge.example.com"));
        assert!(!allowed("http://dob-edge.pages.dev"));
        assert!(!allowed("https://dob-edge.pages.dev.evil.com"));
        assert!(!allowed("https://dob-edge.pages.dev/path"));
    }
}
