//! SSE Stream Handlers
//!
//! Each handler validates its query parameters, attaches a fresh subscriber
//! to the right group (or tracker instance), and returns immediately; the
//! streaming body drains the subscriber's frame channel. When the response
//! body is dropped the channel closes, and the next write or heartbeat
//! sweep removes the subscriber from its group.

use std::collections::HashMap;
use std::convert::Infallible;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use super::SharedState;
use crate::infrastructure::broadcast::{SseClient, SseFrame};
use crate::infrastructure::groups::{GroupKey, StreamMode};

/// Build the streaming response with the SSE headers intermediaries
/// respect.
fn sse_response(rx: mpsc::Receiver<SseFrame>) -> Response {
    let stream = ReceiverStream::new(rx).map(|frame| Ok::<Bytes, Infallible>(frame.to_wire()));
    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}

/// Standard 400 body for a missing or malformed query parameter.
fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
}

fn parse_i64(query: &HashMap<String, String>, key: &str) -> Option<i64> {
    query.get(key).and_then(|value| value.parse().ok())
}

/// `GET /api/counts-stream`
pub async fn counts_stream(State(state): State<SharedState>) -> Response {
    let (client, rx) = SseClient::channel(state.client_buffer);
    state.groups.attach(GroupKey::Counts, client, None);
    sse_response(rx)
}

/// `GET /api/live-stream?sportId=&sportName=`
pub async fn live_stream(
    State(state): State<SharedState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let Some(sport_id) = parse_i64(&query, "sportId") else {
        return bad_request("sportId is required");
    };
    let sport_name = query.get("sportName").cloned();

    let (client, rx) = SseClient::channel(state.client_buffer);
    state.groups.attach(
        GroupKey::SportGames { mode: StreamMode::Live, sport_id },
        client,
        sport_name,
    );
    sse_response(rx)
}

/// `GET /api/prematch-stream?sportId=&sportName=`
pub async fn prematch_stream(
    State(state): State<SharedState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let Some(sport_id) = parse_i64(&query, "sportId") else {
        return bad_request("sportId is required");
    };
    let sport_name = query.get("sportName").cloned();

    let (client, rx) = SseClient::channel(state.client_buffer);
    state.groups.attach(
        GroupKey::SportGames { mode: StreamMode::Prematch, sport_id },
        client,
        sport_name,
    );
    sse_response(rx)
}

/// `GET /api/live-game-stream?gameId=`
pub async fn live_game_stream(
    State(state): State<SharedState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let Some(game_id) = parse_i64(&query, "gameId") else {
        return bad_request("gameId is required");
    };

    let (client, rx) = SseClient::channel(state.client_buffer);
    state.groups.attach(GroupKey::Game { game_id }, client, None);
    sse_response(rx)
}

/// `GET /api/competition-odds-stream?competitionId=&sportId=&mode=&sportName=`
pub async fn competition_odds_stream(
    State(state): State<SharedState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let Some(competition_id) = parse_i64(&query, "competitionId") else {
        return bad_request("competitionId is required");
    };
    let Some(sport_id) = parse_i64(&query, "sportId") else {
        return bad_request("sportId is required");
    };
    let Some(mode) = query.get("mode").and_then(|value| StreamMode::parse(value)) else {
        return bad_request("mode must be live or prematch");
    };
    let sport_name = query.get("sportName").cloned();

    let (client, rx) = SseClient::channel(state.client_buffer);
    state.groups.attach(
        GroupKey::CompetitionOdds { mode, sport_id, competition_id },
        client,
        sport_name,
    );
    sse_response(rx)
}

/// `GET /api/live-tracker?gameId=`
pub async fn live_tracker(
    State(state): State<SharedState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let Some(game_id) = parse_i64(&query, "gameId") else {
        return bad_request("gameId is required");
    };

    let (client, rx) = SseClient::channel(state.tracker.client_buffer());
    state.tracker.attach(game_id, client);
    sse_response(rx)
}
