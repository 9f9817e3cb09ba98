//! JSON Endpoints
//!
//! Health, hierarchy, Prometheus metrics, and the read-only results
//! pass-throughs. Results endpoints forward the upstream reply wholesale;
//! the hub adds only the response envelope.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde_json::{Value, json};

use super::SharedState;
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::swarm::messages;
use crate::infrastructure::swarm::session::SessionError;

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
}

fn internal_error(error: &SessionError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": error.to_string()})),
    )
        .into_response()
}

/// `GET /api/health`
pub async fn health(State(state): State<SharedState>) -> Response {
    let swarm = state.session.health();
    let session_established = state.session.session_token().is_some();
    let rollups = state.aggregator.rollups();
    let edge = state.tracker.stats();

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "swarm_ws": {
            "connected": swarm.connected,
            "session": session_established,
            "total_messages": swarm.total_messages,
            "parse_errors": swarm.parse_errors,
            "messages_last_minute": swarm.messages_last_minute,
        },
        "live_tracker": {
            "instances": edge.instances,
            "subscribers": edge.subscribers,
            "active_games": rollups.active_games,
            "active_subscribers": rollups.active_subscribers,
            "connected_games": rollups.connected_games,
            "messages_last_minute": rollups.messages_last_minute,
        },
        "groups": state.groups.stats(),
    }))
    .into_response()
}

/// `GET /api/hierarchy?refresh=true`
pub async fn hierarchy(
    State(state): State<SharedState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let refresh = query.get("refresh").is_some_and(|value| value == "true");
    match state.hierarchy.document(refresh).await {
        Ok((data, cached)) => Json(json!({"data": data, "cached": cached})).into_response(),
        Err(e) => internal_error(&e),
    }
}

/// `GET /metrics` in Prometheus exposition format.
pub async fn metrics_handler() -> Response {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
                .into_response()
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
                .into_response()
        },
    )
}

// =============================================================================
// Results Pass-Throughs
// =============================================================================

fn parse_range(query: &HashMap<String, String>) -> (Option<i64>, Option<i64>) {
    let from = query.get("from").and_then(|value| value.parse().ok());
    let to = query.get("to").and_then(|value| value.parse().ok());
    (from, to)
}

/// `GET /api/results/competitions?from=&to=`
pub async fn results_competitions(
    State(state): State<SharedState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let (from, to) = parse_range(&query);
    match state
        .session
        .request_default(
            "get_result_competitions",
            messages::results_competitions_params(from, to),
        )
        .await
    {
        Ok(data) => Json(json!({
            "success": true,
            "data": data,
            "timestamp": Utc::now().timestamp_millis(),
        }))
        .into_response(),
        Err(e) => internal_error(&e),
    }
}

/// `GET /api/results/games/{sportId}?from=&to=`
pub async fn results_games(
    State(state): State<SharedState>,
    Path(sport_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let Ok(sport_id) = sport_id.parse::<i64>() else {
        return bad_request("sportId must be numeric");
    };
    let (from, to) = parse_range(&query);

    match state
        .session
        .request_default("get_results", messages::results_games_params(sport_id, from, to))
        .await
    {
        Ok(data) => {
            let games = extract_result_games(&data);
            Json(json!({
                "success": true,
                "sportId": sport_id,
                "count": games.len(),
                "games": games,
                "timestamp": Utc::now().timestamp_millis(),
            }))
            .into_response()
        }
        Err(e) => internal_error(&e),
    }
}

/// `GET /api/results/game/{gameId}`
pub async fn results_game(
    State(state): State<SharedState>,
    Path(game_id): Path<String>,
) -> Response {
    let Ok(game_id) = game_id.parse::<i64>() else {
        return bad_request("gameId must be numeric");
    };

    match state
        .session
        .request_default("get_game_result", messages::results_game_params(game_id))
        .await
    {
        Ok(data) => {
            let settlements = data
                .get("settlements")
                .or_else(|| data.get("events"))
                .cloned()
                .unwrap_or(Value::Null);
            Json(json!({
                "success": true,
                "gameId": game_id,
                "settlements": settlements,
                "raw": data,
                "timestamp": Utc::now().timestamp_millis(),
            }))
            .into_response()
        }
        Err(e) => internal_error(&e),
    }
}

/// The results reply nests its list under `games` or returns it bare.
fn extract_result_games(data: &Value) -> Vec<Value> {
    match data {
        Value::Array(items) => items.clone(),
        Value::Object(obj) => obj
            .get("games")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_games_from_bare_array() {
        let data = json!([{"id": 1}, {"id": 2}]);
        assert_eq!(extract_result_games(&data).len(), 2);
    }

    #[test]
    fn result_games_from_wrapped_object() {
        let data = json!({"games": [{"id": 1}]});
        assert_eq!(extract_result_games(&data).len(), 1);
    }

    #[test]
    fn result_games_tolerates_other_shapes() {
        assert!(extract_result_games(&json!(null)).is_empty());
        assert!(extract_result_games(&json!({"other": 1})).is_empty());
    }
}
