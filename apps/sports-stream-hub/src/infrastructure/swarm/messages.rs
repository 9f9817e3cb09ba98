//! Swarm Command Envelopes & Query Builders
//!
//! Every outbound frame is a `command` + `params` pair tagged with a
//! correlation id (`rid`). The builders below produce the `params` documents
//! for the queries the hub issues; keeping them in one place keeps the field
//! lists (what/where shapes) consistent between the subscribing and the
//! one-shot variants of the same query.

use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};

/// Game fields requested for list renderings.
const GAME_LIST_FIELDS: &[&str] = &[
    "id",
    "type",
    "start_ts",
    "team1_name",
    "team2_name",
    "is_blocked",
    "info",
    "text_info",
    "markets_count",
    "is_live",
    "show_type",
    "last_event",
    "visible_in_prematch",
    "sport_id",
    "competition_id",
    "region_id",
];

/// Market fields requested for odds queries.
const MARKET_FIELDS: &[&str] = &[
    "id",
    "type",
    "market_type",
    "display_key",
    "name",
    "order",
    "is_blocked",
];

/// Event fields requested for odds queries.
const EVENT_FIELDS: &[&str] = &["id", "price", "base", "order", "type", "name", "is_blocked"];

/// How far ahead of kickoff the featured-odds window reaches.
const FEATURED_WINDOW_SECS: i64 = 3 * 3600;

// =============================================================================
// Command Envelope
// =============================================================================

/// One outbound frame: command, params and correlation id.
#[derive(Debug, Clone, Serialize)]
pub struct CommandFrame {
    /// Command verb.
    pub command: String,
    /// Command parameters.
    pub params: Value,
    /// Correlation id; echoes back on the reply. `"0"` is reserved for
    /// server-initiated deltas and never assigned to a request.
    pub rid: String,
}

impl CommandFrame {
    /// Build a frame with the given correlation id.
    #[must_use]
    pub fn new(command: impl Into<String>, params: Value, rid: u64) -> Self {
        Self {
            command: command.into(),
            params,
            rid: rid.to_string(),
        }
    }

    /// Serialize the frame to its wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Session
// =============================================================================

/// Params for the `request_session` handshake.
#[must_use]
pub fn session_params(site_id: u64, language: &str) -> Value {
    json!({
        "site_id": site_id,
        "language": language,
    })
}

// =============================================================================
// Counts
// =============================================================================

/// Params for a per-sport game-count query.
///
/// `live` selects in-play games; otherwise the prematch population is
/// counted. `subscribe` turns the query into a standing subscription.
#[must_use]
pub fn counts_params(live: bool, subscribe: bool) -> Value {
    let game_filter = if live {
        json!({"type": 1})
    } else {
        json!({"type": {"@in": [0, 2]}})
    };
    json!({
        "source": "betting",
        "what": {
            "sport": ["id", "name", "alias", "order"],
            "game": "@count",
        },
        "where": {"game": game_filter},
        "subscribe": subscribe,
    })
}

// =============================================================================
// Sport Games
// =============================================================================

/// Params for a sport's game list.
#[must_use]
pub fn sport_games_params(sport_id: i64, live: bool, subscribe: bool) -> Value {
    let game_filter = if live {
        json!({"type": 1})
    } else {
        json!({"type": {"@in": [0, 2]}})
    };
    json!({
        "source": "betting",
        "what": {
            "sport": ["id", "name", "alias"],
            "region": ["id", "name"],
            "competition": ["id", "name", "order"],
            "game": GAME_LIST_FIELDS,
        },
        "where": {
            "sport": {"id": sport_id},
            "game": game_filter,
        },
        "subscribe": subscribe,
    })
}

// =============================================================================
// Odds
// =============================================================================

fn odds_what() -> Value {
    json!({
        "game": ["id", "markets_count"],
        "market": MARKET_FIELDS,
        "event": EVENT_FIELDS,
    })
}

/// Params for a sport's live odds, filtered to the main market types.
#[must_use]
pub fn sport_odds_params(sport_id: i64, market_types: &[String], subscribe: bool) -> Value {
    json!({
        "source": "betting",
        "what": odds_what(),
        "where": {
            "sport": {"id": sport_id},
            "game": {"type": 1},
            "market": {"type": {"@in": market_types}},
        },
        "subscribe": subscribe,
    })
}

/// Params for a one-shot odds query over an explicit set of game ids.
#[must_use]
pub fn games_odds_params(game_ids: &[i64], market_types: &[String]) -> Value {
    json!({
        "source": "betting",
        "what": odds_what(),
        "where": {
            "game": {"id": {"@in": game_ids}},
            "market": {"type": {"@in": market_types}},
        },
        "subscribe": false,
    })
}

/// Params for the featured-odds subscription covering near-kickoff games of
/// one sport.
#[must_use]
pub fn featured_odds_params(sport_id: i64, market_types: &[String]) -> Value {
    let horizon = Utc::now().timestamp() + FEATURED_WINDOW_SECS;
    json!({
        "source": "betting",
        "what": odds_what(),
        "where": {
            "sport": {"id": sport_id},
            "game": {
                "type": {"@in": [0, 2]},
                "start_ts": {"@lt": horizon},
            },
            "market": {"type": {"@in": market_types}},
        },
        "subscribe": true,
    })
}

/// Params for a competition's current game id listing, used to drive the
/// staleness cursor of prematch competition odds.
#[must_use]
pub fn competition_games_params(competition_id: i64, live: bool) -> Value {
    let game_filter = if live {
        json!({"type": 1})
    } else {
        json!({"type": {"@in": [0, 2]}})
    };
    json!({
        "source": "betting",
        "what": {"game": ["id"]},
        "where": {
            "competition": {"id": competition_id},
            "game": game_filter,
        },
        "subscribe": false,
    })
}

/// Params for a competition-scoped odds query.
#[must_use]
pub fn competition_odds_params(
    competition_id: i64,
    live: bool,
    market_types: &[String],
    subscribe: bool,
) -> Value {
    let game_filter = if live {
        json!({"type": 1})
    } else {
        json!({"type": {"@in": [0, 2]}})
    };
    json!({
        "source": "betting",
        "what": odds_what(),
        "where": {
            "competition": {"id": competition_id},
            "game": game_filter,
            "market": {"type": {"@in": market_types}},
        },
        "subscribe": subscribe,
    })
}

// =============================================================================
// Per-Game Detail
// =============================================================================

/// Params for one game's full detail (fields, markets, events).
#[must_use]
pub fn game_details_params(game_id: i64, subscribe: bool) -> Value {
    json!({
        "source": "betting",
        "what": {
            "game": [],
            "market": [],
            "event": [],
        },
        "where": {"game": {"id": game_id}},
        "subscribe": subscribe,
    })
}

// =============================================================================
// Taxonomy & Priorities
// =============================================================================

/// Params for the sport/region/competition taxonomy document.
#[must_use]
pub fn hierarchy_params() -> Value {
    json!({
        "source": "betting",
        "what": {
            "sport": ["id", "name", "alias", "order"],
            "region": ["id", "name", "alias"],
            "competition": ["id", "name", "order"],
        },
        "where": {},
        "subscribe": false,
    })
}

/// Params for a sport's dynamic market-type priority list.
#[must_use]
pub fn market_priority_params(sport_id: i64) -> Value {
    json!({"sport_id": sport_id})
}

// =============================================================================
// Results (thin pass-throughs)
// =============================================================================

/// Params for the competitions-with-results listing.
#[must_use]
pub fn results_competitions_params(from_ts: Option<i64>, to_ts: Option<i64>) -> Value {
    json!({
        "from_date": from_ts,
        "to_date": to_ts,
    })
}

/// Params for finished games of one sport.
#[must_use]
pub fn results_games_params(sport_id: i64, from_ts: Option<i64>, to_ts: Option<i64>) -> Value {
    json!({
        "sport_id": sport_id,
        "from_date": from_ts,
        "to_date": to_ts,
        "is_date_range": true,
    })
}

/// Params for one game's settlement detail.
#[must_use]
pub fn results_game_params(game_id: i64) -> Value {
    json!({"game_id": game_id})
}

/// Params for cancelling a subscription.
#[must_use]
pub fn unsubscribe_params(sub_id: &str) -> Value {
    json!({"subid": sub_id})
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_serializes_with_string_rid() {
        let frame = CommandFrame::new("get", json!({"a": 1}), 7);
        let wire = frame.to_json().unwrap();
        assert!(wire.contains(r#""rid":"7""#));
        assert!(wire.contains(r#""command":"get""#));
    }

    #[test]
    fn counts_params_distinguish_modes() {
        let live = counts_params(true, true);
        let prematch = counts_params(false, false);
        assert_eq!(live["where"]["game"]["type"], json!(1));
        assert_eq!(prematch["where"]["game"]["type"], json!({"@in": [0, 2]}));
        assert_eq!(live["subscribe"], json!(true));
        assert_eq!(prematch["subscribe"], json!(false));
        assert_eq!(live["what"]["game"], json!("@count"));
    }

    #[test]
    fn sport_games_params_scope_by_sport() {
        let params = sport_games_params(42, true, true);
        assert_eq!(params["where"]["sport"]["id"], json!(42));
        assert!(params["what"]["game"].as_array().unwrap().len() > 5);
    }

    #[test]
    fn odds_params_filter_market_types() {
        let types = vec!["P1XP2".to_string(), "1X2".to_string()];
        let params = sport_odds_params(1, &types, true);
        assert_eq!(
            params["where"]["market"]["type"]["@in"],
            json!(["P1XP2", "1X2"])
        );
    }

    #[test]
    fn games_odds_params_list_ids() {
        let params = games_odds_params(&[1, 2, 3], &["P1P2".to_string()]);
        assert_eq!(params["where"]["game"]["id"]["@in"], json!([1, 2, 3]));
        assert_eq!(params["subscribe"], json!(false));
    }

    #[test]
    fn competition_games_params_request_ids_only() {
        let params = competition_games_params(9, false);
        assert_eq!(params["what"]["game"], json!(["id"]));
        assert_eq!(params["where"]["competition"]["id"], json!(9));
        assert_eq!(params["where"]["game"]["type"], json!({"@in": [0, 2]}));
        assert_eq!(params["subscribe"], json!(false));
    }

    #[test]
    fn game_details_request_all_fields() {
        let params = game_details_params(99, true);
        assert_eq!(params["what"]["game"], json!([]));
        assert_eq!(params["where"]["game"]["id"], json!(99));
    }

    #[test]
    fn featured_window_is_bounded() {
        let params = featured_odds_params(1, &["P1XP2".to_string()]);
        let horizon = params["where"]["game"]["start_ts"]["@lt"].as_i64().unwrap();
        assert!(horizon > Utc::now().timestamp());
        assert!(horizon <= Utc::now().timestamp() + FEATURED_WINDOW_SECS + 1);
    }
}
