//! Outbound SSE Payload Bodies
//!
//! The JSON documents carried by the hub's named events. Field naming
//! follows the downstream UI contract (camelCase identifiers, snake_case
//! timestamps).

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::domain::markets::OddsOutcome;
use crate::domain::payload::SportCountRow;

/// Body of `live_counts` / `prematch_counts` / `counts` events.
#[derive(Debug, Clone, Serialize)]
pub struct CountsPayload {
    /// Per-sport rows.
    pub sports: Vec<SportCountEntry>,
    /// Sum of all rows.
    pub total_games: u64,
}

/// One per-sport count row.
#[derive(Debug, Clone, Serialize)]
pub struct SportCountEntry {
    /// Sport display name.
    pub name: String,
    /// Matching game count.
    pub count: u64,
}

impl CountsPayload {
    /// Build from parsed count rows.
    #[must_use]
    pub fn from_rows(rows: Vec<SportCountRow>) -> Self {
        let total_games = rows.iter().map(|r| r.count).sum();
        Self {
            sports: rows
                .into_iter()
                .map(|r| SportCountEntry { name: r.name, count: r.count })
                .collect(),
            total_games,
        }
    }
}

/// Body of `games` events.
#[derive(Debug, Clone, Serialize)]
pub struct GamesPayload {
    /// Sport the list belongs to.
    #[serde(rename = "sportId")]
    pub sport_id: i64,
    /// Sport display name.
    #[serde(rename = "sportName")]
    pub sport_name: String,
    /// The filtered game objects.
    pub data: Vec<Value>,
    /// Emission timestamp (epoch milliseconds).
    pub last_updated: i64,
}

impl GamesPayload {
    /// Build a payload stamped with the current time.
    #[must_use]
    pub fn new(sport_id: i64, sport_name: String, data: Vec<Value>) -> Self {
        Self {
            sport_id,
            sport_name,
            data,
            last_updated: Utc::now().timestamp_millis(),
        }
    }
}

/// Body of `odds` events.
#[derive(Debug, Clone, Serialize)]
pub struct OddsPayload {
    /// Sport the odds belong to.
    #[serde(rename = "sportId")]
    pub sport_id: i64,
    /// Competition scope, present only on competition streams.
    #[serde(rename = "competitionId", skip_serializing_if = "Option::is_none")]
    pub competition_id: Option<i64>,
    /// Per-game updates; only games whose odds actually changed.
    pub updates: Vec<OddsUpdateEntry>,
}

/// One game's entry in an `odds` event.
#[derive(Debug, Clone, Serialize)]
pub struct OddsUpdateEntry {
    /// Game id.
    #[serde(rename = "gameId")]
    pub game_id: i64,
    /// Main-market outcomes, or `null` when the game has no renderable
    /// main market.
    pub odds: Option<Vec<OddsOutcome>>,
    /// The game's total market count.
    pub markets_count: u64,
}

/// Body of `game` events (per-game detail stream).
#[derive(Debug, Clone, Serialize)]
pub struct GamePayload {
    /// Game id.
    #[serde(rename = "gameId")]
    pub game_id: i64,
    /// Full game document with embedded markets and events.
    pub data: Value,
    /// Emission timestamp (epoch milliseconds).
    pub last_updated: i64,
}

impl GamePayload {
    /// Build a payload stamped with the current time.
    #[must_use]
    pub fn new(game_id: i64, data: Value) -> Self {
        Self {
            game_id,
            data,
            last_updated: Utc::now().timestamp_millis(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
