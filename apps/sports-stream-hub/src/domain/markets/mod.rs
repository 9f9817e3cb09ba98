//! Main-Market Selection & Odds Rows
//!
//! Downstream lists show one headline market per game (the "main" market:
//! match winner or the two/three-way equivalent). Which market type counts as
//! main is sport-specific, and the feed can additionally publish a per-sport
//! priority list; the static fallbacks below are always appended so a missing
//! or empty dynamic list degrades gracefully.

use serde::Serialize;
use serde_json::Value;

use crate::domain::payload::{get_i64, get_str};

/// Main-market priority for football-like sports.
const FOOTBALL_PRIORITY: &[&str] = &["P1XP2", "W1XW2", "1X2", "MATCH_RESULT", "MATCHRESULT"];

/// Main-market priority for everything else (two-way sports first).
const DEFAULT_PRIORITY: &[&str] = &["P1P2", "P1XP2", "W1W2", "W1XW2"];

/// Whether a sport takes the three-way football priority list.
#[must_use]
pub fn is_football_like(sport_name: &str) -> bool {
    let name = sport_name.to_lowercase();
    name.contains("football") || name.contains("soccer")
}

/// Build the effective market-type priority for a sport.
///
/// A dynamically fetched list (possibly empty) is prepended; the static list
/// is always appended. Duplicates keep their first position.
#[must_use]
pub fn merge_priority(dynamic: &[String], football_like: bool) -> Vec<String> {
    let fallback = if football_like {
        FOOTBALL_PRIORITY
    } else {
        DEFAULT_PRIORITY
    };

    let mut merged: Vec<String> = Vec::with_capacity(dynamic.len() + fallback.len());
    for candidate in dynamic
        .iter()
        .map(String::as_str)
        .chain(fallback.iter().copied())
    {
        if !merged.iter().any(|existing| existing == candidate) {
            merged.push(candidate.to_string());
        }
    }
    merged
}

/// Read a market's type, tolerating both field spellings the feed uses.
fn market_type(market: &Value) -> Option<&str> {
    get_str(market, "type").or_else(|| get_str(market, "market_type"))
}

/// Pick the game's main market following the given type priority.
///
/// Within one type, the market with the lexicographically smallest map id
/// wins so repeated selection over the same document is deterministic.
#[must_use]
pub fn select_main_market<'a>(game: &'a Value, priority: &[String]) -> Option<&'a Value> {
    let markets = game.get("market")?.as_object()?;

    let mut keys: Vec<&String> = markets.keys().collect();
    keys.sort();

    for wanted in priority {
        for key in &keys {
            let market = &markets[*key];
            if market_type(market).is_some_and(|t| t.eq_ignore_ascii_case(wanted)) {
                return Some(market);
            }
        }
    }
    None
}

// =============================================================================
// Odds Rows
// =============================================================================

/// One outcome of a main-market odds row as sent to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OddsOutcome {
    /// Outcome label: `1`, `X` or `2`.
    pub label: String,
    /// Decimal price.
    pub price: f64,
    /// Whether the outcome is currently suspended.
    pub blocked: bool,
}

fn event_blocked(event: &Value) -> bool {
    matches!(event.get("is_blocked"), Some(Value::Bool(true)))
        || get_i64(event, "is_blocked") == Some(1)
}

fn label_from_type(event: &Value) -> Option<&'static str> {
    match get_str(event, "type")? {
        t if t.eq_ignore_ascii_case("P1") || t.eq_ignore_ascii_case("W1") => Some("1"),
        t if t.eq_ignore_ascii_case("P2") || t.eq_ignore_ascii_case("W2") => Some("2"),
        t if t.eq_ignore_ascii_case("X") => Some("X"),
        _ => None,
    }
}

fn label_from_name(event: &Value) -> Option<&'static str> {
    let name = get_str(event, "name")?.to_lowercase();
    if name == "x" || name.contains("draw") {
        Some("X")
    } else {
        None
    }
}

fn positional_label(index: usize, total: usize) -> &'static str {
    match (total, index) {
        (3, 0) | (2, 0) => "1",
        (3, 1) => "X",
        _ => "2",
    }
}

/// Build the ordered odds row for a main market.
///
/// Events are taken in `(order asc, id lex)` order; rows are only produced
/// for the two- and three-outcome markets the lists know how to render.
/// Label resolution: explicit event type, then a draw-shaped name, then
/// position.
#[must_use]
pub fn build_odds_row(market: &Value, market_blocked: bool) -> Option<Vec<OddsOutcome>> {
    let events = market.get("event")?.as_object()?;
    if !(2..=3).contains(&events.len()) {
        return None;
    }

    let mut ordered: Vec<(&String, &Value)> = events.iter().collect();
    ordered.sort_by(|(a_key, a), (b_key, b)| {
        let a_order = get_i64(a, "order").unwrap_or(i64::MAX);
        let b_order = get_i64(b, "order").unwrap_or(i64::MAX);
        a_order.cmp(&b_order).then_with(|| a_key.cmp(b_key))
    });

    let total = ordered.len();
    let mut row = Vec::with_capacity(total);
    for (index, (_, event)) in ordered.into_iter().enumerate() {
        let price = crate::domain::payload::get_f64(event, "price")?;
        let label = label_from_type(event)
            .or_else(|| label_from_name(event))
            .unwrap_or_else(|| positional_label(index, total));
        row.push(OddsOutcome {
            label: label.to_string(),
            price,
            blocked: market_blocked || event_blocked(event),
        });
    }
    Some(row)
}

/// Whether a market document itself is flagged blocked.
#[must_use]
pub fn market_is_blocked(market: &Value) -> bool {
    matches!(market.get("is_blocked"), Some(Value::Bool(true)))
        || get_i64(market, "is_blocked") == Some(1)
}

// =============================================================================
// Tests
// =============================================================================
