//! Change-Detection Fingerprints
//!
//! Deterministic strings derived from the meaningful fields of a payload,
//! used to decide whether an emission would be redundant. These are value
//! identities, not cryptographic hashes: a collision merely skips one
//! emission, it can never duplicate one.
//!
//! Every fingerprint sorts its inputs before joining so that two payloads
//! with equivalent content but different map ordering produce the same
//! string.

use serde_json::Value;

use crate::domain::payload::{SportCountRow, get_i64, get_str};

/// Render a scalar field into its canonical fingerprint fragment.
///
/// Missing fields become the empty string; numbers use `serde_json`'s
/// canonical display so `1.5` never fingerprints differently from itself.
fn scalar_fragment(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Order events by `(order asc, id lex)` and join their
/// `id:price:base` fragments.
fn events_fragment(market: &Value) -> String {
    let Some(events) = market.get("event").and_then(Value::as_object) else {
        return String::new();
    };

    let mut ordered: Vec<(&String, &Value)> = events.iter().collect();
    ordered.sort_by(|(a_key, a), (b_key, b)| {
        let a_order = get_i64(a, "order").unwrap_or(i64::MAX);
        let b_order = get_i64(b, "order").unwrap_or(i64::MAX);
        a_order.cmp(&b_order).then_with(|| a_key.cmp(b_key))
    });

    let fragments: Vec<String> = ordered
        .into_iter()
        .map(|(key, event)| {
            let id = event
                .get("id")
                .map_or_else(|| key.clone(), |v| scalar_fragment(Some(v)));
            format!(
                "{id}:{}:{}",
                scalar_fragment(event.get("price")),
                scalar_fragment(event.get("base"))
            )
        })
        .collect();
    fragments.join(",")
}

/// Fingerprint fragment of a single market: `id|type|display_key|events`.
fn market_fragment(market: &Value) -> String {
    format!(
        "{}|{}|{}|{}",
        scalar_fragment(market.get("id")),
        scalar_fragment(market.get("type").or_else(|| market.get("market_type"))),
        scalar_fragment(market.get("display_key")),
        events_fragment(market)
    )
}

/// Fingerprint of one full game document (markets and their events).
///
/// Markets are sorted by their map id so delta-reordered payloads with the
/// same content collapse to the same fingerprint.
#[must_use]
pub fn game_fingerprint(game: &Value) -> String {
    let Some(markets) = game.get("market").and_then(Value::as_object) else {
        return String::new();
    };

    let mut keys: Vec<&String> = markets.keys().collect();
    keys.sort();

    let fragments: Vec<String> = keys
        .into_iter()
        .map(|mid| {
            let market = &markets[mid];
            format!("{mid}|{}", market_fragment(market))
        })
        .collect();
    fragments.join(";")
}

/// Fingerprint of a sport's games list.
///
/// Each game contributes the fields that matter to a list rendering:
/// identity, market count, status text, score, phase, clock and added
/// minutes. Fragments are sorted so the list order itself is not part of the
/// identity.
#[must_use]
pub fn sport_fingerprint(games: &[Value]) -> String {
    let mut fragments: Vec<String> = games
        .iter()
        .map(|game| {
            let info = game.get("info");
            let score = info.map_or_else(String::new, |i| {
                format!(
                    "{}:{}",
                    scalar_fragment(i.get("score1")),
                    scalar_fragment(i.get("score2"))
                )
            });
            format!(
                "{}|{}|{}|{}|{}|{}|{}",
                scalar_fragment(game.get("id")),
                scalar_fragment(game.get("markets_count")),
                scalar_fragment(game.get("text_info")),
                score,
                scalar_fragment(info.and_then(|i| i.get("current_game_state"))),
                scalar_fragment(info.and_then(|i| i.get("current_game_time"))),
                scalar_fragment(info.and_then(|i| i.get("add_minutes"))),
            )
        })
        .collect();
    fragments.sort();
    fragments.join(";")
}

/// Fingerprint of a single market's odds: `id|type|display_key|events`.
#[must_use]
pub fn odds_fingerprint(market: &Value) -> String {
    market_fragment(market)
}

/// Fingerprint of a per-sport counts listing: `name:count` sorted by name.
#[must_use]
pub fn counts_fingerprint(rows: &[SportCountRow]) -> String {
    let mut fragments: Vec<String> = rows
        .iter()
        .map(|row| format!("{}:{}", row.name, row.count))
        .collect();
    fragments.sort();
    fragments.join(";")
}

/// Convenience used by tests and callers that track optional status text.
#[must_use]
pub fn game_status_text(game: &Value) -> Option<&str> {
    get_str(game, "text_info")
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn market(price: f64) -> Value {
        json!({
            "id": 900,
            "type": "P1XP2",
            "display_key": "WINNER",
            "event": {
                "2": {"id": 2, "price": 3.2, "base": null, "order": 1, "type": "X"},
                "1": {"id": 1, "price": price, "base": null, "order": 0, "type": "P1"},
                "3": {"id": 3, "price": 2.1, "order": 2, "type": "P2"}
            }
        })
    }

    #[test]
    fn game_fingerprint_stable_across_key_order() {
        let a = json!({"market": {"900": market(1.5), "901": market(1.9)}});
        let b = json!({"market": {"901": market(1.9), "900": market(1.5)}});
        assert_eq!(game_fingerprint(&a), game_fingerprint(&b));
    }

    #[test]
    fn game_fingerprint_detects_price_change() {
        let before = json!({"market": {"900": market(1.50)}});
        let after = json!({"market": {"900": market(1.55)}});
        assert_ne!(game_fingerprint(&before), game_fingerprint(&after));
    }

    #[test]
    fn game_fingerprint_empty_without_markets() {
        assert_eq!(game_fingerprint(&json!({"id": 1})), "");
    }

    #[test]
    fn events_ordered_by_order_then_id() {
        let fp = odds_fingerprint(&market(1.5));
        let events_part = fp.rsplit('|').next().unwrap();
        assert_eq!(events_part, "1:1.5:,2:3.2:,3:2.1:");
    }

    #[test]
    fn events_missing_order_sort_last() {
        let m = json!({
            "id": 1,
            "event": {
                "b": {"id": "b", "price": 2.0},
                "a": {"id": "a", "price": 1.0, "order": 5}
            }
        });
        let fp = odds_fingerprint(&m);
        let events_part = fp.rsplit('|').next().unwrap();
        assert_eq!(events_part, "a:1:,b:2:");
    }

    #[test]
    fn sport_fingerprint_ignores_list_order() {
        let g1 = json!({"id": 1, "markets_count": 3, "info": {"score1": 1, "score2": 0}});
        let g2 = json!({"id": 2, "markets_count": 5, "info": {"score1": 0, "score2": 0}});
        assert_eq!(
            sport_fingerprint(&[g1.clone(), g2.clone()]),
            sport_fingerprint(&[g2, g1])
        );
    }

    #[test]
    fn sport_fingerprint_detects_score_change() {
        let before = json!({"id": 1, "info": {"score1": 0, "score2": 0}});
        let after = json!({"id": 1, "info": {"score1": 1, "score2": 0}});
        assert_ne!(
            sport_fingerprint(std::slice::from_ref(&before)),
            sport_fingerprint(std::slice::from_ref(&after))
        );
    }

    #[test]
    fn sport_fingerprint_detects_clock_change() {
        let before = json!({"id": 1, "info": {"current_game_time": "44:10"}});
        let after = json!({"id": 1, "info": {"current_game_time": "44:11"}});
        assert_ne!(
            sport_fingerprint(std::slice::from_ref(&before)),
            sport_fingerprint(std::slice::from_ref(&after))
        );
    }

    #[test]
    fn counts_fingerprint_sorted_by_name() {
        let a = vec![
            SportCountRow { name: "Tennis".into(), count: 4 },
            SportCountRow { name: "Football".into(), count: 9 },
        ];
        let b = vec![
            SportCountRow { name: "Football".into(), count: 9 },
            SportCountRow { name: "Tennis".into(), count: 4 },
        ];
        assert_eq!(counts_fingerprint(&a), counts_fingerprint(&b));
        assert_eq!(counts_fingerprint(&a), "Football:9;Tennis:4");
    }

    #[test]
    fn counts_fingerprint_detects_count_change() {
        let before = vec![SportCountRow { name: "Football".into(), count: 9 }];
        let after = vec![SportCountRow { name: "Football".into(), count: 10 }];
        assert_ne!(counts_fingerprint(&before), counts_fingerprint(&after));
    }
}
