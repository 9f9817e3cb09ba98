//! Upstream Payload Normalisation
//!
//! The swarm feed delivers nested JSON documents whose exact shape varies by
//! query: the interesting content may be wrapped in one or two `data` layers,
//! games may arrive under the full `sport → region → competition → game`
//! hierarchy, as a flat map keyed by game id, or as a plain sequence. This
//! module turns all of those shapes into uniform game objects and applies the
//! delta-merge semantics of the subscription protocol.
//!
//! # Delta merge
//!
//! Subscription deltas are merged into the accumulated document with the wire
//! protocol's conventions: `null` deletes a key, sequences replace, nested
//! maps merge recursively, scalars replace. Dropping `null` values silently
//! would leak removed games, so deletion is handled explicitly.

use serde_json::{Map, Value};

// =============================================================================
// Field Accessors
// =============================================================================

/// Read a string field from a JSON object.
#[must_use]
pub fn get_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Read an integer field, accepting both number and numeric-string encodings.
///
/// The feed is inconsistent about this: ids in particular show up as either
/// `42` or `"42"` depending on the query shape.
#[must_use]
pub fn get_i64(value: &Value, key: &str) -> Option<i64> {
    match value.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Read an unsigned integer field with the same tolerance as [`get_i64`].
#[must_use]
pub fn get_u64(value: &Value, key: &str) -> Option<u64> {
    match value.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Read a float field, accepting numeric strings.
#[must_use]
pub fn get_f64(value: &Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

// =============================================================================
// Document Unwrapping
// =============================================================================

/// Peel the outer `data` wrapper(s) off an upstream document.
///
/// Replies arrive either as `{data: {...}}` or `{data: {data: {...}}}`
/// depending on the command; at most two layers are removed so a payload
/// that legitimately contains a `data` field of its own is left intact.
#[must_use]
pub fn unwrap_data(value: &Value) -> &Value {
    let mut current = value;
    for _ in 0..2 {
        match current.get("data") {
            Some(inner) if inner.is_object() => current = inner,
            _ => break,
        }
    }
    current
}

// =============================================================================
// Delta Merge
// =============================================================================

/// Merge a subscription delta into the accumulated document.
///
/// Per-key semantics: `null` deletes, sequences replace wholesale, nested
/// maps merge recursively, scalars replace. Merging a delta equal to the
/// current state is a no-op.
pub fn deep_merge(acc: &mut Value, delta: &Value) {
    if let (Value::Object(acc_map), Value::Object(delta_map)) = (&mut *acc, delta) {
        for (key, delta_value) in delta_map {
            match delta_value {
                Value::Null => {
                    acc_map.remove(key);
                }
                Value::Object(_) => {
                    let slot = acc_map
                        .entry(key.clone())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if !slot.is_object() {
                        *slot = Value::Object(Map::new());
                    }
                    deep_merge(slot, delta_value);
                }
                other => {
                    acc_map.insert(key.clone(), other.clone());
                }
            }
        }
    } else {
        *acc = delta.clone();
    }
}

// =============================================================================
// Game Extraction
// =============================================================================

/// Fields whose presence marks a value as a direct entity rather than an
/// id reference.
const ENTITY_FIELDS: &[&str] = &["name", "game", "competition", "market", "event"];

/// Resolve a map entry to its entity object.
///
/// A value carrying an entity-shaped field is the entity itself. Otherwise
/// the value is treated as an id into the sibling map, and as a last resort
/// the entry's own key is looked up.
fn resolve_entity<'a>(
    key: &str,
    value: &'a Value,
    siblings: &'a Map<String, Value>,
) -> Option<&'a Value> {
    if let Some(obj) = value.as_object()
        && ENTITY_FIELDS.iter().any(|f| obj.contains_key(*f))
    {
        return Some(value);
    }

    let referenced = match value {
        Value::String(s) => siblings.get(s),
        Value::Number(n) => siblings.get(&n.to_string()),
        _ => None,
    };
    if let Some(entity) = referenced
        && entity.is_object()
    {
        return Some(entity);
    }

    siblings.get(key).filter(|v| v.is_object())
}

/// Clone a game object, injecting its map key as `id` when the field is
/// absent.
fn game_with_id(key: &str, game: &Value) -> Value {
    let mut owned = game.clone();
    if let Some(obj) = owned.as_object_mut()
        && !obj.contains_key("id")
    {
        let id = key
            .parse::<i64>()
            .map_or_else(|_| Value::String(key.to_string()), Value::from);
        obj.insert("id".to_string(), id);
    }
    owned
}

/// Taxonomy context gathered while walking the hierarchy, denormalised onto
/// each extracted game so list consumers need no separate lookup.
#[derive(Default)]
struct WalkContext<'a> {
    sport_id: Option<&'a str>,
    sport_name: Option<&'a str>,
    region_id: Option<&'a str>,
    region_name: Option<&'a str>,
    competition_id: Option<&'a str>,
    competition_name: Option<&'a str>,
}

impl WalkContext<'_> {
    fn apply(&self, game: &mut Value) {
        let Some(obj) = game.as_object_mut() else {
            return;
        };
        let pairs: [(&str, Option<&str>); 3] = [
            ("sport", self.sport_name),
            ("region", self.region_name),
            ("competition", self.competition_name),
        ];
        for (field, name) in pairs {
            if let Some(name) = name
                && !obj.contains_key(field)
            {
                obj.insert(field.to_string(), Value::String(name.to_string()));
            }
        }
        let ids: [(&str, Option<&str>); 3] = [
            ("sport_id", self.sport_id),
            ("region_id", self.region_id),
            ("competition_id", self.competition_id),
        ];
        for (field, id) in ids {
            if let Some(id) = id
                && !obj.contains_key(field)
                && let Ok(numeric) = id.parse::<i64>()
            {
                obj.insert(field.to_string(), Value::from(numeric));
            }
        }
    }
}

/// Heuristic for flat maps keyed by game id: a value counts as a game when it
/// carries any game-specific field.
fn looks_like_game(obj: &Map<String, Value>) -> bool {
    const GAME_FIELDS: &[&str] = &[
        "team1_name",
        "team2_name",
        "start_ts",
        "markets_count",
        "market",
        "info",
        "text_info",
        "is_live",
    ];
    GAME_FIELDS.iter().any(|f| obj.contains_key(*f))
}

/// Collect all games out of the `game` map of one competition (or of a
/// subscription document that carries games at the top level).
fn collect_game_map(games: &Map<String, Value>, context: &WalkContext<'_>, out: &mut Vec<Value>) {
    for (key, value) in games {
        if let Some(entity) = resolve_entity(key, value, games) {
            let mut game = game_with_id(key, entity);
            context.apply(&mut game);
            out.push(game);
        }
    }
}

/// Extract all game objects from an upstream document.
///
/// Accepts any of the shapes the feed produces:
///
/// 1. the full hierarchy `sport → region → competition → game`, with
///    id-reference resolution at every level;
/// 2. a document carrying a `game` map directly;
/// 3. a flat map keyed by game id;
/// 4. a plain sequence of games.
///
/// Extraction preserves the document's own iteration order, so parsing the
/// same payload twice yields the same sequence.
#[must_use]
pub fn extract_games(doc: &Value) -> Vec<Value> {
    let doc = unwrap_data(doc);
    let mut games = Vec::new();

    if let Some(sports) = doc.get("sport").and_then(Value::as_object) {
        for (sport_key, sport_value) in sports {
            let Some(sport) = resolve_entity(sport_key, sport_value, sports) else {
                continue;
            };
            let Some(regions) = sport.get("region").and_then(Value::as_object) else {
                continue;
            };
            for (region_key, region_value) in regions {
                let Some(region) = resolve_entity(region_key, region_value, regions) else {
                    continue;
                };
                let Some(competitions) = region.get("competition").and_then(Value::as_object)
                else {
                    continue;
                };
                for (comp_key, comp_value) in competitions {
                    let Some(competition) = resolve_entity(comp_key, comp_value, competitions)
                    else {
                        continue;
                    };
                    if let Some(game_map) = competition.get("game").and_then(Value::as_object) {
                        let context = WalkContext {
                            sport_id: Some(sport_key),
                            sport_name: get_str(sport, "name"),
                            region_id: Some(region_key),
                            region_name: get_str(region, "name"),
                            competition_id: Some(comp_key),
                            competition_name: get_str(competition, "name"),
                        };
                        collect_game_map(game_map, &context, &mut games);
                    }
                }
            }
        }
        return games;
    }

    if let Some(game_map) = doc.get("game").and_then(Value::as_object) {
        collect_game_map(game_map, &WalkContext::default(), &mut games);
        return games;
    }

    if let Some(seq) = doc.as_array() {
        return seq.iter().filter(|v| v.is_object()).cloned().collect();
    }

    if let Some(map) = doc.as_object() {
        for (key, value) in map {
            if let Some(obj) = value.as_object()
                && looks_like_game(obj)
            {
                games.push(game_with_id(key, value));
            }
        }
    }

    games
}

// =============================================================================
// Visibility Filters
// =============================================================================

/// Markers that identify a game as over in any of its textual status fields.
const FINISH_MARKERS: &[&str] = &["finished", "final", "ended", "settled", "match over"];

fn text_is_finished(text: &str) -> bool {
    let lowered = text.to_lowercase();
    FINISH_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Whether a game belongs in a live sport-games list.
///
/// Live lists carry only in-play matches: `type == 1`, not an outright, not
/// finished in any of its status fields, and not explicitly flagged
/// non-live.
#[must_use]
pub fn is_live_listable(game: &Value) -> bool {
    if get_i64(game, "type") != Some(1) {
        return false;
    }

    if get_str(game, "show_type").is_some_and(|s| s.eq_ignore_ascii_case("outright")) {
        return false;
    }

    match game.get("is_live") {
        Some(Value::Bool(false)) => return false,
        Some(Value::Number(n)) if n.as_i64() == Some(0) => return false,
        _ => {}
    }

    let status_fields = [
        get_str(game, "show_type"),
        game.get("info")
            .and_then(|info| info.get("current_game_state"))
            .and_then(Value::as_str),
        get_str(game, "last_event"),
        get_str(game, "text_info"),
    ];
    if status_fields
        .into_iter()
        .flatten()
        .any(text_is_finished)
    {
        return false;
    }

    true
}

/// Whether a game belongs in a prematch sport-games list.
#[must_use]
pub fn is_prematch_listable(game: &Value) -> bool {
    if get_i64(game, "visible_in_prematch") == Some(1) {
        return true;
    }
    matches!(get_i64(game, "type"), Some(0 | 2))
}

// =============================================================================
// Sport Counts
// =============================================================================

/// One row of a per-sport game-count listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SportCountRow {
    /// Display name of the sport.
    pub name: String,
    /// Number of games currently matching the count query.
    pub count: u64,
}

/// Parse a counts document into per-sport rows.
///
/// Count queries return a sport map where each entry carries either an
/// aggregated `game` count or an explicit game map; both forms are accepted.
#[must_use]
pub fn parse_sport_counts(doc: &Value) -> Vec<SportCountRow> {
    let doc = unwrap_data(doc);
    let Some(sports) = doc.get("sport").and_then(Value::as_object) else {
        return Vec::new();
    };

    let mut rows = Vec::new();
    for (key, value) in sports {
        let Some(sport) = resolve_entity(key, value, sports) else {
            continue;
        };
        let name = get_str(sport, "name")
            .or_else(|| get_str(sport, "alias"))
            .unwrap_or(key)
            .to_string();
        let count = match sport.get("game") {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
            Some(Value::Object(games)) => games.len() as u64,
            _ => 0,
        };
        rows.push(SportCountRow { name, count });
    }
    rows
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn unwrap_single_data_layer() {
        let doc = json!({"data": {"sport": {}}});
        assert_eq!(unwrap_data(&doc), &json!({"sport": {}}));
    }

    #[test]
    fn unwrap_double_data_layer() {
        let doc = json!({"data": {"data": {"game": {}}}});
        assert_eq!(unwrap_data(&doc), &json!({"game": {}}));
    }

    #[test]
    fn unwrap_leaves_payload_data_field_alone() {
        // Three layers: only two are peeled, the innermost `data` survives.
        let doc = json!({"data": {"data": {"data": {"x": 1}}}});
        assert_eq!(unwrap_data(&doc), &json!({"data": {"x": 1}}));
    }

    #[test]
    fn unwrap_passes_through_unwrapped() {
        let doc = json!({"sport": {"1": {"name": "Football"}}});
        assert_eq!(unwrap_data(&doc), &doc);
    }

    #[test]
    fn merge_null_deletes() {
        let mut acc = json!({"a": 1, "b": 2});
        deep_merge(&mut acc, &json!({"a": null}));
        assert_eq!(acc, json!({"b": 2}));
    }

    #[test]
    fn merge_sequence_replaces() {
        let mut acc = json!({"a": [1, 2, 3]});
        deep_merge(&mut acc, &json!({"a": [9]}));
        assert_eq!(acc, json!({"a": [9]}));
    }

    #[test]
    fn merge_nested_maps_recursively() {
        let mut acc = json!({"game": {"1": {"price": 1.5, "name": "x"}}});
        deep_merge(&mut acc, &json!({"game": {"1": {"price": 1.55}}}));
        assert_eq!(acc, json!({"game": {"1": {"price": 1.55, "name": "x"}}}));
    }

    #[test]
    fn merge_scalar_replaces() {
        let mut acc = json!({"count": 4});
        deep_merge(&mut acc, &json!({"count": 5}));
        assert_eq!(acc, json!({"count": 5}));
    }

    #[test]
    fn merge_is_idempotent() {
        let mut acc = json!({"game": {"42": {"price": 1.5, "events": [1, 2]}}});
        let snapshot = acc.clone();
        let delta = acc.clone();
        deep_merge(&mut acc, &delta);
        assert_eq!(acc, snapshot);
    }

    #[test]
    fn merge_replaces_scalar_with_map() {
        let mut acc = json!({"info": 0});
        deep_merge(&mut acc, &json!({"info": {"score1": 1}}));
        assert_eq!(acc, json!({"info": {"score1": 1}}));
    }

    fn hierarchy_doc() -> Value {
        json!({
            "data": {
                "sport": {
                    "1": {
                        "name": "Football",
                        "region": {
                            "10": {
                                "name": "England",
                                "competition": {
                                    "100": {
                                        "name": "Premier League",
                                        "game": {
                                            "1000": {"team1_name": "A", "team2_name": "B"},
                                            "1001": {"id": 1001, "team1_name": "C", "team2_name": "D"}
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn extract_games_from_hierarchy() {
        let games = extract_games(&hierarchy_doc());
        assert_eq!(games.len(), 2);
        assert_eq!(get_i64(&games[0], "id"), Some(1000));
        assert_eq!(get_i64(&games[1], "id"), Some(1001));
    }

    #[test]
    fn extract_games_denormalises_taxonomy_context() {
        let games = extract_games(&hierarchy_doc());
        assert_eq!(get_str(&games[0], "sport"), Some("Football"));
        assert_eq!(get_str(&games[0], "region"), Some("England"));
        assert_eq!(get_str(&games[0], "competition"), Some("Premier League"));
        assert_eq!(get_i64(&games[0], "sport_id"), Some(1));
        assert_eq!(get_i64(&games[0], "region_id"), Some(10));
        assert_eq!(get_i64(&games[0], "competition_id"), Some(100));
    }

    #[test]
    fn extract_games_is_order_preserving() {
        let doc = hierarchy_doc();
        assert_eq!(extract_games(&doc), extract_games(&doc));
    }

    #[test]
    fn extract_games_from_game_map() {
        let doc = json!({"game": {"42": {"team1_name": "A", "team2_name": "B"}}});
        let games = extract_games(&doc);
        assert_eq!(games.len(), 1);
        assert_eq!(get_i64(&games[0], "id"), Some(42));
    }

    #[test]
    fn extract_games_from_sequence() {
        let doc = json!([{"id": 1}, {"id": 2}, 3]);
        let games = extract_games(&doc);
        assert_eq!(games.len(), 2);
    }

    #[test]
    fn extract_games_from_flat_map() {
        let doc = json!({
            "7": {"team1_name": "A", "start_ts": 1_700_000_000},
            "subid": "ignored"
        });
        let games = extract_games(&doc);
        assert_eq!(games.len(), 1);
        assert_eq!(get_i64(&games[0], "id"), Some(7));
    }

    #[test]
    fn extract_resolves_id_references() {
        let doc = json!({
            "sport": {
                "1": "2",
                "2": {
                    "name": "Football",
                    "region": {
                        "10": {
                            "name": "England",
                            "competition": {
                                "100": {
                                    "name": "PL",
                                    "game": {"5": {"team1_name": "A"}}
                                }
                            }
                        }
                    }
                }
            }
        });
        let games = extract_games(&doc);
        // The "1" entry resolves to its sibling "2"; both walks reach the
        // same game object.
        assert_eq!(games.len(), 2);
        assert!(games.iter().all(|g| get_i64(g, "id") == Some(5)));
    }

    #[test]
    fn live_filter_accepts_in_play() {
        let game = json!({"type": 1, "is_live": 1, "info": {"current_game_state": "set1"}});
        assert!(is_live_listable(&game));
    }

    #[test]
    fn live_filter_rejects_wrong_type() {
        assert!(!is_live_listable(&json!({"type": 0})));
        assert!(!is_live_listable(&json!({"type": 2, "is_live": 1})));
    }

    #[test]
    fn live_filter_rejects_outright() {
        let game = json!({"type": 1, "show_type": "OUTRIGHT"});
        assert!(!is_live_listable(&game));
    }

    #[test]
    fn live_filter_rejects_finished_states() {
        for game in [
            json!({"type": 1, "info": {"current_game_state": "finished"}}),
            json!({"type": 1, "last_event": "Match Over"}),
            json!({"type": 1, "text_info": "Final"}),
        ] {
            assert!(!is_live_listable(&game), "should reject {game}");
        }
    }

    #[test]
    fn live_filter_rejects_explicit_not_live() {
        assert!(!is_live_listable(&json!({"type": 1, "is_live": false})));
        assert!(!is_live_listable(&json!({"type": 1, "is_live": 0})));
    }

    #[test]
    fn prematch_filter_by_visibility_or_type() {
        assert!(is_prematch_listable(&json!({"visible_in_prematch": 1, "type": 1})));
        assert!(is_prematch_listable(&json!({"type": 0})));
        assert!(is_prematch_listable(&json!({"type": 2})));
        assert!(!is_prematch_listable(&json!({"type": 1})));
    }

    #[test]
    fn counts_from_aggregated_sports() {
        let doc = json!({
            "data": {
                "sport": {
                    "1": {"name": "Football", "game": 12},
                    "2": {"name": "Tennis", "game": {"7": {}, "8": {}}}
                }
            }
        });
        let rows = parse_sport_counts(&doc);
        assert_eq!(rows.len(), 2);
        assert!(rows.contains(&SportCountRow { name: "Football".into(), count: 12 }));
        assert!(rows.contains(&SportCountRow { name: "Tennis".into(), count: 2 }));
    }

    #[test]
    fn counts_empty_without_sport_map() {
        assert!(parse_sport_counts(&json!({})).is_empty());
        assert!(parse_sport_counts(&json!({"data": []})).is_empty());
    }
}
