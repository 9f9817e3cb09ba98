//! Hierarchy Cache
//!
//! Process-local cache of the sport/region/competition taxonomy with a
//! 30-minute TTL and a stale-while-revalidate policy: when a refresh comes
//! back with zero sports (a known feed glitch), the previous document is
//! retained instead of wiping the names everyone resolves against.
//!
//! Derived name/alias maps are rebuilt whenever the underlying document is
//! replaced, never mutated in place.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{Value, json};

use crate::domain::payload::{get_str, unwrap_data};
use crate::infrastructure::storage::FileStore;
use crate::infrastructure::swarm::messages::hierarchy_params;
use crate::infrastructure::swarm::session::{SessionError, SwarmSession};

/// Cache time-to-live.
const TTL: Duration = Duration::from_secs(30 * 60);

/// Storage key of the persisted document.
const STORAGE_KEY: &str = "hierarchy";

struct CachedHierarchy {
    doc: Value,
    fetched_at: Instant,
    names: HashMap<i64, String>,
    aliases: HashMap<i64, String>,
}

impl CachedHierarchy {
    fn build(doc: Value) -> Self {
        let (names, aliases) = derive_sport_maps(&doc);
        Self {
            doc,
            fetched_at: Instant::now(),
            names,
            aliases,
        }
    }
}

/// The taxonomy cache.
pub struct HierarchyCache {
    session: Arc<SwarmSession>,
    storage: Arc<FileStore>,
    inner: RwLock<Option<CachedHierarchy>>,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl HierarchyCache {
    /// Create the cache, seeding it from persisted state when available.
    ///
    /// A persisted document is always loaded regardless of age; it serves
    /// name lookups until the first live refresh lands.
    #[must_use]
    pub fn new(session: Arc<SwarmSession>, storage: Arc<FileStore>) -> Self {
        let seeded = storage
            .get(STORAGE_KEY)
            .and_then(|persisted| persisted.get("data").cloned())
            .map(|doc| {
                tracing::info!("hierarchy seeded from persisted state");
                let mut cached = CachedHierarchy::build(doc);
                // Persisted data is stale by definition; age it out so the
                // first consumer triggers a live refresh.
                cached.fetched_at = Instant::now()
                    .checked_sub(TTL)
                    .unwrap_or_else(Instant::now);
                cached
            });

        Self {
            session,
            storage,
            inner: RwLock::new(seeded),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// The taxonomy document, refreshing when expired or forced.
    ///
    /// Returns the document together with a `cached` flag telling whether it
    /// was served from cache.
    ///
    /// # Errors
    ///
    /// Returns an error only when no refresh succeeds and no previous
    /// document exists.
    pub async fn document(&self, force_refresh: bool) -> Result<(Value, bool), SessionError> {
        if !force_refresh
            && let Some(cached) = self.inner.read().as_ref()
            && cached.fetched_at.elapsed() < TTL
        {
            return Ok((cached.doc.clone(), true));
        }

        // Single-flight: concurrent expirations produce one upstream fetch.
        let _guard = self.refresh_gate.lock().await;
        if !force_refresh
            && let Some(cached) = self.inner.read().as_ref()
            && cached.fetched_at.elapsed() < TTL
        {
            return Ok((cached.doc.clone(), true));
        }

        match self.fetch().await {
            Ok(doc) if sport_count(&doc) > 0 => {
                *self.inner.write() = Some(CachedHierarchy::build(doc.clone()));
                self.storage.put(
                    STORAGE_KEY,
                    json!({"cachedAtMs": Utc::now().timestamp_millis(), "data": doc}),
                );
                Ok((doc, false))
            }
            Ok(_) => {
                // Feed glitch: an empty taxonomy never replaces a usable one.
                tracing::warn!("hierarchy refresh returned zero sports, keeping previous");
                self.serve_stale(SessionError::SubscribeFailed(
                    "hierarchy refresh returned no sports".to_string(),
                ))
            }
            Err(e) => {
                tracing::warn!(error = %e, "hierarchy refresh failed");
                self.serve_stale(e)
            }
        }
    }

    fn serve_stale(&self, error: SessionError) -> Result<(Value, bool), SessionError> {
        self.inner
            .read()
            .as_ref()
            .map(|cached| (cached.doc.clone(), true))
            .ok_or(error)
    }

    async fn fetch(&self) -> Result<Value, SessionError> {
        self.session.ensure().await?;
        let data = self
            .session
            .request_default("get", hierarchy_params())
            .await?;
        Ok(unwrap_data(&data).clone())
    }

    /// Resolve a sport's display name, refreshing the cache if needed.
    pub async fn sport_name(&self, sport_id: i64) -> Option<String> {
        if let Some(name) = self.lookup_name(sport_id) {
            return Some(name);
        }
        // Unknown sport: the cache may simply be cold.
        if let Err(e) = self.document(false).await {
            tracing::debug!(sport_id, error = %e, "hierarchy unavailable for name lookup");
        }
        self.lookup_name(sport_id)
    }

    /// Resolve a sport's alias from the cached document.
    #[must_use]
    pub fn sport_alias(&self, sport_id: i64) -> Option<String> {
        self.inner
            .read()
            .as_ref()
            .and_then(|cached| cached.aliases.get(&sport_id).cloned())
    }

    fn lookup_name(&self, sport_id: i64) -> Option<String> {
        self.inner
            .read()
            .as_ref()
            .and_then(|cached| cached.names.get(&sport_id).cloned())
    }
}

fn sport_count(doc: &Value) -> usize {
    doc.get("sport")
        .and_then(Value::as_object)
        .map_or(0, serde_json::Map::len)
}

fn derive_sport_maps(doc: &Value) -> (HashMap<i64, String>, HashMap<i64, String>) {
    let mut names = HashMap::new();
    let mut aliases = HashMap::new();

    if let Some(sports) = doc.get("sport").and_then(Value::as_object) {
        for (key, sport) in sports {
            let Some(id) = crate::domain::payload::get_i64(sport, "id")
                .or_else(|| key.parse().ok())
            else {
                continue;
            };
            if let Some(name) = get_str(sport, "name") {
                names.insert(id, name.to_string());
            }
            if let Some(alias) = get_str(sport, "alias") {
                aliases.insert(id, alias.to_string());
            }
        }
    }
    (names, aliases)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn derives_name_and_alias_maps() {
        let doc = json!({
            "sport": {
                "1": {"id": 1, "name": "Football", "alias": "Soccer"},
                "4": {"name": "Tennis"}
            }
        });
        let (names, aliases) = derive_sport_maps(&doc);
        assert_eq!(names.get(&1), Some(&"Football".to_string()));
        assert_eq!(names.get(&4), Some(&"Tennis".to_string()));
        assert_eq!(aliases.get(&1), Some(&"Soccer".to_string()));
        assert!(aliases.get(&4).is_none());
    }

    #[test]
    fn sport_count_handles_missing_map() {
        assert_eq!(sport_count(&json!({})), 0);
        assert_eq!(sport_count(&json!({"sport": {"1": {}}})), 1);
    }
}
