//! Odds Cache & Fingerprint Gate
//!
//! Sits between a freshly computed odds row and the broadcast: remembers the
//! last-sent odds per game and lets an emission through only when the
//! fingerprint or the market count moved. Unchanged entries get their
//! timestamp refreshed so they age by *staleness of data*, not by emission
//! cadence.
//!
//! Bounds are enforced opportunistically on each emission pass: expired
//! entries are dropped first, then the oldest-by-update entries until the
//! cache is back at its limit.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::domain::markets::OddsOutcome;

/// Last-sent odds state for one game.
#[derive(Debug, Clone)]
pub struct OddsCacheEntry {
    /// The odds row last sent, if any.
    pub odds: Option<Vec<OddsOutcome>>,
    /// Market count last sent.
    pub markets_count: u64,
    /// Content fingerprint of the main market.
    pub fingerprint: String,
    /// When this entry last changed or was confirmed unchanged.
    pub updated_at: Instant,
}

/// Per-group bounded cache of last-sent odds.
#[derive(Debug)]
pub struct OddsCache {
    entries: HashMap<i64, OddsCacheEntry>,
    max_entries: usize,
    ttl: Duration,
}

impl OddsCache {
    /// Create a cache with the given bounds.
    #[must_use]
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries,
            ttl,
        }
    }

    /// Gate one game's freshly computed odds.
    ///
    /// Returns `true` when the game should be emitted: its fingerprint or
    /// market count differs from the cached entry, or no entry exists yet.
    /// The cache is updated either way; an unchanged entry only has its
    /// timestamp refreshed.
    pub fn gate(
        &mut self,
        game_id: i64,
        fingerprint: &str,
        markets_count: u64,
        odds: Option<Vec<OddsOutcome>>,
    ) -> bool {
        let now = Instant::now();
        match self.entries.get_mut(&game_id) {
            Some(entry) if entry.fingerprint == fingerprint && entry.markets_count == markets_count => {
                entry.updated_at = now;
                false
            }
            _ => {
                self.entries.insert(
                    game_id,
                    OddsCacheEntry {
                        odds,
                        markets_count,
                        fingerprint: fingerprint.to_string(),
                        updated_at: now,
                    },
                );
                true
            }
        }
    }

    /// Age of a game's entry, if present.
    #[must_use]
    pub fn entry_age(&self, game_id: i64) -> Option<Duration> {
        self.entries.get(&game_id).map(|e| e.updated_at.elapsed())
    }

    /// Drop expired entries, then evict oldest-by-update until within the
    /// size bound.
    pub fn prune(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.updated_at.elapsed() <= ttl);

        while self.entries.len() > self.max_entries {
            let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.updated_at)
                .map(|(id, _)| *id)
            else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    /// The coalesced union of all cached entries, ordered by game id.
    ///
    /// This is the payload retained as attach replay for late joiners.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(i64, OddsCacheEntry)> {
        let mut all: Vec<(i64, OddsCacheEntry)> = self
            .entries
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> OddsCache {
        OddsCache::new(3, Duration::from_secs(3600))
    }

    fn row(price: f64) -> Option<Vec<OddsOutcome>> {
        Some(vec![OddsOutcome { label: "1".into(), price, blocked: false }])
    }

    #[test]
    fn first_sighting_emits() {
        let mut cache = cache();
        assert!(cache.gate(1, "fp-a", 5, row(1.5)));
    }

    #[test]
    fn unchanged_entry_is_gated() {
        let mut cache = cache();
        assert!(cache.gate(1, "fp-a", 5, row(1.5)));
        assert!(!cache.gate(1, "fp-a", 5, row(1.5)));
    }

    #[test]
    fn fingerprint_change_emits() {
        let mut cache = cache();
        let _ = cache.gate(1, "fp-a", 5, row(1.5));
        assert!(cache.gate(1, "fp-b", 5, row(1.6)));
    }

    #[test]
    fn markets_count_change_emits_even_with_same_fingerprint() {
        let mut cache = cache();
        let _ = cache.gate(1, "fp-a", 5, row(1.5));
        assert!(cache.gate(1, "fp-a", 6, row(1.5)));
    }

    #[test]
    fn unchanged_gate_refreshes_age() {
        let mut cache = cache();
        let _ = cache.gate(1, "fp-a", 5, row(1.5));
        std::thread::sleep(Duration::from_millis(10));
        let before = cache.entry_age(1).unwrap();
        let _ = cache.gate(1, "fp-a", 5, row(1.5));
        let after = cache.entry_age(1).unwrap();
        assert!(after < before);
    }

    #[test]
    fn prune_evicts_oldest_beyond_capacity() {
        let mut cache = cache();
        for id in 0..5 {
            let _ = cache.gate(id, "fp", 1, row(1.5));
            std::thread::sleep(Duration::from_millis(2));
        }
        cache.prune();
        assert_eq!(cache.len(), 3);
        // The two oldest entries were evicted.
        assert!(cache.entry_age(0).is_none());
        assert!(cache.entry_age(1).is_none());
        assert!(cache.entry_age(4).is_some());
    }

    #[test]
    fn prune_drops_expired_entries() {
        let mut cache = OddsCache::new(10, Duration::from_millis(5));
        let _ = cache.gate(1, "fp", 1, row(1.5));
        std::thread::sleep(Duration::from_millis(10));
        cache.prune();
        assert!(cache.is_empty());
    }

    #[test]
    fn snapshot_is_ordered_by_game_id() {
        let mut cache = cache();
        let _ = cache.gate(3, "fp", 1, row(1.5));
        let _ = cache.gate(1, "fp", 1, row(1.6));
        let _ = cache.gate(2, "fp", 1, None);
        let ids: Vec<i64> = cache.snapshot().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
