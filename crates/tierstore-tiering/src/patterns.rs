//! Per-object access-pattern tracking.
//!
//! Patterns are fed off the hot path, after successful transfers. The store
//! never evicts; pruning is left to whoever owns the backend.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use crate::tiers::StorageTier;

/// Observed access history of one object.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessPattern {
    pub key: String,
    pub first_access: SystemTime,
    pub last_access: SystemTime,
    pub access_count: u64,
    /// Rolling mean gap between accesses; zero until the second access.
    pub mean_access_gap: Duration,
    pub object_size: u64,
    pub current_tier: StorageTier,
    pub estimated_monthly_cost: f64,
}

impl AccessPattern {
    /// Age of the pattern (time since first access).
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.first_access).unwrap_or_default()
    }

    /// Time since the last access.
    pub fn idle(&self, now: SystemTime) -> Duration {
        now.duration_since(self.last_access).unwrap_or_default()
    }
}

/// Thread-safe map of access patterns. One lock covers the map and every
/// entry; entries are small and mutations are short.
pub struct AccessPatternStore {
    enabled: bool,
    patterns: Mutex<HashMap<String, AccessPattern>>,
}

impl AccessPatternStore {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            patterns: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Records one access. Creates the pattern on first sight; afterwards
    /// updates the counters and the rolling mean inter-access gap
    /// `(now - first_access) / (access_count - 1)`.
    ///
    /// A no-op when monitoring is disabled.
    pub fn record_access(&self, key: &str, size: u64, tier: StorageTier) {
        if !self.enabled {
            return;
        }
        let now = SystemTime::now();
        let mut patterns = self.patterns.lock().unwrap();
        match patterns.get_mut(key) {
            Some(pattern) => {
                pattern.access_count += 1;
                pattern.last_access = now;
                pattern.object_size = size;
                if pattern.access_count > 1 {
                    let span = now
                        .duration_since(pattern.first_access)
                        .unwrap_or_default();
                    pattern.mean_access_gap = span / (pattern.access_count - 1) as u32;
                }
            }
            None => {
                patterns.insert(
                    key.to_string(),
                    AccessPattern {
                        key: key.to_string(),
                        first_access: now,
                        last_access: now,
                        access_count: 1,
                        mean_access_gap: Duration::ZERO,
                        object_size: size,
                        current_tier: tier,
                        estimated_monthly_cost: 0.0,
                    },
                );
            }
        }
    }

    /// Inserts or replaces a pattern wholesale. Used to seed analysis from
    /// externally persisted history.
    pub fn seed(&self, pattern: AccessPattern) {
        self.patterns
            .lock()
            .unwrap()
            .insert(pattern.key.clone(), pattern);
    }

    /// A copy of one pattern.
    pub fn get(&self, key: &str) -> Option<AccessPattern> {
        self.patterns.lock().unwrap().get(key).cloned()
    }

    /// Applies `f` to one pattern under the lock.
    pub fn update<F>(&self, key: &str, f: F) -> bool
    where
        F: FnOnce(&mut AccessPattern),
    {
        let mut patterns = self.patterns.lock().unwrap();
        match patterns.get_mut(key) {
            Some(pattern) => {
                f(pattern);
                true
            }
            None => false,
        }
    }

    /// A copy of every pattern.
    pub fn snapshot(&self) -> Vec<AccessPattern> {
        let mut all: Vec<AccessPattern> =
            self.patterns.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    pub fn len(&self) -> usize {
        self.patterns.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_store_records_nothing() {
        let store = AccessPatternStore::new(false);
        store.record_access("k", 100, StorageTier::Standard);
        assert!(store.is_empty());
    }

    #[test]
    fn first_access_creates_pattern() {
        let store = AccessPatternStore::new(true);
        store.record_access("k", 100, StorageTier::StandardIa);

        let pattern = store.get("k").unwrap();
        assert_eq!(pattern.access_count, 1);
        assert_eq!(pattern.object_size, 100);
        assert_eq!(pattern.current_tier, StorageTier::StandardIa);
        assert_eq!(pattern.mean_access_gap, Duration::ZERO);
    }

    #[test]
    fn repeat_accesses_update_counters() {
        let store = AccessPatternStore::new(true);
        store.record_access("k", 100, StorageTier::Standard);
        store.record_access("k", 200, StorageTier::Standard);
        store.record_access("k", 200, StorageTier::Standard);

        let pattern = store.get("k").unwrap();
        assert_eq!(pattern.access_count, 3);
        assert_eq!(pattern.object_size, 200);
        assert!(pattern.last_access >= pattern.first_access);
    }

    #[test]
    fn mean_gap_follows_span_over_count() {
        let store = AccessPatternStore::new(true);
        let now = SystemTime::now();
        store.seed(AccessPattern {
            key: "k".into(),
            first_access: now - Duration::from_secs(80),
            last_access: now - Duration::from_secs(40),
            access_count: 1,
            mean_access_gap: Duration::ZERO,
            object_size: 10,
            current_tier: StorageTier::Standard,
            estimated_monthly_cost: 0.0,
        });

        store.record_access("k", 10, StorageTier::Standard);
        let pattern = store.get("k").unwrap();
        assert_eq!(pattern.access_count, 2);
        // Span is ~80s over one gap.
        assert!(pattern.mean_access_gap >= Duration::from_secs(79));
        assert!(pattern.mean_access_gap <= Duration::from_secs(81));
    }

    #[test]
    fn snapshot_is_sorted_by_key() {
        let store = AccessPatternStore::new(true);
        store.record_access("b", 1, StorageTier::Standard);
        store.record_access("a", 1, StorageTier::Standard);

        let keys: Vec<String> = store.snapshot().into_iter().map(|p| p.key).collect();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }
}
