//! Region-scoped cache abstraction and an in-memory implementation.
//!
//! The broker only consumes [`Cache`]; the backing store is a collaborator.
//! [`MemoryCache`] is the process-local store used by tests and the CLI.

use std::sync::Arc;

use dashmap::DashMap;

use crate::tokens::template::TemplateExecutable;

/// A value stored in the cache.
#[derive(Debug, Clone)]
pub enum CacheValue {
    /// String payload. `None` marks a key as known to have no value.
    Text(Option<String>),
    /// Compiled template executable, stored in its own region.
    Template(Arc<dyn TemplateExecutable>),
}

/// Region + key addressed store shared by all in-flight calls.
///
/// Implementations must be safe for concurrent `get`/`set` from many tasks.
pub trait Cache: Send + Sync {
    /// Look up an entry. `None` means the key has never been set in this region.
    fn get(&self, region: &str, key: &str) -> Option<CacheValue>;

    /// Insert or replace an entry.
    fn set(&self, region: &str, key: &str, value: CacheValue);

    /// Remove all entries of a region.
    fn clear_region(&self, region: &str);

    /// Reads a string entry. The outer `Option` is entry presence, the inner
    /// one is the stored value (which may be the "no value" sentinel).
    fn get_text(&self, region: &str, key: &str) -> Option<Option<String>> {
        match self.get(region, key) {
            Some(CacheValue::Text(value)) => Some(value),
            _ => None,
        }
    }

    /// Stores a string entry.
    fn set_text(&self, region: &str, key: &str, value: Option<String>) {
        self.set(region, key, CacheValue::Text(value));
    }
}

/// In-memory [`Cache`] backed by [`DashMap`].
///
/// Entries never expire; a region lives until [`Cache::clear_region`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<(String, String), CacheValue>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries across all regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Cache for MemoryCache {
    fn get(&self, region: &str, key: &str) -> Option<CacheValue> {
        self.entries
            .get(&(region.to_string(), key.to_string()))
            .map(|entry| entry.value().clone())
    }

    fn set(&self, region: &str, key: &str, value: CacheValue) {
        self.entries
            .insert((region.to_string(), key.to_string()), value);
    }

    fn clear_region(&self, region: &str) {
        self.entries.retain(|(entry_region, _), _| entry_region != region);
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn get_returns_none_for_missing_key() {
        let cache = MemoryCache::new();
        assert!(cache.get("region", "missing").is_none());
        assert!(cache.get_text("region", "missing").is_none());
    }

    #[test]
    fn sentinel_is_distinguishable_from_missing() {
        let cache = MemoryCache::new();
        cache.set_text("region", "key", None);
        assert_eq!(cache.get_text("region", "key"), Some(None));
    }

    #[test]
    fn regions_are_isolated() {
        let cache = MemoryCache::new();
        cache.set_text("a", "key", Some("one".to_string()));
        cache.set_text("b", "key", Some("two".to_string()));

        assert_eq!(cache.get_text("a", "key"), Some(Some("one".to_string())));
        assert_eq!(cache.get_text("b", "key"), Some(Some("two".to_string())));
    }

    #[test]
    fn clear_region_leaves_other_regions() {
        let cache = MemoryCache::new();
        cache.set_text("session", "x", Some("1".to_string()));
        cache.set_text("session", "y", Some("2".to_string()));
        cache.set_text("other", "x", Some("3".to_string()));

        cache.clear_region("session");

        assert!(cache.get("session", "x").is_none());
        assert!(cache.get("session", "y").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn set_replaces_existing_entry() {
        let cache = MemoryCache::new();
        cache.set_text("r", "k", Some("old".to_string()));
        cache.set_text("r", "k", Some("new".to_string()));
        assert_eq!(cache.get_text("r", "k"), Some(Some("new".to_string())));
    }

    #[test]
    fn clear_region_does_not_match_by_prefix() {
        let cache = MemoryCache::new();
        cache.set_text("a", "k", Some("1".to_string()));
        cache.set_text("a-b", "k", Some("2".to_string()));

        cache.clear_region("a");

        assert_eq!(cache.get_text("a-b", "k"), Some(Some("2".to_string())));
    }

    proptest! {
        #[test]
        fn clear_region_only_removes_its_own_keys(
            keys in proptest::collection::vec(("[a-c]{1,2}", "[a-z]{1,4}"), 1..20),
            target in "[a-c]{1,2}",
        ) {
            let cache = MemoryCache::new();
            for (region, key) in &keys {
                cache.set_text(region, key, Some(key.clone()));
            }

            cache.clear_region(&target);

            for (region, key) in &keys {
                let present = cache.get(region, key).is_some();
                prop_assert_eq!(present, region != &target);
            }
        }
    }
}
