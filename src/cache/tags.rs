//! Tag index for bulk invalidation
//!
//! Keeps a forward map (tag -> keys) and a reverse map (key -> tags). Both
//! live under one lock so a key's tag membership can be replaced atomically.
//! The lock is never held across an await point.
//!
//! Memberships written with a TTL carry a deadline; `prune_expired` drops
//! the memberships of keys whose entries can no longer exist in any tier.

use crate::cache::types::CacheKey;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Inner {
    by_tag: HashMap<String, HashSet<CacheKey>>,
    by_key: HashMap<CacheKey, BTreeSet<String>>,
    /// Keys without a deadline keep their tags until removed
    deadlines: HashMap<CacheKey, Instant>,
}

impl Inner {
    fn link(&mut self, tag: &str, key: &str) {
        self.by_tag
            .entry(tag.to_string())
            .or_default()
            .insert(key.to_string());
        self.by_key
            .entry(key.to_string())
            .or_default()
            .insert(tag.to_string());
    }

    fn unlink(&mut self, tag: &str, key: &str) {
        if let Some(keys) = self.by_tag.get_mut(tag) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_tag.remove(tag);
            }
        }
        if let Some(tags) = self.by_key.get_mut(key) {
            tags.remove(tag);
            if tags.is_empty() {
                self.by_key.remove(key);
                self.deadlines.remove(key);
            }
        }
    }

    fn drop_key(&mut self, key: &str) -> BTreeSet<String> {
        self.deadlines.remove(key);
        let tags = self.by_key.remove(key).unwrap_or_default();
        for tag in &tags {
            if let Some(keys) = self.by_tag.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_tag.remove(tag);
                }
            }
        }
        tags
    }
}

/// Mapping from tag to the keys currently carrying it
#[derive(Debug, Default)]
pub struct TagIndex {
    inner: Mutex<Inner>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn associate(&self, tag: &str, key: &str) {
        self.inner.lock().link(tag, key);
    }

    pub fn disassociate(&self, tag: &str, key: &str) {
        self.inner.lock().unlink(tag, key);
    }

    /// Keys currently associated with `tag`
    pub fn keys_for_tag(&self, tag: &str) -> HashSet<CacheKey> {
        self.inner
            .lock()
            .by_tag
            .get(tag)
            .cloned()
            .unwrap_or_default()
    }

    /// Tags currently associated with `key`
    pub fn tags_for_key(&self, key: &str) -> BTreeSet<String> {
        self.inner
            .lock()
            .by_key
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Atomically take and clear the key set of `tag`
    ///
    /// The returned keys also lose their membership in `tag` on the reverse
    /// map; their other tags are untouched.
    pub fn remove_tag(&self, tag: &str) -> HashSet<CacheKey> {
        let mut inner = self.inner.lock();
        let keys = inner.by_tag.remove(tag).unwrap_or_default();
        for key in &keys {
            if let Some(tags) = inner.by_key.get_mut(key) {
                tags.remove(tag);
                if tags.is_empty() {
                    inner.by_key.remove(key);
                    inner.deadlines.remove(key);
                }
            }
        }
        keys
    }

    /// Make `tags` the complete tag membership of `key` for the next `ttl`
    ///
    /// Tags the key held before but not in `tags` are dropped; new ones are
    /// added. Returns `(added, removed)`.
    pub fn replace_tags(
        &self,
        key: &str,
        tags: &BTreeSet<String>,
        ttl: Duration,
    ) -> (usize, usize) {
        let mut inner = self.inner.lock();
        let old = inner.by_key.get(key).cloned().unwrap_or_default();

        let stale: Vec<&String> = old.difference(tags).collect();
        let fresh: Vec<&String> = tags.difference(&old).collect();

        for tag in &stale {
            inner.unlink(tag, key);
        }
        for tag in &fresh {
            inner.link(tag, key);
        }

        match Instant::now().checked_add(ttl) {
            Some(deadline) if !tags.is_empty() => {
                inner.deadlines.insert(key.to_string(), deadline);
            }
            _ => {
                inner.deadlines.remove(key);
            }
        }

        (fresh.len(), stale.len())
    }

    /// Drop every association of `key`, returning the tags it held
    pub fn remove_key(&self, key: &str) -> BTreeSet<String> {
        self.inner.lock().drop_key(key)
    }

    /// Drop the memberships of every key past its deadline
    ///
    /// Returns the number of keys pruned.
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired: Vec<CacheKey> = inner
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            inner.drop_key(key);
        }
        expired.len()
    }

    /// Number of tags with at least one key
    pub fn tag_count(&self) -> usize {
        self.inner.lock().by_tag.len()
    }

    /// Number of keys with at least one tag
    pub fn key_count(&self) -> usize {
        self.inner.lock().by_key.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    fn tags(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_associate_and_lookup() {
        let index = TagIndex::new();
        index.associate("tag1", "a");
        index.associate("tag1", "b");
        index.associate("tag2", "a");

        assert_eq!(index.keys_for_tag("tag1").len(), 2);
        assert_eq!(index.tags_for_key("a"), tags(&["tag1", "tag2"]));
        assert!(index.keys_for_tag("missing").is_empty());
    }

    #[test]
    fn test_disassociate_prunes_empty_sets() {
        let index = TagIndex::new();
        index.associate("tag1", "a");
        index.disassociate("tag1", "a");

        assert_eq!(index.tag_count(), 0);
        assert_eq!(index.key_count(), 0);
    }

    #[test]
    fn test_replace_tags_is_not_a_union() {
        let index = TagIndex::new();
        index.replace_tags("a", &tags(&["tag1", "tag2"]), TTL);

        let (added, removed) = index.replace_tags("a", &tags(&["tag2", "tag3"]), TTL);

        assert_eq!((added, removed), (1, 1));
        assert_eq!(index.tags_for_key("a"), tags(&["tag2", "tag3"]));
        assert!(index.keys_for_tag("tag1").is_empty());
        assert!(index.keys_for_tag("tag3").contains("a"));
    }

    #[test]
    fn test_replace_with_empty_set_clears_key() {
        let index = TagIndex::new();
        index.replace_tags("a", &tags(&["tag1"]), TTL);
        index.replace_tags("a", &BTreeSet::new(), TTL);

        assert_eq!(index.key_count(), 0);
        assert_eq!(index.tag_count(), 0);
    }

    #[test]
    fn test_remove_tag_is_take_and_clear() {
        let index = TagIndex::new();
        index.replace_tags("a", &tags(&["tag1", "tag2"]), TTL);
        index.replace_tags("b", &tags(&["tag1"]), TTL);

        let keys = index.remove_tag("tag1");

        assert_eq!(keys.len(), 2);
        assert!(index.remove_tag("tag1").is_empty());
        assert_eq!(index.tags_for_key("a"), tags(&["tag2"]));
        assert!(index.tags_for_key("b").is_empty());
    }

    #[test]
    fn test_remove_key() {
        let index = TagIndex::new();
        index.replace_tags("a", &tags(&["tag1", "tag2"]), TTL);
        index.replace_tags("b", &tags(&["tag2"]), TTL);

        let removed = index.remove_key("a");

        assert_eq!(removed, tags(&["tag1", "tag2"]));
        assert!(index.keys_for_tag("tag1").is_empty());
        assert_eq!(index.keys_for_tag("tag2").len(), 1);
        assert!(index.remove_key("a").is_empty());
    }

    #[test]
    fn test_prune_expired_drops_stale_memberships() {
        let index = TagIndex::new();
        index.replace_tags("short", &tags(&["tag1"]), Duration::from_millis(10));
        index.replace_tags("long", &tags(&["tag1"]), TTL);
        index.associate("tag2", "manual");

        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(index.prune_expired(), 1);
        assert!(index.tags_for_key("short").is_empty());
        assert!(index.keys_for_tag("tag1").contains("long"));
        assert!(index.keys_for_tag("tag2").contains("manual"));
        assert_eq!(index.prune_expired(), 0);
    }

    #[test]
    fn test_rewrite_extends_deadline() {
        let index = TagIndex::new();
        index.replace_tags("a", &tags(&["tag1"]), Duration::from_millis(10));
        index.replace_tags("a", &tags(&["tag1"]), TTL);

        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(index.prune_expired(), 0);
        assert_eq!(index.key_count(), 1);
    }

    #[test]
    fn test_unbounded_ttl_is_never_pruned() {
        let index = TagIndex::new();
        index.replace_tags("a", &tags(&["tag1"]), Duration::MAX);

        assert_eq!(index.prune_expired(), 0);
        assert_eq!(index.key_count(), 1);
    }
}
