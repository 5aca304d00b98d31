//! Tag index: bidirectional key/tag mapping with regex-filtered reads

use regex::{Regex, RegexBuilder};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Compiled key-matching pattern.
///
/// `*` alone means "match all" and short-circuits without engaging the
/// regex engine. Everything else compiles case-insensitively; a pattern
/// that fails to compile yields no `KeyPattern` and callers treat it as
/// matching nothing.
pub enum KeyPattern {
    All,
    Matching(Regex),
}

impl KeyPattern {
    pub fn compile(pattern: &str) -> Option<Self> {
        if pattern == "*" {
            return Some(KeyPattern::All);
        }
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .ok()
            .map(KeyPattern::Matching)
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::All => true,
            KeyPattern::Matching(re) => re.is_match(key),
        }
    }
}

#[derive(Default)]
struct TagMaps {
    by_tag: HashMap<String, HashSet<String>>,
    by_key: HashMap<String, String>,
}

/// Thread-safe tag membership index.
///
/// Keeps the two maps coupled: a key appears in `by_tag[t]` exactly when
/// `by_key[key] == t`. A key belongs to at most one tag; tags whose last
/// member leaves are dropped. Reads take the shared lock and return
/// snapshots independent of later mutations.
#[derive(Default)]
pub struct TagIndex {
    inner: RwLock<TagMaps>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `key` with `tag`, replacing any prior association.
    pub fn add_or_update(&self, key: &str, tag: &str) {
        let mut maps = self.inner.write().unwrap();

        if let Some(old_tag) = maps.by_key.insert(key.to_string(), tag.to_string()) {
            if old_tag != tag {
                detach(&mut maps.by_tag, &old_tag, key);
            }
        }

        maps.by_tag
            .entry(tag.to_string())
            .or_default()
            .insert(key.to_string());
    }

    /// Drop `key` from its tag, if it has one.
    pub fn remove(&self, key: &str) {
        let mut maps = self.inner.write().unwrap();
        if let Some(tag) = maps.by_key.remove(key) {
            detach(&mut maps.by_tag, &tag, key);
        }
    }

    /// Snapshot of the keys under `tag` matching `pattern`.
    ///
    /// `None` when the tag is unknown or the pattern does not compile
    /// (a bad pattern matches nothing rather than erroring).
    pub fn get_tagged_keys(&self, tag: &str, pattern: &str) -> Option<Vec<String>> {
        let pat = KeyPattern::compile(pattern)?;
        let maps = self.inner.read().unwrap();
        let members = maps.by_tag.get(tag)?;
        Some(members.iter().filter(|k| pat.matches(k)).cloned().collect())
    }

    /// The tag a key currently belongs to.
    pub fn tag_of(&self, key: &str) -> Option<String> {
        self.inner.read().unwrap().by_key.get(key).cloned()
    }

    pub fn tag_count(&self) -> usize {
        self.inner.read().unwrap().by_tag.len()
    }

    #[cfg(test)]
    fn assert_coupled(&self) {
        let maps = self.inner.read().unwrap();
        for (key, tag) in &maps.by_key {
            assert!(maps.by_tag.get(tag).is_some_and(|s| s.contains(key)));
        }
        for (tag, keys) in &maps.by_tag {
            assert!(!keys.is_empty(), "empty tag {} not dropped", tag);
            for key in keys {
                assert_eq!(maps.by_key.get(key), Some(tag));
            }
        }
    }
}

fn detach(by_tag: &mut HashMap<String, HashSet<String>>, tag: &str, key: &str) {
    if let Some(members) = by_tag.get_mut(tag) {
        members.remove(key);
        if members.is_empty() {
            by_tag.remove(tag);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_lookup() {
        let idx = TagIndex::new();
        idx.add_or_update("o1", "orders");
        idx.add_or_update("o2", "orders");

        let mut keys = idx.get_tagged_keys("orders", "*").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["o1", "o2"]);
        idx.assert_coupled();
    }

    #[test]
    fn test_retag_replaces_membership() {
        let idx = TagIndex::new();
        idx.add_or_update("k", "first");
        idx.add_or_update("k", "second");

        // The old tag lost its only member and is gone entirely.
        assert!(idx.get_tagged_keys("first", "*").is_none());
        assert_eq!(idx.get_tagged_keys("second", "*").unwrap(), vec!["k"]);
        assert_eq!(idx.tag_of("k").as_deref(), Some("second"));
        idx.assert_coupled();
    }

    #[test]
    fn test_remove_drops_empty_tag() {
        let idx = TagIndex::new();
        idx.add_or_update("k", "t");
        idx.remove("k");
        assert!(idx.get_tagged_keys("t", "*").is_none());
        assert_eq!(idx.tag_count(), 0);
        idx.assert_coupled();
    }

    #[test]
    fn test_remove_unknown_key_is_noop() {
        let idx = TagIndex::new();
        idx.add_or_update("k", "t");
        idx.remove("other");
        assert_eq!(idx.get_tagged_keys("t", "*").unwrap(), vec!["k"]);
    }

    #[test]
    fn test_pattern_filter_case_insensitive() {
        let idx = TagIndex::new();
        idx.add_or_update("Order-1", "orders");
        idx.add_or_update("invoice-1", "orders");

        let keys = idx.get_tagged_keys("orders", "^order").unwrap();
        assert_eq!(keys, vec!["Order-1"]);
    }

    #[test]
    fn test_malformed_pattern_matches_nothing() {
        let idx = TagIndex::new();
        idx.add_or_update("k", "t");
        assert!(idx.get_tagged_keys("t", "[unclosed").is_none());
    }

    #[test]
    fn test_unknown_tag_is_none() {
        let idx = TagIndex::new();
        assert!(idx.get_tagged_keys("nope", "*").is_none());
    }

    #[test]
    fn test_snapshot_independent_of_mutation() {
        let idx = TagIndex::new();
        idx.add_or_update("a", "t");
        let snap = idx.get_tagged_keys("t", "*").unwrap();
        idx.remove("a");
        assert_eq!(snap, vec!["a"]);
    }
}
