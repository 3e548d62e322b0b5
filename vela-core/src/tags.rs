//! Tag reconciliation - minimal add/remove diff between two tag sets
//!
//! Keys only in the old set are removed; keys only in the new set, or
//! present in both with a different value, are set. The diff is idempotent:
//! applying it a second time changes nothing.

use std::collections::BTreeMap;

/// Tag keys are unique; `BTreeMap` keeps the diff deterministic.
pub type TagMap = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagDiff {
    /// Tags to create or overwrite.
    pub set: TagMap,
    /// Keys to delete, in sorted order.
    pub remove: Vec<String>,
}

impl TagDiff {
    /// Computes the minimal operations turning `old` into `new`.
    pub fn between(old: &TagMap, new: &TagMap) -> Self {
        let mut set = TagMap::new();
        for (key, value) in new {
            if old.get(key) != Some(value) {
                set.insert(key.clone(), value.clone());
            }
        }
        let remove = old
            .keys()
            .filter(|key| !new.contains_key(*key))
            .cloned()
            .collect();
        Self { set, remove }
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty()
    }

    /// Applies the diff to a tag set. This is the contract the remote side
    /// implements with its tag/untag calls; having it here keeps the
    /// idempotence property testable.
    pub fn apply(&self, tags: &TagMap) -> TagMap {
        let mut result = tags.clone();
        for key in &self.remove {
            result.remove(key);
        }
        for (key, value) in &self.set {
            result.insert(key.clone(), value.clone());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> TagMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn diff_applied_to_old_yields_new() {
        let old = tags(&[("env", "staging"), ("team", "data"), ("drop", "me")]);
        let new = tags(&[("env", "production"), ("team", "data"), ("cost", "42")]);

        let diff = TagDiff::between(&old, &new);

        assert_eq!(diff.apply(&old), new);
        assert_eq!(diff.remove, vec!["drop".to_string()]);
        assert_eq!(diff.set, tags(&[("env", "production"), ("cost", "42")]));
    }

    #[test]
    fn diff_is_idempotent() {
        let old = tags(&[("a", "1"), ("b", "2")]);
        let new = tags(&[("b", "3"), ("c", "4")]);

        let diff = TagDiff::between(&old, &new);
        let once = diff.apply(&old);
        let twice = diff.apply(&once);

        assert_eq!(once, new);
        assert_eq!(twice, new);
    }

    #[test]
    fn equal_sets_produce_an_empty_diff() {
        let tags = tags(&[("env", "production")]);
        let diff = TagDiff::between(&tags, &tags);
        assert!(diff.is_empty());
        assert_eq!(diff.apply(&tags), tags);
    }

    #[test]
    fn empty_old_set_means_only_additions() {
        let new = tags(&[("env", "production")]);
        let diff = TagDiff::between(&TagMap::new(), &new);
        assert!(diff.remove.is_empty());
        assert_eq!(diff.set, new);
    }
}
