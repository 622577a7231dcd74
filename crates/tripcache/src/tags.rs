//! Reverse index from tag to the keys carrying it

use std::collections::{BTreeSet, HashMap, HashSet};

/// Tag -> keys index kept in step with the entry map.
///
/// Lookups for a set of tags touch only the keys carrying those tags, so
/// invalidation never costs more than one pass over the entries.
#[derive(Debug, Default)]
pub struct TagIndex {
    keys_by_tag: HashMap<String, HashSet<String>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `key` carries `tags`
    pub fn insert(&mut self, key: &str, tags: &BTreeSet<String>) {
        for tag in tags {
            self.keys_by_tag
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
    }

    /// Forget `key` under each of `tags`, dropping tags left empty
    pub fn remove(&mut self, key: &str, tags: &BTreeSet<String>) {
        for tag in tags {
            if let Some(keys) = self.keys_by_tag.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.keys_by_tag.remove(tag);
                }
            }
        }
    }

    /// Keys carrying at least one of `tags`, deduplicated
    pub fn keys_for<S: AsRef<str>>(&self, tags: &[S]) -> HashSet<String> {
        tags.iter()
            .filter_map(|tag| self.keys_by_tag.get(tag.as_ref()))
            .flatten()
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.keys_by_tag.clear();
    }

    /// Number of distinct tags in use
    pub fn tag_count(&self) -> usize {
        self.keys_by_tag.len()
    }
}
