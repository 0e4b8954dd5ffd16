//! Tag buckets for bulk invalidation.

use crate::key::EntryId;
use std::collections::{HashMap, HashSet};

/// Maps a tag to the entries that were tagged with it when they were stored.
///
/// Buckets are append-only until the tag is cleared. Ids of entries that were
/// removed some other way stay in their buckets; clearing the tag later finds
/// them absent and skips them.
#[derive(Debug, Default)]
pub struct TagIndex {
    buckets: HashMap<String, Vec<EntryId>>,
}

impl TagIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `id` to the bucket for `tag`.
    pub fn attach(&mut self, tag: &str, id: EntryId) {
        match self.buckets.get_mut(tag) {
            Some(bucket) => bucket.push(id),
            None => {
                self.buckets.insert(tag.to_string(), vec![id]);
            }
        }
    }

    /// Remove the whole bucket for `tag` and return its ids.
    ///
    /// The returned ids may contain duplicates and ids that are no longer live.
    pub fn take(&mut self, tag: &str) -> Vec<EntryId> {
        self.buckets.remove(tag).unwrap_or_default()
    }

    /// Ids currently in the bucket for `tag`.
    pub fn members(&self, tag: &str) -> &[EntryId] {
        self.buckets.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of non-empty buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether no tag has members.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Merge tag lists, keeping the first occurrence of each tag.
pub fn merge_tags<'a, I>(lists: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a [String]>,
{
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for tag in lists.into_iter().flatten() {
        if seen.insert(tag.as_str()) {
            merged.push(tag.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyIndex;

    #[test]
    fn test_attach_and_take() {
        let mut keys = KeyIndex::new();
        let a = keys.to_id("a");
        let b = keys.to_id("b");
        let mut tags = TagIndex::new();

        tags.attach("users", a);
        tags.attach("users", b);
        tags.attach("posts", b);
        assert_eq!(tags.members("users"), &[a, b]);
        assert_eq!(tags.len(), 2);

        assert_eq!(tags.take("users"), vec![a, b]);
        assert!(tags.members("users").is_empty());
        assert_eq!(tags.members("posts"), &[b]);
    }

    #[test]
    fn test_take_missing_tag_is_empty() {
        let mut tags = TagIndex::new();
        assert!(tags.take("nothing").is_empty());
        assert!(tags.is_empty());
    }

    #[test]
    fn test_repeated_attach_keeps_duplicates() {
        let id = KeyIndex::new().to_id("a");
        let mut tags = TagIndex::new();
        tags.attach("users", id);
        tags.attach("users", id);
        assert_eq!(tags.take("users").len(), 2);
    }

    #[test]
    fn test_merge_tags() {
        let caller = vec!["users".to_string(), "teams".to_string()];
        let computed = vec!["teams".to_string(), "roles".to_string(), "users".to_string()];
        assert_eq!(
            merge_tags([caller.as_slice(), computed.as_slice()]),
            vec!["users", "teams", "roles"]
        );
    }
}
