//! Accumulated host changes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Deduplicated host object ids changed or removed since the last flush.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Ids of objects that were modified or added.
    pub changed: BTreeSet<String>,
    /// Ids of objects that were deleted.
    pub removed: BTreeSet<String>,
}

impl ChangeSet {
    /// Creates an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a change set of modified ids.
    pub fn changed<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            changed: ids.into_iter().map(Into::into).collect(),
            removed: BTreeSet::new(),
        }
    }

    /// Creates a change set of deleted ids.
    pub fn removed<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            changed: BTreeSet::new(),
            removed: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Merges another change set into this one.
    pub fn merge(&mut self, other: ChangeSet) {
        self.changed.extend(other.changed);
        self.removed.extend(other.removed);
    }

    /// Returns true if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }

    /// Returns true if at least one object was deleted.
    pub fn has_deletions(&self) -> bool {
        !self.removed.is_empty()
    }

    /// Returns true if the id was changed or removed.
    pub fn contains(&self, id: &str) -> bool {
        self.changed.contains(id) || self.removed.contains(id)
    }

    /// Iterates over every changed and removed id.
    pub fn all_ids(&self) -> impl Iterator<Item = &String> {
        self.changed.iter().chain(self.removed.iter())
    }

    /// Number of distinct ids in the set.
    pub fn len(&self) -> usize {
        self.changed.union(&self.removed).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_deduplicates() {
        let mut set = ChangeSet::changed(["a", "b"]);
        set.merge(ChangeSet::changed(["b", "c"]));
        set.merge(ChangeSet::removed(["c"]));

        assert_eq!(set.changed.len(), 3);
        assert_eq!(set.len(), 3);
        assert!(set.has_deletions());
        assert!(set.contains("c"));
        assert!(!set.contains("d"));
    }

    #[test]
    fn empty_set() {
        let set = ChangeSet::new();
        assert!(set.is_empty());
        assert!(!set.has_deletions());
        assert_eq!(set.all_ids().count(), 0);
    }
}
