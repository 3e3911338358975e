//! Grouped dependency lists
//!
//! Dependencies requested by a single environment call form one group. Groups
//! keep first-request order so that dirty nodes re-check them
//! deterministically, and a key belongs to at most one group.

use hashbrown::HashSet;
use trellis_types::Key;

/// Ordered groups of distinct keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupedDeps {
    groups: Vec<Vec<Key>>,
    members: HashSet<Key>,
}

impl GroupedDeps {
    /// Create an empty set of groups
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from groups, dropping keys already seen in an earlier group
    pub fn from_groups<I, G>(groups: I) -> Self
    where
        I: IntoIterator<Item = G>,
        G: IntoIterator<Item = Key>,
    {
        let mut deps = GroupedDeps::new();
        for group in groups {
            deps.push_group(group);
        }
        deps
    }

    /// Append a group, returning the keys that were not already present.
    ///
    /// Keys already present are dropped from the group; a group left empty
    /// is not recorded.
    pub fn push_group(&mut self, group: impl IntoIterator<Item = Key>) -> Vec<Key> {
        let mut added = Vec::new();
        for key in group {
            if self.members.insert(key.clone()) {
                added.push(key);
            }
        }
        if !added.is_empty() {
            self.groups.push(added.clone());
        }
        added
    }

    /// Append every group of `other`, returning the newly added keys
    pub fn append(&mut self, other: &GroupedDeps) -> Vec<Key> {
        let mut added = Vec::new();
        for group in &other.groups {
            added.extend(self.push_group(group.iter().cloned()));
        }
        added
    }

    /// True if `key` is in any group
    pub fn contains(&self, key: &Key) -> bool {
        self.members.contains(key)
    }

    /// Groups in request order
    pub fn groups(&self) -> &[Vec<Key>] {
        &self.groups
    }

    /// Number of groups
    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    /// Number of keys across all groups
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True if no dependency was recorded
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Keys in group order
    pub fn iter(&self) -> impl Iterator<Item = &Key> {
        self.groups.iter().flatten()
    }

    /// Every key across all groups
    pub fn key_set(&self) -> &HashSet<Key> {
        &self.members
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(arg: &str) -> Key {
        Key::new("node", arg)
    }

    #[test]
    fn test_push_group_dedups() {
        let mut deps = GroupedDeps::new();
        assert_eq!(deps.push_group([key("a"), key("b")]), vec![key("a"), key("b")]);
        assert_eq!(deps.push_group([key("b"), key("c")]), vec![key("c")]);
        assert!(deps.push_group([key("a")]).is_empty());

        assert_eq!(deps.num_groups(), 2);
        assert_eq!(deps.len(), 3);
        assert_eq!(
            deps.groups(),
            &[vec![key("a"), key("b")], vec![key("c")]]
        );
    }

    #[test]
    fn test_iter_preserves_order() {
        let deps = GroupedDeps::from_groups([vec![key("z")], vec![key("y"), key("x")]]);
        let order: Vec<_> = deps.iter().map(|k| k.argument().to_string()).collect();
        assert_eq!(order, vec!["z", "y", "x"]);
    }

    #[test]
    fn test_append() {
        let mut deps = GroupedDeps::from_groups([vec![key("a")]]);
        let other = GroupedDeps::from_groups([vec![key("a"), key("b")], vec![key("c")]]);

        assert_eq!(deps.append(&other), vec![key("b"), key("c")]);
        assert!(deps.contains(&key("c")));
        assert_eq!(deps.num_groups(), 3);
    }
}
