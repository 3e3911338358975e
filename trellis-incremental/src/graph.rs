//! Graph storage
//!
//! The evaluator reaches node entries only through the [`Graph`] trait.
//! [`InMemoryGraph`] is the default backing: a concurrent map of
//! individually locked entries.

use crate::node::NodeEntry;
use dashmap::DashMap;
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use trellis_types::{Key, Version};

/// Shared, individually locked node entry
pub type NodeHandle = Arc<Mutex<NodeEntry>>;

/// What a graph knows about the doneness of a node's dependencies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepsReport {
    /// Nothing is known; every dependency must be looked up
    NoInformation,
    /// These dependencies are done at or before the parent's last evaluated
    /// version and can be signaled without scheduling
    KnownDone(HashSet<Key>),
}

/// Storage contract for node entries
pub trait Graph: Send + Sync + fmt::Debug {
    /// Look up an existing entry
    fn get(&self, key: &Key) -> Option<NodeHandle>;

    /// Look up existing entries; absent keys are omitted
    fn get_batch(&self, keys: &[Key]) -> HashMap<Key, NodeHandle> {
        keys.iter()
            .filter_map(|key| self.get(key).map(|handle| (key.clone(), handle)))
            .collect()
    }

    /// Return entries for `keys`, atomically creating the missing ones
    fn create_if_absent_batch(&self, keys: &[Key]) -> HashMap<Key, NodeHandle>;

    /// Report which of `deps` are already done at or before
    /// `last_evaluated`.
    fn analyze_deps_doneness(
        &self,
        _parent: &Key,
        _last_evaluated: Version,
        _deps: &[Key],
    ) -> DepsReport {
        DepsReport::NoInformation
    }

    /// Every key in the graph
    fn keys(&self) -> Vec<Key>;
}

/// Graph held in process memory
#[derive(Default)]
pub struct InMemoryGraph {
    entries: DashMap<Key, NodeHandle>,
}

impl InMemoryGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop an entry. Callers must keep the edges of the remaining entries
    /// consistent.
    pub fn remove(&self, key: &Key) -> Option<NodeHandle> {
        self.entries.remove(key).map(|(_, handle)| handle)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the graph has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Graph for InMemoryGraph {
    fn get(&self, key: &Key) -> Option<NodeHandle> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn create_if_absent_batch(&self, keys: &[Key]) -> HashMap<Key, NodeHandle> {
        keys.iter()
            .map(|key| {
                let handle = self
                    .entries
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(NodeEntry::new())));
                (key.clone(), Arc::clone(handle.value()))
            })
            .collect()
    }

    fn analyze_deps_doneness(
        &self,
        _parent: &Key,
        last_evaluated: Version,
        deps: &[Key],
    ) -> DepsReport {
        let done = deps
            .iter()
            .filter(|key| {
                self.get(key).is_some_and(|handle| {
                    let entry = handle.lock();
                    entry.is_done() && entry.version().at_most(last_evaluated)
                })
            })
            .cloned()
            .collect();
        DepsReport::KnownDone(done)
    }

    fn keys(&self) -> Vec<Key> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl fmt::Debug for InMemoryGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryGraph")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_create_if_absent_returns_same_entry() {
        let graph = InMemoryGraph::new();
        let key = Key::new("file", "a.txt");

        let first = graph.create_if_absent_batch(std::slice::from_ref(&key));
        let second = graph.create_if_absent_batch(std::slice::from_ref(&key));

        assert!(Arc::ptr_eq(&first[&key], &second[&key]));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_get_batch_omits_absent_keys() {
        let graph = InMemoryGraph::new();
        let a = Key::new("file", "a");
        graph.create_if_absent_batch(std::slice::from_ref(&a));

        let found = graph.get_batch(&[a.clone(), Key::new("file", "b")]);
        assert_eq!(found.len(), 1);
        assert!(found.contains_key(&a));
    }

    #[test]
    fn test_analyze_deps_doneness() {
        let graph = InMemoryGraph::new();
        let old = Key::new("file", "old");
        let fresh = Key::new("file", "fresh");
        let pending = Key::new("file", "pending");
        let handles = graph.create_if_absent_batch(&[old.clone(), fresh.clone(), pending.clone()]);
        handles[&old].lock().inject(Value::new(1_u8), Version(1));
        handles[&fresh].lock().inject(Value::new(2_u8), Version(3));

        let report = graph.analyze_deps_doneness(
            &Key::new("dir", "."),
            Version(2),
            &[old.clone(), fresh, pending],
        );
        assert_eq!(report, DepsReport::KnownDone(HashSet::from([old])));
    }

    #[test]
    fn test_remove() {
        let graph = InMemoryGraph::new();
        let key = Key::new("file", "a");
        graph.create_if_absent_batch(std::slice::from_ref(&key));

        assert!(graph.remove(&key).is_some());
        assert!(graph.get(&key).is_none());
        assert!(graph.is_empty());
    }
}
