//! Dirty-state propagation
//!
//! Invalidations and injections requested between evaluations are recorded
//! in [`PendingChanges`] and applied at the start of the next evaluation.
//! Changed nodes are marked for rebuilding and everything that transitively
//! depends on them is marked dirty so it re-checks its dependencies.

use crate::events::ProgressReceiver;
use crate::graph::Graph;
use crate::node::DirtyKind;
use crate::value::Value;
use std::collections::BTreeMap;
use tracing::debug;
use trellis_types::{Key, Version};

/// Changes waiting for the next evaluation
#[derive(Debug, Default)]
pub(crate) struct PendingChanges {
    invalidated: Vec<Key>,
    injected: BTreeMap<Key, Value>,
}

/// Counts from one propagation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PropagationStats {
    pub(crate) changed: usize,
    pub(crate) dirtied: usize,
}

impl PendingChanges {
    pub(crate) fn invalidate(&mut self, keys: impl IntoIterator<Item = Key>) {
        self.invalidated.extend(keys);
    }

    /// Record an injection; a later injection of the same key wins
    pub(crate) fn inject(&mut self, key: Key, value: Value) {
        self.injected.insert(key, value);
    }

    /// Apply and clear the pending changes at `version`.
    pub(crate) fn propagate(
        &mut self,
        graph: &dyn Graph,
        version: Version,
        progress: &dyn ProgressReceiver,
    ) -> PropagationStats {
        let mut stats = PropagationStats::default();
        let mut frontier: Vec<Key> = Vec::new();

        let injected = std::mem::take(&mut self.injected);
        let keys: Vec<Key> = injected.keys().cloned().collect();
        let handles = graph.create_if_absent_batch(&keys);
        for (key, value) in injected {
            let Some(handle) = handles.get(&key) else {
                continue;
            };
            let outcome = handle.lock().inject(value, version);
            for dep in &outcome.stale_deps {
                if let Some(dep) = graph.get(dep) {
                    dep.lock().remove_reverse_dep(&key);
                }
            }
            progress.invalidated(&key, DirtyKind::Changed);
            stats.changed += 1;
            frontier.extend(outcome.reverse_deps);
        }

        for key in std::mem::take(&mut self.invalidated) {
            let Some(handle) = graph.get(&key) else {
                continue;
            };
            let dirtied = handle.lock().mark_dirty(DirtyKind::Changed);
            if let Some(rdeps) = dirtied {
                progress.invalidated(&key, DirtyKind::Changed);
                stats.changed += 1;
                frontier.extend(rdeps);
            }
        }

        while let Some(key) = frontier.pop() {
            let Some(handle) = graph.get(&key) else {
                continue;
            };
            let dirtied = handle.lock().mark_dirty(DirtyKind::Dirty);
            if let Some(rdeps) = dirtied {
                progress.invalidated(&key, DirtyKind::Dirty);
                stats.dirtied += 1;
                frontier.extend(rdeps);
            }
        }

        debug!(
            changed = stats.changed,
            dirtied = stats.dirtied,
            %version,
            "propagated invalidations"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::GroupedDeps;
    use crate::events::NullProgressReceiver;
    use crate::graph::InMemoryGraph;
    use crate::node::{DirtyState, NodeStatus};

    fn key(arg: &str) -> Key {
        Key::new("node", arg)
    }

    /// leaf <- mid <- top, all done at version 1
    fn chain() -> InMemoryGraph {
        let graph = InMemoryGraph::new();
        let handles = graph.create_if_absent_batch(&[key("leaf"), key("mid"), key("top")]);
        handles[&key("leaf")].lock().inject(Value::new(1_i64), Version(1));
        for (child, parent) in [("leaf", "mid"), ("mid", "top")] {
            let mut entry = handles[&key(parent)].lock();
            entry.add_reverse_dep_and_check_if_done(None);
            entry.add_temporary_direct_deps(&GroupedDeps::from_groups([vec![key(child)]]));
            handles[&key(child)]
                .lock()
                .add_reverse_dep_and_check_if_done(Some(&key(parent)));
            entry.signal_dep(Version(1));
            entry
                .set_value(&key(parent), Some(Value::new(1_i64)), None, Version(1))
                .unwrap();
        }
        graph
    }

    fn status(graph: &InMemoryGraph, arg: &str) -> NodeStatus {
        graph.get(&key(arg)).unwrap().lock().status()
    }

    #[test]
    fn test_invalidate_dirties_transitive_rdeps() {
        let graph = chain();
        let mut pending = PendingChanges::default();
        pending.invalidate([key("leaf")]);

        let stats = pending.propagate(&graph, Version(2), &NullProgressReceiver);

        assert_eq!(stats, PropagationStats { changed: 1, dirtied: 2 });
        assert_eq!(status(&graph, "leaf"), NodeStatus::Dirty(DirtyState::NeedsRebuilding));
        assert_eq!(status(&graph, "mid"), NodeStatus::Dirty(DirtyState::CheckDependencies));
        assert_eq!(status(&graph, "top"), NodeStatus::Dirty(DirtyState::CheckDependencies));
        assert!(pending.invalidated.is_empty() && pending.injected.is_empty());
    }

    #[test]
    fn test_inject_dirties_rdeps_even_when_equal() {
        let graph = chain();
        let mut pending = PendingChanges::default();
        pending.inject(key("leaf"), Value::new(1_i64));

        pending.propagate(&graph, Version(2), &NullProgressReceiver);

        let leaf = graph.get(&key("leaf")).unwrap();
        assert_eq!(leaf.lock().status(), NodeStatus::Done);
        assert_eq!(leaf.lock().version(), Version(1));
        assert_eq!(status(&graph, "mid"), NodeStatus::Dirty(DirtyState::CheckDependencies));
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let graph = chain();
        let mut pending = PendingChanges::default();
        pending.invalidate([key("nowhere")]);

        let stats = pending.propagate(&graph, Version(2), &NullProgressReceiver);
        assert_eq!(stats, PropagationStats::default());
    }
}
