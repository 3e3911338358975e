//! Dependency cycle detection
//!
//! When the work queue drains while requested roots are still unfinished,
//! the unfinished part of the graph must contain a cycle. [`CycleDetector`]
//! walks it without recursion and produces the cycle errors to commit.

use crate::error::{ErrorInfo, InternalError};
use crate::graph::Graph;
use hashbrown::{HashMap, HashSet};
use std::fmt;
use tracing::debug;
use trellis_types::Key;

/// A dependency cycle as seen from one node
///
/// `path_to_cycle` leads from the node to the first key of `cycle`; it is
/// empty when the node itself is on the cycle, in which case `cycle` starts
/// with the node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CycleInfo {
    path_to_cycle: Vec<Key>,
    cycle: Vec<Key>,
}

impl CycleInfo {
    /// Build a report from the path leading to the cycle and the cycle itself
    pub fn new(path_to_cycle: Vec<Key>, cycle: Vec<Key>) -> Self {
        CycleInfo {
            path_to_cycle,
            cycle,
        }
    }

    /// Keys from the root down to the first cycle member
    pub fn path_to_cycle(&self) -> &[Key] {
        &self.path_to_cycle
    }

    /// Cycle members, rotated to start at the smallest key
    pub fn cycle(&self) -> &[Key] {
        &self.cycle
    }

    /// The same cycle as reported by `key`, a node that depends on it.
    pub fn seen_from(&self, key: &Key) -> CycleInfo {
        if let Some(pos) = self.cycle.iter().position(|k| k == key) {
            let mut cycle = self.cycle.clone();
            cycle.rotate_left(pos);
            return CycleInfo::new(Vec::new(), cycle);
        }
        if let Some(pos) = self.path_to_cycle.iter().position(|k| k == key) {
            return CycleInfo::new(self.path_to_cycle[pos..].to_vec(), self.cycle.clone());
        }
        let mut path = Vec::with_capacity(self.path_to_cycle.len() + 1);
        path.push(key.clone());
        path.extend(self.path_to_cycle.iter().cloned());
        CycleInfo::new(path, self.cycle.clone())
    }

    /// Multi-line report of the cycle
    pub fn report(&self) -> String {
        let mut lines = vec!["cycle in dependency graph:".to_string()];
        lines.extend(self.path_to_cycle.iter().map(|key| format!("    {key}")));
        if let Some(first) = self.cycle.first() {
            lines.push(format!(".-> {first}"));
            lines.extend(self.cycle[1..].iter().map(|key| format!("|   {key}")));
            lines.push(format!("`-- {first}"));
        }
        lines.join("\n")
    }
}

impl fmt::Display for CycleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for key in &self.path_to_cycle {
            write!(f, "{key} -> ")?;
        }
        write!(f, "[")?;
        for key in &self.cycle {
            write!(f, "{key} -> ")?;
        }
        match self.cycle.first() {
            Some(first) => write!(f, "{first}]"),
            None => write!(f, "]"),
        }
    }
}

struct Frame {
    key: Key,
    children: Vec<Key>,
    next: usize,
    cycles: Vec<CycleInfo>,
}

/// Finds the cycles that stall a set of unfinished roots
pub(crate) struct CycleDetector<'a> {
    graph: &'a dyn Graph,
    max_cycles: usize,
}

impl<'a> CycleDetector<'a> {
    pub(crate) fn new(graph: &'a dyn Graph, max_cycles: usize) -> Self {
        CycleDetector { graph, max_cycles }
    }

    /// Walk the temporary deps of every unfinished node reachable from
    /// `roots` and compute its cycle error.
    ///
    /// Errors come back in post-order: a node follows every node it depends
    /// on, except the ones closing a cycle through it.
    pub(crate) fn detect(&self, roots: &[Key]) -> Result<Vec<(Key, ErrorInfo)>, InternalError> {
        let mut finished: HashMap<Key, Vec<CycleInfo>> = HashMap::new();
        let mut order = Vec::new();

        for root in roots {
            if finished.contains_key(root) {
                continue;
            }
            let Some(children) = self.unfinished_children(root)? else {
                continue;
            };
            let mut stack = vec![Frame {
                key: root.clone(),
                children,
                next: 0,
                cycles: Vec::new(),
            }];
            let mut on_path: HashSet<Key> = HashSet::from([root.clone()]);

            while let Some(top) = stack.len().checked_sub(1) {
                let frame = &mut stack[top];
                if let Some(child) = frame.children.get(frame.next).cloned() {
                    frame.next += 1;
                    if on_path.contains(&child) {
                        let start = stack
                            .iter()
                            .position(|f| f.key == child)
                            .unwrap_or(top);
                        let cycle = stack[start..].iter().map(|f| f.key.clone()).collect();
                        stack[top].cycles.push(CycleInfo::new(Vec::new(), cycle));
                    } else if let Some(cycles) = finished.get(&child) {
                        stack[top].cycles.extend(cycles.iter().cloned());
                    } else if let Some(children) = self.unfinished_children(&child)? {
                        on_path.insert(child.clone());
                        stack.push(Frame {
                            key: child,
                            children,
                            next: 0,
                            cycles: Vec::new(),
                        });
                    }
                    continue;
                }

                let Some(frame) = stack.pop() else { break };
                on_path.remove(&frame.key);
                let cycles = self.collect_cycles(&frame.key, frame.cycles);
                if cycles.is_empty() {
                    return Err(InternalError::NoCycleFound { key: frame.key });
                }
                debug!(key = %frame.key, cycles = cycles.len(), "node is on or above a cycle");
                if let Some(parent) = stack.last_mut() {
                    parent.cycles.extend(cycles.iter().cloned());
                }
                finished.insert(frame.key.clone(), cycles.clone());
                order.push((frame.key, ErrorInfo::from_cycles(cycles)));
            }
        }
        Ok(order)
    }

    fn collect_cycles(&self, key: &Key, found: Vec<CycleInfo>) -> Vec<CycleInfo> {
        let mut cycles: Vec<CycleInfo> = Vec::new();
        for cycle in found {
            let cycle = cycle.seen_from(key);
            if !cycles.contains(&cycle) {
                cycles.push(cycle);
            }
            if cycles.len() == self.max_cycles {
                break;
            }
        }
        cycles
    }

    /// Temporary deps of `key`, or `None` if it is done.
    fn unfinished_children(&self, key: &Key) -> Result<Option<Vec<Key>>, InternalError> {
        let handle = self
            .graph
            .get(key)
            .ok_or_else(|| InternalError::MissingEntry { key: key.clone() })?;
        let entry = handle.lock();
        if entry.is_done() {
            return Ok(None);
        }
        Ok(Some(
            entry
                .temporary_direct_deps()
                .map(|deps| deps.iter().cloned().collect())
                .unwrap_or_default(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::GroupedDeps;
    use crate::graph::InMemoryGraph;

    fn key(arg: &str) -> Key {
        Key::new("node", arg)
    }

    fn keys(args: &[&str]) -> Vec<Key> {
        args.iter().map(|a| key(a)).collect()
    }

    /// Build a stalled graph: every node started, every edge registered but
    /// never signaled.
    fn stalled(edges: &[(&str, &str)]) -> InMemoryGraph {
        let graph = InMemoryGraph::new();
        for (from, to) in edges {
            let handles = graph.create_if_absent_batch(&[key(from), key(to)]);
            {
                let mut parent = handles[&key(from)].lock();
                parent.add_reverse_dep_and_check_if_done(None);
                parent.add_temporary_direct_deps(&GroupedDeps::from_groups([vec![key(to)]]));
            }
            handles[&key(to)]
                .lock()
                .add_reverse_dep_and_check_if_done(Some(&key(from)));
        }
        graph
    }

    #[test]
    fn test_seen_from_rotates_cycle() {
        let info = CycleInfo::new(Vec::new(), keys(&["x", "y", "z"]));
        assert_eq!(info.seen_from(&key("y")).cycle(), keys(&["y", "z", "x"]));
        assert!(info.seen_from(&key("y")).path_to_cycle().is_empty());
    }

    #[test]
    fn test_seen_from_extends_path() {
        let info = CycleInfo::new(keys(&["b"]), keys(&["x"]));
        let from_a = info.seen_from(&key("a"));
        assert_eq!(from_a.path_to_cycle(), keys(&["a", "b"]));
        assert_eq!(from_a.seen_from(&key("b")), info);
    }

    #[test]
    fn test_display() {
        let info = CycleInfo::new(keys(&["r"]), keys(&["x", "y"]));
        assert_eq!(info.to_string(), "node:r -> [node:x -> node:y -> node:x]");
    }

    #[test]
    fn test_report() {
        let info = CycleInfo::new(keys(&["root"]), keys(&["x", "y", "z"]));
        insta::assert_snapshot!(info.report(), @r"
cycle in dependency graph:
    node:root
.-> node:x
|   node:y
|   node:z
`-- node:x
");
    }

    #[test]
    fn test_detect_three_cycle_below_root() {
        let graph = stalled(&[("r", "x"), ("x", "y"), ("y", "z"), ("z", "x")]);
        let errors = CycleDetector::new(&graph, 20).detect(&[key("r")]).unwrap();

        let order: Vec<_> = errors.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(order, keys(&["z", "y", "x", "r"]));

        let by_key: HashMap<_, _> = errors.into_iter().collect();
        assert_eq!(by_key[&key("y")].cycles()[0].cycle(), keys(&["y", "z", "x"]));
        let root = &by_key[&key("r")].cycles()[0];
        assert_eq!(root.path_to_cycle(), keys(&["r"]));
        assert_eq!(root.cycle(), keys(&["x", "y", "z"]));
    }

    #[test]
    fn test_detect_self_cycle() {
        let graph = stalled(&[("s", "s")]);
        let errors = CycleDetector::new(&graph, 20).detect(&[key("s")]).unwrap();

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].1.cycles()[0].cycle(), keys(&["s"]));
    }

    #[test]
    fn test_detect_caps_reported_cycles() {
        let graph = stalled(&[("a", "b"), ("b", "a"), ("a", "c"), ("c", "a")]);
        let errors = CycleDetector::new(&graph, 1).detect(&[key("a")]).unwrap();

        let (last_key, last) = errors.last().unwrap();
        assert_eq!(last_key, &key("a"));
        assert_eq!(last.cycles().len(), 1);
    }

    #[test]
    fn test_stall_without_cycle_is_internal_error() {
        let graph = stalled(&[]);
        graph.create_if_absent_batch(&[key("lonely")])[&key("lonely")]
            .lock()
            .add_reverse_dep_and_check_if_done(None);

        assert_eq!(
            CycleDetector::new(&graph, 20).detect(&[key("lonely")]),
            Err(InternalError::NoCycleFound { key: key("lonely") })
        );
    }
}
