//! Node entries
//!
//! A [`NodeEntry`] is the per-key record stored in the graph: the last
//! committed value or error, its dependency edges, and the transient
//! bookkeeping used while the node is being (re-)evaluated.
//!
//! An entry is mutated only through its own lock and no method touches any
//! other entry, so callers never hold two entry locks at once.

use crate::deps::GroupedDeps;
use crate::error::{ErrorInfo, InternalError};
use crate::value::Value;
use hashbrown::HashSet;
use std::sync::Arc;
use trellis_types::{Key, Version};

/// Sub-state of a node that had a value and may be stale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirtyState {
    /// Re-checking the recorded dependency groups one at a time
    CheckDependencies,
    /// Every recorded dependency is unchanged; the old value stands
    VerifiedClean,
    /// Some dependency changed; the function must run again
    NeedsRebuilding,
    /// The function is being run again
    Rebuilding,
}

/// Externally visible status of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Created but never requested for evaluation
    NotStarted,
    /// Being built for the first time
    Evaluating,
    /// Had a value and awaits re-validation
    Dirty(DirtyState),
    /// Done with a value
    Done,
    /// Done with an error
    Error,
}

/// Answer to a parent registering itself on a dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyState {
    /// The dependency is done at this version; signal the parent now
    Done(Version),
    /// Someone already scheduled the dependency; it will signal the parent
    AlreadyEvaluating,
    /// The caller must enqueue the dependency
    NeedsScheduling,
}

/// Reason a done node is being invalidated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirtyKind {
    /// A dependency may have changed; re-check before rebuilding
    Dirty,
    /// The node itself changed; rebuild unconditionally
    Changed,
}

/// What a commit hands back to the scheduler
#[derive(Debug)]
pub(crate) struct CommitOutcome {
    /// Parents waiting on this node
    pub(crate) reverse_deps_to_signal: Vec<Key>,
    /// Deps of the previous evaluation that were not requested again
    pub(crate) stale_deps: Vec<Key>,
    /// Version to signal parents with
    pub(crate) version: Version,
}

/// What injecting a value hands back to the dirty propagator
#[derive(Debug)]
pub(crate) struct InjectOutcome {
    pub(crate) stale_deps: Vec<Key>,
    pub(crate) reverse_deps: Vec<Key>,
}

#[derive(Debug, Clone)]
struct DirtyBuildingState {
    kind: DirtyKind,
    state: DirtyState,
    next_group: usize,
}

#[derive(Debug, Clone, Default)]
struct BuildingState {
    evaluating: bool,
    signaled_deps: usize,
    temporary_deps: GroupedDeps,
    reverse_deps_to_signal: HashSet<Key>,
    dirty: Option<DirtyBuildingState>,
}

impl BuildingState {
    fn dirty(kind: DirtyKind, state: DirtyState) -> Self {
        BuildingState {
            dirty: Some(DirtyBuildingState {
                kind,
                state,
                next_group: 0,
            }),
            ..BuildingState::default()
        }
    }

    fn is_ready(&self) -> bool {
        self.signaled_deps == self.temporary_deps.len()
    }
}

/// Per-key evaluation state
///
/// The last committed value, error and direct deps are kept while the node
/// is dirty, so a node that verifies clean is restored without running its
/// function.
#[derive(Debug, Clone, Default)]
pub struct NodeEntry {
    value: Option<Value>,
    error: Option<Arc<ErrorInfo>>,
    version: Version,
    last_evaluated: Version,
    direct_deps: GroupedDeps,
    reverse_deps: HashSet<Key>,
    building: Option<BuildingState>,
}

impl NodeEntry {
    /// Create an entry that has never been evaluated
    pub fn new() -> Self {
        Self::default()
    }

    /// Coarse lifecycle state
    pub fn status(&self) -> NodeStatus {
        match &self.building {
            None if self.error.is_some() => NodeStatus::Error,
            None if self.value.is_some() => NodeStatus::Done,
            None => NodeStatus::NotStarted,
            Some(building) => match &building.dirty {
                Some(dirty) => NodeStatus::Dirty(dirty.state),
                None => NodeStatus::Evaluating,
            },
        }
    }

    /// True once a value or error is committed
    pub fn is_done(&self) -> bool {
        self.building.is_none() && (self.value.is_some() || self.error.is_some())
    }

    /// True while the entry is being re-checked or rebuilt
    pub fn is_dirty(&self) -> bool {
        self.building.as_ref().is_some_and(|b| b.dirty.is_some())
    }

    /// True once every dependency registered so far has signaled
    pub fn is_ready(&self) -> bool {
        self.building.as_ref().is_some_and(BuildingState::is_ready)
    }

    /// Progress of the dirty check, if dirty
    pub fn dirty_state(&self) -> Option<DirtyState> {
        self.building
            .as_ref()
            .and_then(|b| b.dirty.as_ref())
            .map(|d| d.state)
    }

    /// Committed value, if done without error
    pub fn value(&self) -> Option<&Value> {
        if self.is_done() {
            self.value.as_ref()
        } else {
            None
        }
    }

    /// Committed error, if done with one
    pub fn error(&self) -> Option<&Arc<ErrorInfo>> {
        if self.is_done() {
            self.error.as_ref()
        } else {
            None
        }
    }

    /// Version at which the value last changed
    pub fn version(&self) -> Version {
        self.version
    }

    /// Version at which the node was last built or verified clean
    pub fn last_evaluated_version(&self) -> Version {
        self.last_evaluated
    }

    /// Dependencies recorded by the last completed evaluation
    pub fn direct_deps(&self) -> &GroupedDeps {
        &self.direct_deps
    }

    /// Nodes whose last build read this one
    pub fn reverse_deps(&self) -> &HashSet<Key> {
        &self.reverse_deps
    }

    /// Dependencies registered by the evaluation in progress
    pub fn temporary_direct_deps(&self) -> Option<&GroupedDeps> {
        self.building.as_ref().map(|b| &b.temporary_deps)
    }

    /// Parents currently waiting for this node
    pub fn in_progress_reverse_deps(&self) -> Vec<Key> {
        self.building
            .as_ref()
            .map(|b| b.reverse_deps_to_signal.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Register `parent` as depending on this node and report whether the
    /// parent can be signaled right away.
    ///
    /// Called with `None` for requested roots.
    pub fn add_reverse_dep_and_check_if_done(&mut self, parent: Option<&Key>) -> DependencyState {
        if let Some(parent) = parent {
            self.reverse_deps.insert(parent.clone());
        }
        if self.is_done() {
            return DependencyState::Done(self.version);
        }
        let building = self.building.get_or_insert_with(BuildingState::default);
        if let Some(parent) = parent {
            building.reverse_deps_to_signal.insert(parent.clone());
        }
        if building.evaluating {
            DependencyState::AlreadyEvaluating
        } else {
            building.evaluating = true;
            DependencyState::NeedsScheduling
        }
    }

    /// Remove `key` from the reverse deps, returning whether it was present
    pub fn remove_reverse_dep(&mut self, key: &Key) -> bool {
        if let Some(building) = self.building.as_mut() {
            building.reverse_deps_to_signal.remove(key);
        }
        self.reverse_deps.remove(key)
    }

    /// Record that one registered dependency is done at `child_version`.
    ///
    /// Returns true if this was the last outstanding dependency, in which
    /// case the caller is responsible for enqueueing the node.
    pub fn signal_dep(&mut self, child_version: Version) -> bool {
        let last_evaluated = self.last_evaluated;
        let num_groups = self.direct_deps.num_groups();
        let Some(building) = self.building.as_mut() else {
            return false;
        };
        building.signaled_deps += 1;
        debug_assert!(building.signaled_deps <= building.temporary_deps.len());
        let ready = building.is_ready();
        if let Some(dirty) = building.dirty.as_mut() {
            if dirty.state == DirtyState::CheckDependencies {
                if !child_version.at_most(last_evaluated) {
                    dirty.state = DirtyState::NeedsRebuilding;
                } else if ready && dirty.next_group == num_groups {
                    dirty.state = DirtyState::VerifiedClean;
                }
            }
        }
        ready
    }

    /// Next recorded group to re-check, or `None` once all were checked.
    ///
    /// Exhausting the groups while still checking marks the node clean.
    pub fn next_dirty_direct_deps(&mut self) -> Option<Vec<Key>> {
        let group = {
            let dirty = self.building.as_mut()?.dirty.as_mut()?;
            if dirty.state != DirtyState::CheckDependencies {
                return None;
            }
            match self.direct_deps.groups().get(dirty.next_group) {
                Some(group) => {
                    dirty.next_group += 1;
                    Some(group.clone())
                }
                None => {
                    dirty.state = DirtyState::VerifiedClean;
                    None
                }
            }
        };
        group
    }

    /// Re-register a previously recorded group while checking a dirty node
    pub fn add_temporary_direct_deps_group_to_dirty_entry(&mut self, group: &[Key]) {
        if let Some(building) = self.building.as_mut() {
            building.temporary_deps.push_group(group.iter().cloned());
        }
    }

    /// Append newly requested groups, returning the keys not seen before
    pub fn add_temporary_direct_deps(&mut self, deps: &GroupedDeps) -> Vec<Key> {
        match self.building.as_mut() {
            Some(building) => building.temporary_deps.append(deps),
            None => Vec::new(),
        }
    }

    /// Deps of the previous evaluation not yet re-registered in this one
    pub fn all_remaining_dirty_direct_deps(&self) -> HashSet<Key> {
        match &self.building {
            Some(building) if building.dirty.is_some() => self
                .direct_deps
                .iter()
                .filter(|key| !building.temporary_deps.contains(key))
                .cloned()
                .collect(),
            _ => HashSet::new(),
        }
    }

    /// Move a dirty node that needs rebuilding into the rebuilding state
    pub fn mark_rebuilding(&mut self) {
        if let Some(dirty) = self.building.as_mut().and_then(|b| b.dirty.as_mut()) {
            if dirty.state != DirtyState::Rebuilding {
                dirty.state = DirtyState::Rebuilding;
            }
        }
    }

    /// Skip the remaining checks and rebuild
    pub fn force_rebuild(&mut self) {
        if let Some(dirty) = self.building.as_mut().and_then(|b| b.dirty.as_mut()) {
            dirty.state = DirtyState::Rebuilding;
        }
    }

    /// Restore the previous value of a verified-clean node.
    ///
    /// Returns the parents to signal; they are signaled with the node's
    /// unchanged version.
    pub(crate) fn mark_clean(&mut self, version: Version) -> Vec<Key> {
        let Some(building) = self.building.take() else {
            return Vec::new();
        };
        debug_assert_eq!(
            building.dirty.as_ref().map(|d| d.state),
            Some(DirtyState::VerifiedClean)
        );
        self.direct_deps = building.temporary_deps;
        self.last_evaluated = version;
        building.reverse_deps_to_signal.into_iter().collect()
    }

    /// Commit the outcome of a function run.
    ///
    /// The node must be building and every registered dependency must have
    /// signaled. The version only advances when the outcome differs from
    /// the previous one.
    pub(crate) fn set_value(
        &mut self,
        key: &Key,
        value: Option<Value>,
        error: Option<Arc<ErrorInfo>>,
        version: Version,
    ) -> Result<CommitOutcome, InternalError> {
        let Some(building) = self.building.take() else {
            return Err(InternalError::AlreadyDone { key: key.clone() });
        };
        if !building.is_ready() {
            self.building = Some(building);
            return Err(InternalError::NotReady { key: key.clone() });
        }
        Ok(self.finish(building, value, error, version))
    }

    /// Commit a cycle error regardless of outstanding dependencies.
    ///
    /// Returns `None` if the node is not building.
    pub(crate) fn commit_cycle_error(
        &mut self,
        error: Arc<ErrorInfo>,
        version: Version,
    ) -> Option<CommitOutcome> {
        let building = self.building.take()?;
        Some(self.finish(building, None, Some(error), version))
    }

    fn finish(
        &mut self,
        building: BuildingState,
        value: Option<Value>,
        error: Option<Arc<ErrorInfo>>,
        version: Version,
    ) -> CommitOutcome {
        let unchanged = building.dirty.is_some() && self.value == value && self.error == error;
        if !unchanged {
            self.version = version;
        }
        self.last_evaluated = version;

        let stale_deps = self
            .direct_deps
            .iter()
            .filter(|key| !building.temporary_deps.contains(key))
            .cloned()
            .collect();
        self.direct_deps = building.temporary_deps;
        self.value = value;
        self.error = error;

        CommitOutcome {
            reverse_deps_to_signal: building.reverse_deps_to_signal.into_iter().collect(),
            stale_deps,
            version: self.version,
        }
    }

    /// Mark a done node dirty.
    ///
    /// Returns the reverse deps to dirty next, or `None` if the node was
    /// already dirty or never built.
    pub(crate) fn mark_dirty(&mut self, kind: DirtyKind) -> Option<Vec<Key>> {
        if let Some(building) = self.building.as_mut() {
            if let (DirtyKind::Changed, Some(dirty)) = (kind, building.dirty.as_mut()) {
                if dirty.state == DirtyState::CheckDependencies {
                    dirty.state = DirtyState::NeedsRebuilding;
                    dirty.kind = DirtyKind::Changed;
                }
            }
            return None;
        }
        if !self.is_done() {
            return None;
        }
        self.building = Some(BuildingState::dirty(kind, self.initial_dirty_state(kind)));
        Some(self.reverse_deps.iter().cloned().collect())
    }

    fn initial_dirty_state(&self, kind: DirtyKind) -> DirtyState {
        match kind {
            DirtyKind::Changed => DirtyState::NeedsRebuilding,
            DirtyKind::Dirty if self.direct_deps.is_empty() => DirtyState::VerifiedClean,
            DirtyKind::Dirty => DirtyState::CheckDependencies,
        }
    }

    /// Replace the node's value from outside the evaluation
    pub(crate) fn inject(&mut self, value: Value, version: Version) -> InjectOutcome {
        let unchanged = self.error.is_none() && self.value.as_ref() == Some(&value);
        if !unchanged {
            self.version = version;
        }
        self.last_evaluated = version;
        self.building = None;
        self.value = Some(value);
        self.error = None;

        let stale_deps = self.direct_deps.iter().cloned().collect();
        self.direct_deps = GroupedDeps::new();
        InjectOutcome {
            stale_deps,
            reverse_deps: self.reverse_deps.iter().cloned().collect(),
        }
    }

    /// Discard the deps registered by the running attempt so the function
    /// can run again from scratch. Waiting parents stay registered, and a
    /// dirty node skips its remaining checks.
    ///
    /// Returns the deps whose reverse edge to this node must be removed.
    pub(crate) fn reset_for_restart(&mut self) -> Vec<Key> {
        let Some(building) = self.building.as_mut() else {
            return Vec::new();
        };
        let temporary_deps = std::mem::take(&mut building.temporary_deps);
        building.signaled_deps = 0;
        match building.dirty.as_mut() {
            Some(dirty) => {
                dirty.state = DirtyState::Rebuilding;
                temporary_deps
                    .iter()
                    .filter(|key| !self.direct_deps.contains(key))
                    .cloned()
                    .collect()
            }
            None => temporary_deps.iter().cloned().collect(),
        }
    }

    /// Undo an evaluation attempt that will not finish.
    ///
    /// A node that was never built goes back to not started; a dirty node
    /// goes back to its dirty state with the check restarted. Returns the
    /// deps whose reverse edge to this node must be removed.
    pub(crate) fn reset_incomplete(&mut self) -> Vec<Key> {
        let Some(building) = self.building.take() else {
            return Vec::new();
        };
        match building.dirty {
            Some(dirty) => {
                let unlink = building
                    .temporary_deps
                    .iter()
                    .filter(|key| !self.direct_deps.contains(key))
                    .cloned()
                    .collect();
                let state = self.initial_dirty_state(dirty.kind);
                self.building = Some(BuildingState::dirty(dirty.kind, state));
                unlink
            }
            None => building.temporary_deps.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(arg: &str) -> Key {
        Key::new("node", arg)
    }

    fn group(args: &[&str]) -> GroupedDeps {
        GroupedDeps::from_groups([args.iter().map(|a| key(a)).collect::<Vec<_>>()])
    }

    /// Build `parent` at `version` with the given dep groups, all done at
    /// `dep_version`.
    fn built(groups: &[&[&str]], value: i64, version: Version, dep_version: Version) -> NodeEntry {
        let mut entry = NodeEntry::new();
        assert_eq!(
            entry.add_reverse_dep_and_check_if_done(None),
            DependencyState::NeedsScheduling
        );
        for g in groups {
            let added = entry.add_temporary_direct_deps(&group(g));
            for _ in added {
                entry.signal_dep(dep_version);
            }
        }
        entry
            .set_value(&key("p"), Some(Value::new(value)), None, version)
            .unwrap();
        entry
    }

    #[test]
    fn test_fresh_entry_lifecycle() {
        let mut entry = NodeEntry::new();
        assert_eq!(entry.status(), NodeStatus::NotStarted);

        assert_eq!(
            entry.add_reverse_dep_and_check_if_done(Some(&key("parent"))),
            DependencyState::NeedsScheduling
        );
        assert_eq!(entry.status(), NodeStatus::Evaluating);
        assert_eq!(
            entry.add_reverse_dep_and_check_if_done(Some(&key("other"))),
            DependencyState::AlreadyEvaluating
        );
        assert!(entry.is_ready());

        let outcome = entry
            .set_value(&key("n"), Some(Value::new(1_i64)), None, Version(1))
            .unwrap();
        let mut signaled = outcome.reverse_deps_to_signal;
        signaled.sort();
        assert_eq!(signaled, vec![key("other"), key("parent")]);
        assert_eq!(entry.status(), NodeStatus::Done);
        assert_eq!(entry.version(), Version(1));
        assert_eq!(
            entry.add_reverse_dep_and_check_if_done(Some(&key("late"))),
            DependencyState::Done(Version(1))
        );
        assert_eq!(entry.reverse_deps().len(), 3);
    }

    #[test]
    fn test_not_ready_until_all_deps_signal() {
        let mut entry = NodeEntry::new();
        entry.add_reverse_dep_and_check_if_done(None);
        assert_eq!(entry.add_temporary_direct_deps(&group(&["a", "b"])).len(), 2);

        assert!(!entry.signal_dep(Version(1)));
        assert!(matches!(
            entry.set_value(&key("n"), Some(Value::new(0_i64)), None, Version(1)),
            Err(InternalError::NotReady { .. })
        ));
        assert!(entry.signal_dep(Version(1)));
        assert!(entry
            .set_value(&key("n"), Some(Value::new(0_i64)), None, Version(1))
            .is_ok());
        assert!(matches!(
            entry.set_value(&key("n"), Some(Value::new(0_i64)), None, Version(1)),
            Err(InternalError::AlreadyDone { .. })
        ));
    }

    #[test]
    fn test_dirty_check_verifies_clean() {
        let mut entry = built(&[&["a"], &["b"]], 7, Version(1), Version(1));
        assert!(entry.mark_dirty(DirtyKind::Dirty).is_some());
        assert_eq!(entry.status(), NodeStatus::Dirty(DirtyState::CheckDependencies));
        assert!(entry.mark_dirty(DirtyKind::Dirty).is_none());

        entry.add_reverse_dep_and_check_if_done(None);
        let first = entry.next_dirty_direct_deps().unwrap();
        assert_eq!(first, vec![key("a")]);
        entry.add_temporary_direct_deps_group_to_dirty_entry(&first);
        assert!(entry.signal_dep(Version(1)));
        assert_eq!(entry.dirty_state(), Some(DirtyState::CheckDependencies));

        let second = entry.next_dirty_direct_deps().unwrap();
        entry.add_temporary_direct_deps_group_to_dirty_entry(&second);
        assert!(entry.signal_dep(Version(1)));
        assert_eq!(entry.dirty_state(), Some(DirtyState::VerifiedClean));

        entry.mark_clean(Version(2));
        assert!(entry.is_done());
        assert_eq!(entry.version(), Version(1));
        assert_eq!(entry.last_evaluated_version(), Version(2));
        assert_eq!(entry.value(), Some(&Value::new(7_i64)));
        assert_eq!(entry.direct_deps().num_groups(), 2);
    }

    #[test]
    fn test_newer_dep_forces_rebuild() {
        let mut entry = built(&[&["a"], &["b"]], 7, Version(1), Version(1));
        entry.mark_dirty(DirtyKind::Dirty);
        entry.add_reverse_dep_and_check_if_done(None);

        let first = entry.next_dirty_direct_deps().unwrap();
        entry.add_temporary_direct_deps_group_to_dirty_entry(&first);
        assert!(entry.signal_dep(Version(2)));
        assert_eq!(entry.dirty_state(), Some(DirtyState::NeedsRebuilding));
        assert_eq!(entry.all_remaining_dirty_direct_deps().len(), 1);

        entry.mark_rebuilding();
        let outcome = entry
            .set_value(&key("p"), Some(Value::new(8_i64)), None, Version(2))
            .unwrap();
        // "b" was not requested again.
        assert_eq!(outcome.stale_deps, vec![key("b")]);
        assert_eq!(outcome.version, Version(2));
    }

    #[test]
    fn test_change_pruning_keeps_version() {
        let mut entry = built(&[], 7, Version(1), Version(1));
        entry.mark_dirty(DirtyKind::Changed);
        assert_eq!(entry.status(), NodeStatus::Dirty(DirtyState::NeedsRebuilding));

        entry.add_reverse_dep_and_check_if_done(None);
        entry.mark_rebuilding();
        let outcome = entry
            .set_value(&key("p"), Some(Value::new(7_i64)), None, Version(3))
            .unwrap();
        assert_eq!(outcome.version, Version(1));
        assert_eq!(entry.last_evaluated_version(), Version(3));
    }

    #[test]
    fn test_reset_fresh_entry() {
        let mut entry = NodeEntry::new();
        entry.add_reverse_dep_and_check_if_done(Some(&key("parent")));
        entry.add_temporary_direct_deps(&group(&["a"]));

        assert_eq!(entry.reset_incomplete(), vec![key("a")]);
        assert_eq!(entry.status(), NodeStatus::NotStarted);
        assert!(entry.in_progress_reverse_deps().is_empty());
    }

    #[test]
    fn test_reset_dirty_entry_restarts_check() {
        let mut entry = built(&[&["a"]], 7, Version(1), Version(1));
        entry.mark_dirty(DirtyKind::Dirty);
        entry.add_reverse_dep_and_check_if_done(None);
        let first = entry.next_dirty_direct_deps().unwrap();
        entry.add_temporary_direct_deps_group_to_dirty_entry(&first);
        entry.signal_dep(Version(2));
        entry.mark_rebuilding();
        entry.add_temporary_direct_deps(&group(&["new"]));

        assert_eq!(entry.reset_incomplete(), vec![key("new")]);
        assert_eq!(entry.status(), NodeStatus::Dirty(DirtyState::CheckDependencies));
        assert!(entry.is_ready());
        assert_eq!(entry.next_dirty_direct_deps(), Some(vec![key("a")]));
    }

    #[test]
    fn test_restart_keeps_waiting_parents() {
        let mut entry = NodeEntry::new();
        entry.add_reverse_dep_and_check_if_done(Some(&key("parent")));
        entry.add_temporary_direct_deps(&group(&["a", "b"]));
        entry.signal_dep(Version(1));
        entry.signal_dep(Version(1));

        let mut unlink = entry.reset_for_restart();
        unlink.sort();
        assert_eq!(unlink, vec![key("a"), key("b")]);
        assert_eq!(entry.status(), NodeStatus::Evaluating);
        assert!(entry.is_ready());
        assert!(entry.temporary_direct_deps().is_some_and(GroupedDeps::is_empty));
        assert_eq!(entry.in_progress_reverse_deps(), vec![key("parent")]);
    }

    #[test]
    fn test_restart_of_dirty_entry_keeps_old_edges() {
        let mut entry = built(&[&["a"]], 7, Version(1), Version(1));
        entry.mark_dirty(DirtyKind::Dirty);
        entry.add_reverse_dep_and_check_if_done(None);
        let first = entry.next_dirty_direct_deps().unwrap();
        entry.add_temporary_direct_deps_group_to_dirty_entry(&first);
        entry.signal_dep(Version(2));
        entry.mark_rebuilding();
        entry.add_temporary_direct_deps(&group(&["new"]));

        assert_eq!(entry.reset_for_restart(), vec![key("new")]);
        assert_eq!(entry.status(), NodeStatus::Dirty(DirtyState::Rebuilding));
        assert!(entry.direct_deps().contains(&key("a")));
    }

    #[test]
    fn test_inject_reports_reverse_deps() {
        let mut entry = built(&[&["a"]], 1, Version(1), Version(1));
        entry.add_reverse_dep_and_check_if_done(Some(&key("parent")));

        let outcome = entry.inject(Value::new(1_i64), Version(2));
        assert_eq!(outcome.stale_deps, vec![key("a")]);
        assert_eq!(outcome.reverse_deps, vec![key("parent")]);
        assert_eq!(entry.version(), Version(1));

        entry.inject(Value::new(2_i64), Version(3));
        assert_eq!(entry.version(), Version(3));
        assert!(entry.direct_deps().is_empty());
    }
}
