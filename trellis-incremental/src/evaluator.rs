//! Parallel evaluation driver
//!
//! [`Evaluator::evaluate`] brings a set of root keys up to date. Pending
//! invalidations are propagated first; then a pool of worker threads drains
//! a shared queue of keys. For each key a worker either verifies that a
//! dirty node is still clean or runs the node's function. Newly requested
//! dependencies become graph edges and are scheduled; a node is scheduled
//! again once every dependency it is waiting on has signaled it.
//!
//! The evaluation ends when the queue drains, or early on a fail-fast
//! error, an internal error or an interrupt. If requested roots are still
//! unfinished once the queue drains, they are stuck on a dependency cycle.

use crate::config::EvaluatorConfig;
use crate::cycle::CycleDetector;
use crate::deps::GroupedDeps;
use crate::env::{EnvOutcome, Environment};
use crate::error::{join_keys, ComputeError, ErrorInfo, EvaluationError, InternalError, NodeError};
use crate::events::{
    EvaluationState, Event, EventSink, NodeState, NullProgressReceiver, ProgressReceiver,
    TracingEventSink,
};
use crate::function::FunctionRegistry;
use crate::graph::{DepsReport, Graph, InMemoryGraph, NodeHandle};
use crate::inconsistency::{Inconsistency, InconsistencyReceiver, LoggingInconsistencyReceiver};
use crate::invalidation::PendingChanges;
use crate::node::{DependencyState, DirtyState};
use crate::result::EvaluationResult;
use crate::scheduler::{InterruptHandle, WorkQueue};
use crate::value::Value;
use hashbrown::HashSet;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};
use trellis_types::{Key, Version};

/// Incremental evaluator over a persistent graph
///
/// The graph survives across calls to [`evaluate`](Self::evaluate); nodes
/// whose transitive inputs did not change are not recomputed.
#[derive(Debug)]
pub struct Evaluator {
    graph: Arc<dyn Graph>,
    registry: FunctionRegistry,
    config: EvaluatorConfig,
    last_version: Version,
    pending: PendingChanges,
    event_sink: Arc<dyn EventSink>,
    progress: Arc<dyn ProgressReceiver>,
    inconsistency: Arc<dyn InconsistencyReceiver>,
    interrupt: InterruptHandle,
}

impl Evaluator {
    /// Create an evaluator over an empty in-memory graph
    pub fn new(registry: FunctionRegistry) -> Self {
        Evaluator {
            graph: Arc::new(InMemoryGraph::new()),
            registry,
            config: EvaluatorConfig::default(),
            last_version: Version::MINIMAL,
            pending: PendingChanges::default(),
            event_sink: Arc::new(TracingEventSink),
            progress: Arc::new(NullProgressReceiver),
            inconsistency: Arc::new(LoggingInconsistencyReceiver),
            interrupt: InterruptHandle::new(),
        }
    }

    /// Evaluate over `graph` instead of a fresh in-memory graph
    pub fn with_graph(mut self, graph: Arc<dyn Graph>) -> Self {
        self.graph = graph;
        self
    }

    /// Replace the default configuration
    pub fn with_config(mut self, config: EvaluatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Deliver node events to `sink` instead of `tracing`
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Report evaluation progress to `progress`
    pub fn with_progress_receiver(mut self, progress: Arc<dyn ProgressReceiver>) -> Self {
        self.progress = progress;
        self
    }

    /// Decide how graph inconsistencies are handled; they are logged and
    /// tolerated by default
    pub fn with_inconsistency_receiver(mut self, receiver: Arc<dyn InconsistencyReceiver>) -> Self {
        self.inconsistency = receiver;
        self
    }

    /// Graph shared by every evaluation
    pub fn graph(&self) -> &Arc<dyn Graph> {
        &self.graph
    }

    /// Active configuration
    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Version of the last evaluation
    pub fn version(&self) -> Version {
        self.last_version
    }

    /// Handle that interrupts the running (or next) evaluation
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Mark `keys` as changed. Their values are recomputed, and their
    /// dependents re-checked, by the next evaluation.
    pub fn invalidate(&mut self, keys: impl IntoIterator<Item = Key>) {
        self.pending.invalidate(keys);
    }

    /// Set the value of `key` directly, starting with the next evaluation.
    ///
    /// Dependents are re-checked even if the value is unchanged.
    pub fn inject(&mut self, key: Key, value: Value) {
        self.pending.inject(key, value);
    }

    /// Bring `roots` up to date.
    ///
    /// With `keep_going` off, the first node error ends the evaluation and
    /// is reported for every root waiting on it. With it on, errors only
    /// reach the nodes that read them, unless an error is catastrophic.
    pub fn evaluate(
        &mut self,
        roots: &[Key],
        keep_going: bool,
    ) -> Result<EvaluationResult, EvaluationError> {
        let version = self.last_version.next();
        self.last_version = version;
        info!(%version, roots = roots.len(), keep_going, "starting evaluation");

        self.pending
            .inject(Key::error_transience(), Value::new(version.0));
        self.pending
            .propagate(self.graph.as_ref(), version, self.progress.as_ref());

        let context = EvaluationContext {
            graph: self.graph.as_ref(),
            registry: &self.registry,
            config: &self.config,
            event_sink: self.event_sink.as_ref(),
            progress: self.progress.as_ref(),
            inconsistency: self.inconsistency.as_ref(),
            interrupt: &self.interrupt,
            version,
            keep_going,
            queue: WorkQueue::new(),
            held_error: Mutex::new(None),
            crash: Mutex::new(None),
            interrupted: AtomicBool::new(false),
            started: Mutex::new(HashSet::new()),
        };
        let result = context.run(roots);
        match &result {
            Ok(result) => info!(
                %version,
                values = result.values().len(),
                errors = result.errors().len(),
                "evaluation finished"
            ),
            Err(err) => info!(%version, %err, "evaluation did not finish"),
        }
        result
    }
}

/// Error that ended a fail-fast evaluation
struct HeldError {
    key: Key,
    info: Arc<ErrorInfo>,
    /// Parents that were waiting on `key` when it committed the error
    parents: Vec<Key>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SignalBehavior {
    /// Enqueue parents that become ready
    Enqueue,
    /// Only count the signal; the evaluation is stopping
    Signal,
}

/// Whether a node still has to run its function after dirty checking
enum DirtyOutcome {
    Build,
    AlreadyProcessed,
}

/// State of one `evaluate` call, shared by its worker threads
struct EvaluationContext<'a> {
    graph: &'a dyn Graph,
    registry: &'a FunctionRegistry,
    config: &'a EvaluatorConfig,
    event_sink: &'a dyn EventSink,
    progress: &'a dyn ProgressReceiver,
    inconsistency: &'a dyn InconsistencyReceiver,
    interrupt: &'a InterruptHandle,
    version: Version,
    keep_going: bool,
    queue: WorkQueue,
    held_error: Mutex<Option<HeldError>>,
    crash: Mutex<Option<InternalError>>,
    interrupted: AtomicBool,
    /// Keys scheduled during this evaluation
    started: Mutex<HashSet<Key>>,
}

impl EvaluationContext<'_> {
    fn run(self, roots: &[Key]) -> Result<EvaluationResult, EvaluationError> {
        let handles = self.graph.create_if_absent_batch(roots);
        for root in roots {
            let Some(handle) = handles.get(root) else {
                return Err(InternalError::MissingEntry { key: root.clone() }.into());
            };
            let state = handle.lock().add_reverse_dep_and_check_if_done(None);
            if state == DependencyState::NeedsScheduling {
                self.enqueue(root.clone());
            }
        }

        let threads = self.config.threads.max(1);
        std::thread::scope(|scope| {
            for _ in 0..threads {
                scope.spawn(|| self.work());
            }
        });

        self.finish(roots)
    }

    fn work(&self) {
        while let Some(key) = self.queue.next() {
            if self.interrupt.is_interrupted() {
                self.note_interrupted();
            } else if let Err(err) = self.evaluate_node(&key) {
                self.note_crash(err);
            }
            self.queue.finish();
        }
    }

    fn enqueue(&self, key: Key) {
        self.progress.enqueueing(&key);
        self.started.lock().insert(key.clone());
        self.queue.enqueue(key);
    }

    fn note_interrupted(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        if self.queue.halt() {
            debug!("evaluation interrupted");
        }
    }

    fn note_crash(&self, err: InternalError) {
        error!(%err, "internal error during evaluation");
        let mut crash = self.crash.lock();
        if crash.is_none() {
            *crash = Some(err);
        }
        drop(crash);
        self.queue.halt();
    }

    /// Hold `info` as the error ending this fail-fast evaluation.
    ///
    /// A catastrophic error replaces a held one that is not.
    fn fail_fast(&self, key: &Key, info: Arc<ErrorInfo>, parents: Vec<Key>) {
        let mut held = self.held_error.lock();
        let replace = match held.as_ref() {
            None => true,
            Some(existing) => info.is_catastrophic() && !existing.info.is_catastrophic(),
        };
        if replace {
            *held = Some(HeldError {
                key: key.clone(),
                info,
                parents,
            });
        }
        drop(held);
        if self.queue.halt() {
            warn!(%key, "halting evaluation after error");
        }
    }

    fn handle(&self, key: &Key) -> Result<NodeHandle, InternalError> {
        self.graph
            .get(key)
            .ok_or_else(|| InternalError::MissingEntry { key: key.clone() })
    }

    /// One scheduling step of `key`
    fn evaluate_node(&self, key: &Key) -> Result<(), InternalError> {
        trace!(%key, "evaluating node");
        let handle = self.handle(key)?;
        let dirty = {
            let entry = handle.lock();
            if entry.is_done() {
                return Err(InternalError::AlreadyDone { key: key.clone() });
            }
            if !entry.is_ready() {
                return Err(InternalError::NotReady { key: key.clone() });
            }
            entry.is_dirty()
        };

        if dirty {
            self.progress.state_starting(key, NodeState::CheckDirty);
            let outcome = self.handle_dirty_node(key, &handle);
            self.progress.state_ending(key, NodeState::CheckDirty);
            if let DirtyOutcome::AlreadyProcessed = outcome? {
                return Ok(());
            }
        }

        let function = self
            .registry
            .get(key.function())
            .ok_or_else(|| InternalError::UnknownFunction { key: key.clone() })?;

        self.progress.state_starting(key, NodeState::Compute);
        let mut env = Environment::new(key, self.version, self.keep_going, self.graph, self.interrupt);
        let result = panic::catch_unwind(AssertUnwindSafe(|| function.compute(key, &mut env)));
        self.progress.state_ending(key, NodeState::Compute);
        let outcome = env.into_outcome();

        let result = match result {
            Ok(result) => result,
            Err(payload) => {
                let requested_by = handle.lock().in_progress_reverse_deps();
                return Err(InternalError::Panicked {
                    key: key.clone(),
                    message: format!(
                        "Unrecoverable error while evaluating node '{key}' (requested by nodes {}): {}",
                        join_keys(&requested_by),
                        panic_message(payload.as_ref())
                    ),
                });
            }
        };

        match result {
            Ok(Some(value)) => self.handle_value(key, &handle, value, outcome),
            Ok(None) => self.handle_missing_deps(key, &handle, outcome),
            Err(ComputeError::Node(err)) => self.handle_compute_error(key, &handle, err, outcome),
            Err(ComputeError::Interrupted) => {
                self.note_interrupted();
                Ok(())
            }
            Err(ComputeError::Restart) => self.restart_from_scratch(key, &handle),
        }
    }

    /// Drop the deps the node registered so far and run it again.
    ///
    /// Deps requested by the abandoned invocation were never registered and
    /// its buffered events are dropped with it.
    fn restart_from_scratch(&self, key: &Key, handle: &NodeHandle) -> Result<(), InternalError> {
        self.inconsistency
            .note_inconsistency(key, None, Inconsistency::ResetRequested)?;
        let unlink = handle.lock().reset_for_restart();
        debug!(%key, deps = unlink.len(), "restarting node from scratch");
        self.unlink(key, &unlink);
        self.enqueue(key.clone());
        Ok(())
    }

    /// Re-check the recorded dependency groups of a dirty node, one group
    /// per pass, until it is verified clean, needs rebuilding, or must wait
    /// for deps still being evaluated.
    fn handle_dirty_node(&self, key: &Key, handle: &NodeHandle) -> Result<DirtyOutcome, InternalError> {
        loop {
            let (state, last_evaluated) = {
                let entry = handle.lock();
                (entry.dirty_state(), entry.last_evaluated_version())
            };
            match state {
                None => return Ok(DirtyOutcome::Build),
                Some(DirtyState::VerifiedClean) => {
                    self.commit_clean(key, handle);
                    return Ok(DirtyOutcome::AlreadyProcessed);
                }
                Some(DirtyState::NeedsRebuilding) | Some(DirtyState::Rebuilding) => {
                    handle.lock().mark_rebuilding();
                    return Ok(DirtyOutcome::Build);
                }
                Some(DirtyState::CheckDependencies) => {}
            }

            let group = handle.lock().next_dirty_direct_deps();
            let Some(group) = group else {
                continue;
            };

            // The edge to the error-transience node is not re-registered, so
            // the commit after the rebuild unlinks it as stale.
            if let [only] = group.as_slice() {
                if only.is_error_transience() && self.error_transience_changed(last_evaluated) {
                    handle.lock().force_rebuild();
                    continue;
                }
            }

            if !self.keep_going {
                if let Some(child_error) = self.first_child_error(&group) {
                    let info = Arc::new(ErrorInfo::from_child_errors(key, &[child_error]));
                    self.fail_fast(key, info, Vec::new());
                    return Ok(DirtyOutcome::AlreadyProcessed);
                }
            }

            let known_done = match self.graph.analyze_deps_doneness(key, last_evaluated, &group) {
                DepsReport::KnownDone(done) => done,
                DepsReport::NoInformation => HashSet::new(),
            };
            handle.lock().add_temporary_direct_deps_group_to_dirty_entry(&group);

            let mut ready = false;
            let lookups: Vec<Key> = group
                .iter()
                .filter(|dep| !known_done.contains(*dep))
                .cloned()
                .collect();
            for _ in &known_done {
                // Edges to these deps survive from the last build.
                ready |= handle.lock().signal_dep(Version::MINIMAL);
            }
            self.note_missing_children(key, &lookups)?;
            ready |= self.enqueue_or_signal_children(key, handle, &lookups)?;
            if !ready {
                // The last dep to finish enqueues this node again.
                return Ok(DirtyOutcome::AlreadyProcessed);
            }
        }
    }

    /// Report recorded deps of a dirty node that were evicted from the
    /// graph; they are recreated and evaluated again.
    fn note_missing_children(&self, key: &Key, deps: &[Key]) -> Result<(), InternalError> {
        let present = self.graph.get_batch(deps);
        if present.len() == deps.len() {
            return Ok(());
        }
        for dep in deps.iter().filter(|dep| !present.contains_key(*dep)) {
            self.inconsistency.note_inconsistency(
                key,
                Some(dep),
                Inconsistency::ChildMissingForDirtyNode,
            )?;
        }
        Ok(())
    }

    fn error_transience_changed(&self, last_evaluated: Version) -> bool {
        self.graph
            .get(&Key::error_transience())
            .is_some_and(|et| !et.lock().version().at_most(last_evaluated))
    }

    fn first_child_error(&self, group: &[Key]) -> Option<Arc<ErrorInfo>> {
        group.iter().find_map(|dep| {
            let handle = self.graph.get(dep)?;
            let error = handle.lock().error().cloned();
            error
        })
    }

    fn handle_value(
        &self,
        key: &Key,
        handle: &NodeHandle,
        value: Value,
        outcome: EnvOutcome,
    ) -> Result<(), InternalError> {
        if !outcome.missing.is_empty() || !outcome.errored.is_empty() {
            let mut missing = outcome.missing;
            missing.extend(outcome.errored);
            return Err(InternalError::ValueWithMissingDeps {
                key: key.clone(),
                missing,
            });
        }
        let new_deps = handle
            .lock()
            .add_temporary_direct_deps(&outcome.newly_requested);
        self.register_done_deps(key, handle, &new_deps)?;
        if outcome.transitively_transient {
            self.add_error_transience_dep(key, handle)?;
        }
        self.commit(
            key,
            handle,
            Some(value),
            None,
            outcome.events,
            SignalBehavior::Enqueue,
        )
        .map(|_| ())
    }

    fn handle_missing_deps(
        &self,
        key: &Key,
        handle: &NodeHandle,
        outcome: EnvOutcome,
    ) -> Result<(), InternalError> {
        if !self.keep_going {
            if let Some(dep) = &outcome.dep_error_key {
                let child_error = self
                    .graph
                    .get(dep)
                    .and_then(|child| child.lock().error().cloned())
                    .ok_or_else(|| InternalError::DepNotDone {
                        key: key.clone(),
                        dep: dep.clone(),
                    })?;
                let info = Arc::new(ErrorInfo::from_child_errors(key, &[child_error]));
                self.fail_fast(key, info, Vec::new());
                return Ok(());
            }
        }

        let new_deps = handle
            .lock()
            .add_temporary_direct_deps(&outcome.newly_requested);
        if new_deps.is_empty() {
            if outcome.child_errors.is_empty() {
                return Err(InternalError::NoValueWithoutMissingDeps { key: key.clone() });
            }
            let info = ErrorInfo::from_child_errors(key, &outcome.child_errors);
            return self.commit_error(key, handle, Arc::new(info), outcome.events);
        }

        if self.enqueue_or_signal_children(key, handle, &new_deps)? {
            // Every new dep was already done: run again right away.
            self.enqueue(key.clone());
        }
        Ok(())
    }

    fn handle_compute_error(
        &self,
        key: &Key,
        handle: &NodeHandle,
        err: NodeError,
        outcome: EnvOutcome,
    ) -> Result<(), InternalError> {
        let catastrophic = err.is_catastrophic();
        let info = Arc::new(ErrorInfo::from_node_error(
            key,
            err,
            outcome.transitively_transient,
        ));
        debug!(%key, error = %info, "node function failed");

        if self.keep_going && !catastrophic {
            let new_deps = handle
                .lock()
                .add_temporary_direct_deps(&outcome.newly_requested);
            if !outcome.missing.is_empty() {
                // Retry once the missing deps are done.
                if self.enqueue_or_signal_children(key, handle, &new_deps)? {
                    self.enqueue(key.clone());
                }
                return Ok(());
            }
            self.register_done_deps(key, handle, &new_deps)?;
            return self.commit_error(key, handle, info, outcome.events);
        }

        // Only deps that are done become edges of a node failing fast.
        let missing: HashSet<&Key> = outcome.missing.iter().collect();
        let done_deps = GroupedDeps::from_groups(outcome.newly_requested.groups().iter().map(|group| {
            group
                .iter()
                .filter(|dep| !missing.contains(dep))
                .cloned()
                .collect::<Vec<_>>()
        }));
        let new_deps = handle.lock().add_temporary_direct_deps(&done_deps);
        self.register_done_deps(key, handle, &new_deps)?;
        if info.is_transitively_transient() {
            self.add_error_transience_dep(key, handle)?;
        }
        let parents = self.commit(
            key,
            handle,
            None,
            Some(Arc::clone(&info)),
            outcome.events,
            SignalBehavior::Signal,
        )?;
        self.fail_fast(key, info, parents);
        Ok(())
    }

    fn commit_error(
        &self,
        key: &Key,
        handle: &NodeHandle,
        info: Arc<ErrorInfo>,
        events: Vec<Event>,
    ) -> Result<(), InternalError> {
        if info.is_transitively_transient() {
            self.add_error_transience_dep(key, handle)?;
        }
        self.commit(key, handle, None, Some(info), events, SignalBehavior::Enqueue)
            .map(|_| ())
    }

    /// Make a transiently failed node depend on the error-transience node,
    /// as its last group, so the next evaluation rebuilds it.
    fn add_error_transience_dep(&self, key: &Key, handle: &NodeHandle) -> Result<(), InternalError> {
        let deps = GroupedDeps::from_groups([vec![Key::error_transience()]]);
        let added = handle.lock().add_temporary_direct_deps(&deps);
        self.register_done_deps(key, handle, &added)
    }

    /// Register reverse edges to deps the function found done, signaling
    /// the node for each.
    fn register_done_deps(&self, key: &Key, handle: &NodeHandle, deps: &[Key]) -> Result<(), InternalError> {
        if deps.is_empty() {
            return Ok(());
        }
        let children = self.graph.get_batch(deps);
        for dep in deps {
            let not_done = || InternalError::DepNotDone {
                key: key.clone(),
                dep: dep.clone(),
            };
            let child = children.get(dep).ok_or_else(not_done)?;
            let state = child.lock().add_reverse_dep_and_check_if_done(Some(key));
            match state {
                DependencyState::Done(version) => {
                    handle.lock().signal_dep(version);
                }
                DependencyState::AlreadyEvaluating | DependencyState::NeedsScheduling => {
                    return Err(not_done());
                }
            }
        }
        Ok(())
    }

    /// Register reverse edges to newly requested deps, scheduling the ones
    /// nobody is evaluating yet and signaling for the ones already done.
    ///
    /// Returns true if one of this call's signals made the node ready.
    fn enqueue_or_signal_children(
        &self,
        key: &Key,
        handle: &NodeHandle,
        deps: &[Key],
    ) -> Result<bool, InternalError> {
        if deps.is_empty() {
            return Ok(false);
        }
        let children = self.graph.create_if_absent_batch(deps);
        let mut ready = false;
        for dep in deps {
            let child = children
                .get(dep)
                .ok_or_else(|| InternalError::MissingEntry { key: dep.clone() })?;
            let state = child.lock().add_reverse_dep_and_check_if_done(Some(key));
            match state {
                DependencyState::Done(version) => {
                    ready |= handle.lock().signal_dep(version);
                }
                DependencyState::AlreadyEvaluating => {}
                DependencyState::NeedsScheduling => self.enqueue(dep.clone()),
            }
        }
        Ok(ready)
    }

    /// Commit a built node and signal its waiting parents.
    ///
    /// Returns the parents that were signaled.
    fn commit(
        &self,
        key: &Key,
        handle: &NodeHandle,
        value: Option<Value>,
        error: Option<Arc<ErrorInfo>>,
        events: Vec<Event>,
        behavior: SignalBehavior,
    ) -> Result<Vec<Key>, InternalError> {
        self.progress.state_starting(key, NodeState::Commit);
        let outcome = handle
            .lock()
            .set_value(key, value.clone(), error, self.version)?;
        self.unlink(key, &outcome.stale_deps);
        for event in &events {
            self.event_sink.handle(event);
        }
        self.progress
            .evaluated(key, value.as_ref(), EvaluationState::Built);
        self.signal_parents(&outcome.reverse_deps_to_signal, outcome.version, behavior);
        self.progress.state_ending(key, NodeState::Commit);
        Ok(outcome.reverse_deps_to_signal)
    }

    fn commit_clean(&self, key: &Key, handle: &NodeHandle) {
        trace!(%key, "node verified clean");
        let (parents, version, value) = {
            let mut entry = handle.lock();
            let parents = entry.mark_clean(self.version);
            (parents, entry.version(), entry.value().cloned())
        };
        self.progress
            .evaluated(key, value.as_ref(), EvaluationState::Clean);
        self.signal_parents(&parents, version, SignalBehavior::Enqueue);
    }

    fn signal_parents(&self, parents: &[Key], version: Version, behavior: SignalBehavior) {
        for parent in parents {
            let Some(handle) = self.graph.get(parent) else {
                warn!(%parent, "waiting parent is missing from the graph");
                continue;
            };
            let ready = handle.lock().signal_dep(version);
            if ready && behavior == SignalBehavior::Enqueue {
                self.enqueue(parent.clone());
            }
        }
    }

    /// Remove the reverse edges from `deps` to `key`
    fn unlink(&self, key: &Key, deps: &[Key]) {
        for dep in deps {
            match self.graph.get(dep) {
                Some(handle) => {
                    handle.lock().remove_reverse_dep(key);
                }
                None => warn!(%key, %dep, "dependency is missing from the graph"),
            }
        }
    }

    fn finish(&self, roots: &[Key]) -> Result<EvaluationResult, EvaluationError> {
        if let Some(err) = self.crash.lock().take() {
            self.reset_incomplete();
            return Err(err.into());
        }
        if self.interrupted.load(Ordering::SeqCst) || self.interrupt.is_interrupted() {
            self.reset_incomplete();
            self.interrupt.clear();
            return Err(EvaluationError::Interrupted);
        }

        let held = self.held_error.lock().take();
        if let Some(held) = held {
            let mut result = self.collect_done_roots(roots);
            self.bubble_error(roots, &held, &mut result);
            self.reset_incomplete();
            return Ok(result);
        }

        let unfinished: Vec<Key> = roots
            .iter()
            .filter(|root| {
                self.graph
                    .get(root)
                    .is_some_and(|handle| !handle.lock().is_done())
            })
            .cloned()
            .collect();
        if !unfinished.is_empty() {
            debug!(roots = unfinished.len(), "queue drained with unfinished roots; looking for cycles");
            let detector = CycleDetector::new(self.graph, self.config.max_cycles_reported);
            match detector.detect(&unfinished) {
                Ok(errors) => {
                    for (key, info) in errors {
                        self.commit_cycle_error(&key, info);
                    }
                }
                Err(err) => {
                    error!(%err, "cycle detection failed");
                    self.reset_incomplete();
                    return Err(err.into());
                }
            }
        }

        let mut result = self.collect_done_roots(roots);
        if !self.keep_going && result.error.is_none() {
            // Roots already done with an error from an earlier evaluation.
            result.error = roots.iter().find_map(|root| result.errors.get(root).cloned());
        }
        self.reset_incomplete();
        Ok(result)
    }

    fn commit_cycle_error(&self, key: &Key, info: ErrorInfo) {
        let Some(handle) = self.graph.get(key) else {
            return;
        };
        let outcome = handle
            .lock()
            .commit_cycle_error(Arc::new(info), self.version);
        if let Some(outcome) = outcome {
            self.unlink(key, &outcome.stale_deps);
            self.progress.evaluated(key, None, EvaluationState::Built);
        }
    }

    fn collect_done_roots(&self, roots: &[Key]) -> EvaluationResult {
        let mut result = EvaluationResult::default();
        for root in roots {
            let Some(handle) = self.graph.get(root) else {
                continue;
            };
            let entry = handle.lock();
            if let Some(value) = entry.value() {
                result.values.insert(root.clone(), value.clone());
            } else if let Some(error) = entry.error() {
                result.catastrophe |= error.is_catastrophic();
                result.errors.insert(root.clone(), Arc::clone(error));
            }
        }
        result
    }

    /// Report the held error for every requested root that was waiting on
    /// the failed node, directly or transitively.
    fn bubble_error(&self, roots: &[Key], held: &HeldError, result: &mut EvaluationResult) {
        let roots: HashSet<&Key> = roots.iter().collect();
        let mut seen: HashSet<Key> = HashSet::from([held.key.clone()]);
        let mut frontier = vec![held.key.clone()];
        frontier.extend(held.parents.iter().cloned());

        while let Some(key) = frontier.pop() {
            if key != held.key && !seen.insert(key.clone()) {
                continue;
            }
            if roots.contains(&key)
                && !result.values.contains_key(&key)
                && !result.errors.contains_key(&key)
            {
                let info = if key == held.key {
                    Arc::clone(&held.info)
                } else {
                    Arc::new(ErrorInfo::from_child_errors(&key, &[Arc::clone(&held.info)]))
                };
                result.errors.insert(key.clone(), info);
            }
            if let Some(handle) = self.graph.get(&key) {
                let parents = handle.lock().in_progress_reverse_deps();
                frontier.extend(parents.into_iter().filter(|parent| !seen.contains(parent)));
            }
        }

        result.catastrophe |= held.info.is_catastrophic();
        result.error = Some(Arc::clone(&held.info));
    }

    /// Undo the nodes this evaluation scheduled but did not finish
    fn reset_incomplete(&self) {
        let started = std::mem::take(&mut *self.started.lock());
        let mut reset = 0usize;
        for key in started {
            let Some(handle) = self.graph.get(&key) else {
                continue;
            };
            let (was_done, unlink) = {
                let mut entry = handle.lock();
                (entry.is_done(), entry.reset_incomplete())
            };
            if !was_done {
                reset += 1;
            }
            self.unlink(&key, &unlink);
        }
        if reset > 0 {
            debug!(nodes = reset, "reset incomplete nodes");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
