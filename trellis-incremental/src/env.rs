//! Dependency tracking environment
//!
//! An [`Environment`] is handed to every node function invocation. Each
//! value request is recorded as a dependency group; requests for deps that
//! are not done yet make the function suspend by returning `Ok(None)`, after
//! which the evaluator schedules the missing deps and re-runs the function
//! from scratch once they are all done.

use crate::deps::GroupedDeps;
use crate::error::{ComputeError, ErrorInfo};
use crate::events::Event;
use crate::graph::Graph;
use crate::scheduler::InterruptHandle;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;
use trellis_types::{Key, Version};

enum Lookup {
    Value(Value),
    Error(Arc<ErrorInfo>),
    Missing,
}

/// Everything a function invocation recorded, consumed by the evaluator
#[derive(Debug, Default)]
pub(crate) struct EnvOutcome {
    pub(crate) newly_requested: GroupedDeps,
    /// Requested deps that are not done
    pub(crate) missing: Vec<Key>,
    /// Requested deps that are done with an error the function did not read
    pub(crate) errored: Vec<Key>,
    pub(crate) child_errors: Vec<Arc<ErrorInfo>>,
    pub(crate) dep_error_key: Option<Key>,
    pub(crate) transitively_transient: bool,
    pub(crate) events: Vec<Event>,
}

/// Access to dependencies for one node function invocation
pub struct Environment<'a> {
    key: &'a Key,
    version: Version,
    keep_going: bool,
    graph: &'a dyn Graph,
    interrupt: &'a InterruptHandle,
    outcome: EnvOutcome,
}

impl<'a> Environment<'a> {
    pub(crate) fn new(
        key: &'a Key,
        version: Version,
        keep_going: bool,
        graph: &'a dyn Graph,
        interrupt: &'a InterruptHandle,
    ) -> Self {
        Environment {
            key,
            version,
            keep_going,
            graph,
            interrupt,
            outcome: EnvOutcome::default(),
        }
    }

    /// Key of the node being computed
    pub fn key(&self) -> &Key {
        self.key
    }

    /// Version of the running evaluation
    pub fn version(&self) -> Version {
        self.version
    }

    /// Value of `key`, or `None` if it is not done yet or failed.
    ///
    /// A function that sees `None` should eventually return `Ok(None)`; it
    /// is restarted once the dependency is done. A failed dependency's error
    /// propagates to this node unless the function calls
    /// [`get_value_or_error`](Self::get_value_or_error) instead.
    pub fn get_value(&mut self, key: &Key) -> Option<Value> {
        self.get_values(std::slice::from_ref(key)).pop().flatten()
    }

    /// Values of `keys`, requested as one dependency group
    pub fn get_values(&mut self, keys: &[Key]) -> Vec<Option<Value>> {
        self.outcome.newly_requested.push_group(keys.iter().cloned());
        keys.iter()
            .map(|key| match self.lookup(key) {
                Lookup::Value(value) => Some(value),
                Lookup::Error(error) => {
                    self.record_child_error(key, error);
                    None
                }
                Lookup::Missing => None,
            })
            .collect()
    }

    /// Value or error of `key`; `Ok(None)` if it is not done yet.
    pub fn get_value_or_error(&mut self, key: &Key) -> Result<Option<Value>, Arc<ErrorInfo>> {
        self.outcome
            .newly_requested
            .push_group(std::iter::once(key.clone()));
        match self.lookup(key) {
            Lookup::Value(value) => Ok(Some(value)),
            Lookup::Error(error) => Err(error),
            Lookup::Missing => Ok(None),
        }
    }

    /// True if some requested dependency is not available
    pub fn values_missing(&self) -> bool {
        !self.outcome.missing.is_empty() || !self.outcome.errored.is_empty()
    }

    /// Buffer an event; it is delivered if this invocation commits
    pub fn report(&mut self, event: Event) {
        let event = match event.key {
            Some(_) => event,
            None => event.with_key(self.key.clone()),
        };
        self.outcome.events.push(event);
    }

    /// Report an informational event
    pub fn info(&mut self, message: impl Into<String>) {
        self.report(Event::info(message));
    }

    /// Report a warning
    pub fn warn(&mut self, message: impl Into<String>) {
        self.report(Event::warn(message));
    }

    /// Report an error event; the node may still succeed
    pub fn error(&mut self, message: impl Into<String>) {
        self.report(Event::error(message));
    }

    /// Fails with [`ComputeError::Interrupted`] once the evaluation has been
    /// interrupted. Long-running functions should call this periodically.
    pub fn check_interrupted(&self) -> Result<(), ComputeError> {
        if self.interrupt.is_interrupted() {
            Err(ComputeError::Interrupted)
        } else {
            Ok(())
        }
    }

    pub(crate) fn into_outcome(self) -> EnvOutcome {
        self.outcome
    }

    fn lookup(&mut self, key: &Key) -> Lookup {
        let lookup = match self.graph.get(key) {
            Some(handle) => {
                let entry = handle.lock();
                match (entry.value(), entry.error()) {
                    (Some(value), _) => Lookup::Value(value.clone()),
                    (None, Some(error)) => Lookup::Error(Arc::clone(error)),
                    (None, None) => Lookup::Missing,
                }
            }
            None => Lookup::Missing,
        };
        match &lookup {
            Lookup::Error(error) => {
                self.outcome.transitively_transient |= error.is_transitively_transient();
            }
            Lookup::Missing => self.outcome.missing.push(key.clone()),
            Lookup::Value(_) => {}
        }
        lookup
    }

    fn record_child_error(&mut self, key: &Key, error: Arc<ErrorInfo>) {
        self.outcome.errored.push(key.clone());
        if self.keep_going {
            self.outcome.child_errors.push(error);
        } else if self.outcome.dep_error_key.is_none() {
            self.outcome.dep_error_key = Some(key.clone());
        }
    }
}

impl fmt::Debug for Environment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("key", self.key)
            .field("version", &self.version)
            .field("requested", &self.outcome.newly_requested.len())
            .field("missing", &self.outcome.missing.len())
            .field("errored", &self.outcome.errored.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeError;
    use crate::graph::InMemoryGraph;

    fn key(arg: &str) -> Key {
        Key::new("node", arg)
    }

    fn graph_with(done: &[(&str, i64)]) -> InMemoryGraph {
        let graph = InMemoryGraph::new();
        for (arg, value) in done {
            graph.create_if_absent_batch(&[key(arg)])[&key(arg)]
                .lock()
                .inject(Value::new(*value), Version(1));
        }
        graph
    }

    fn failed(graph: &InMemoryGraph, arg: &str, error: NodeError) {
        let handle = graph.create_if_absent_batch(&[key(arg)])[&key(arg)].clone();
        let mut entry = handle.lock();
        entry.add_reverse_dep_and_check_if_done(None);
        let info = ErrorInfo::from_node_error(&key(arg), error, false);
        entry
            .set_value(&key(arg), None, Some(Arc::new(info)), Version(1))
            .unwrap();
    }

    #[test]
    fn test_groups_and_missing() {
        let graph = graph_with(&[("a", 1)]);
        let interrupt = InterruptHandle::new();
        let me = key("me");
        let mut env = Environment::new(&me, Version(2), false, &graph, &interrupt);

        assert_eq!(env.get_value(&key("a")), Some(Value::new(1_i64)));
        assert!(!env.values_missing());
        let values = env.get_values(&[key("b"), key("a"), key("c")]);
        assert_eq!(values, vec![None, Some(Value::new(1_i64)), None]);
        assert!(env.values_missing());

        let outcome = env.into_outcome();
        assert_eq!(
            outcome.newly_requested.groups(),
            &[vec![key("a")], vec![key("b"), key("c")]]
        );
        assert_eq!(outcome.missing, vec![key("b"), key("c")]);
    }

    #[test]
    fn test_fail_fast_remembers_first_error() {
        let graph = InMemoryGraph::new();
        failed(&graph, "bad", NodeError::new("boom"));
        failed(&graph, "worse", NodeError::new("bang").transient());
        let interrupt = InterruptHandle::new();
        let me = key("me");
        let mut env = Environment::new(&me, Version(2), false, &graph, &interrupt);

        assert_eq!(env.get_values(&[key("bad"), key("worse")]), vec![None, None]);
        let outcome = env.into_outcome();
        assert_eq!(outcome.dep_error_key, Some(key("bad")));
        assert_eq!(outcome.errored, vec![key("bad"), key("worse")]);
        assert!(outcome.missing.is_empty());
        assert!(outcome.child_errors.is_empty());
        assert!(outcome.transitively_transient);
    }

    #[test]
    fn test_keep_going_collects_errors() {
        let graph = InMemoryGraph::new();
        failed(&graph, "bad", NodeError::new("boom"));
        let interrupt = InterruptHandle::new();
        let me = key("me");
        let mut env = Environment::new(&me, Version(2), true, &graph, &interrupt);

        assert!(env.get_value(&key("bad")).is_none());
        let outcome = env.into_outcome();
        assert_eq!(outcome.child_errors.len(), 1);
        assert_eq!(outcome.dep_error_key, None);
    }

    #[test]
    fn test_get_value_or_error_does_not_propagate() {
        let graph = InMemoryGraph::new();
        failed(&graph, "bad", NodeError::new("boom"));
        let interrupt = InterruptHandle::new();
        let me = key("me");
        let mut env = Environment::new(&me, Version(2), true, &graph, &interrupt);

        let err = env.get_value_or_error(&key("bad")).unwrap_err();
        assert_eq!(err.to_string(), "compute error: boom");
        assert!(!env.values_missing());
        assert!(env.into_outcome().child_errors.is_empty());
    }

    #[test]
    fn test_events_are_attributed() {
        let graph = InMemoryGraph::new();
        let interrupt = InterruptHandle::new();
        let me = key("me");
        let mut env = Environment::new(&me, Version(2), false, &graph, &interrupt);

        env.warn("careful");
        env.report(Event::info("elsewhere").with_key(key("other")));
        let events = env.into_outcome().events;
        assert_eq!(events[0].key, Some(key("me")));
        assert_eq!(events[1].key, Some(key("other")));
    }

    #[test]
    fn test_check_interrupted() {
        let graph = InMemoryGraph::new();
        let interrupt = InterruptHandle::new();
        let me = key("me");
        let env = Environment::new(&me, Version(2), false, &graph, &interrupt);

        assert!(env.check_interrupted().is_ok());
        interrupt.interrupt();
        assert_eq!(env.check_interrupted(), Err(ComputeError::Interrupted));
    }
}
