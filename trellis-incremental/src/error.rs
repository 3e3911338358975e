//! Error types for the evaluator
//!
//! Node functions fail with a [`NodeError`]; the graph records failures as
//! [`ErrorInfo`]. Contract violations surface as [`InternalError`] and abort
//! the whole evaluation.

use crate::cycle::CycleInfo;
use crate::inconsistency::Inconsistency;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use trellis_types::Key;

/// Broad category of a node failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeErrorKind {
    /// The function failed for a semantic reason
    Compute,
    /// An input the node declared did not materialize
    MissingInput,
}

impl fmt::Display for NodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeErrorKind::Compute => write!(f, "compute error"),
            NodeErrorKind::MissingInput => write!(f, "missing input"),
        }
    }
}

/// Failure raised by a node function
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct NodeError {
    kind: NodeErrorKind,
    message: String,
    transient: bool,
    catastrophic: bool,
    root_cause: Option<Key>,
}

impl NodeError {
    /// A semantic failure of the node's own logic
    pub fn new(message: impl Into<String>) -> Self {
        NodeError {
            kind: NodeErrorKind::Compute,
            message: message.into(),
            transient: false,
            catastrophic: false,
            root_cause: None,
        }
    }

    /// A declared input that does not exist
    pub fn missing_input(message: impl Into<String>) -> Self {
        NodeError {
            kind: NodeErrorKind::MissingInput,
            ..NodeError::new(message)
        }
    }

    /// Mark as transient: a later evaluation may succeed without any
    /// recorded dependency changing.
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    /// Mark as catastrophic: abort the evaluation even in keep-going mode.
    pub fn catastrophic(mut self) -> Self {
        self.catastrophic = true;
        self
    }

    /// Attribute the failure to another node
    pub fn with_root_cause(mut self, key: Key) -> Self {
        self.root_cause = Some(key);
        self
    }

    /// Category of the failure
    pub fn kind(&self) -> NodeErrorKind {
        self.kind
    }

    /// Message given by the function
    pub fn message(&self) -> &str {
        &self.message
    }

    /// True if a later evaluation may succeed without any input changing
    pub fn is_transient(&self) -> bool {
        self.transient
    }

    /// True if the error aborts even a keep-going evaluation
    pub fn is_catastrophic(&self) -> bool {
        self.catastrophic
    }

    /// Node the failure originated at, if attached
    pub fn root_cause(&self) -> Option<&Key> {
        self.root_cause.as_ref()
    }
}

/// Outcome of a node function other than a value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComputeError {
    /// The function failed
    #[error(transparent)]
    Node(#[from] NodeError),

    /// The function saw the interrupt flag
    #[error("evaluation interrupted")]
    Interrupted,

    /// Discard the dependencies requested so far and run the function
    /// again from scratch
    #[error("restart from scratch requested")]
    Restart,
}

/// Error recorded on a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    exception: Option<NodeError>,
    root_causes: BTreeSet<Key>,
    cycles: Vec<CycleInfo>,
    transitively_transient: bool,
    catastrophic: bool,
}

impl ErrorInfo {
    /// Error thrown by the function of `key`
    pub fn from_node_error(key: &Key, error: NodeError, transitively_transient: bool) -> Self {
        let root = error.root_cause().cloned().unwrap_or_else(|| key.clone());
        ErrorInfo {
            transitively_transient: transitively_transient || error.is_transient(),
            catastrophic: error.is_catastrophic(),
            root_causes: BTreeSet::from([root]),
            cycles: Vec::new(),
            exception: Some(error),
        }
    }

    /// Error of `key` inherited from the dependencies it failed to read
    pub fn from_child_errors(key: &Key, children: &[Arc<ErrorInfo>]) -> Self {
        let mut info = ErrorInfo {
            exception: None,
            root_causes: BTreeSet::new(),
            cycles: Vec::new(),
            transitively_transient: false,
            catastrophic: false,
        };
        for child in children {
            if info.exception.is_none() {
                info.exception = child.exception.clone();
            }
            info.root_causes.extend(child.root_causes.iter().cloned());
            for cycle in &child.cycles {
                let cycle = cycle.seen_from(key);
                if !info.cycles.contains(&cycle) {
                    info.cycles.push(cycle);
                }
            }
            info.transitively_transient |= child.transitively_transient;
            info.catastrophic |= child.catastrophic;
        }
        info
    }

    /// Error of a node that sits on or above dependency cycles
    pub fn from_cycles(cycles: Vec<CycleInfo>) -> Self {
        ErrorInfo {
            exception: None,
            root_causes: BTreeSet::new(),
            cycles,
            transitively_transient: false,
            catastrophic: false,
        }
    }

    /// First node error behind this one, if any
    pub fn exception(&self) -> Option<&NodeError> {
        self.exception.as_ref()
    }

    /// Keys whose own functions failed
    pub fn root_causes(&self) -> &BTreeSet<Key> {
        &self.root_causes
    }

    /// Cycles reported for the node
    pub fn cycles(&self) -> &[CycleInfo] {
        &self.cycles
    }

    /// True if any cycle was reported
    pub fn has_cycle(&self) -> bool {
        !self.cycles.is_empty()
    }

    /// True if the failure can go away on retry
    pub fn is_transitively_transient(&self) -> bool {
        self.transitively_transient
    }

    /// True if any error behind this one was catastrophic
    pub fn is_catastrophic(&self) -> bool {
        self.catastrophic
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.exception, self.cycles.first()) {
            (Some(exception), _) => write!(f, "{exception}"),
            (None, Some(cycle)) => write!(f, "dependency cycle: {cycle}"),
            (None, None) => write!(f, "evaluation failed"),
        }
    }
}

impl std::error::Error for ErrorInfo {}

/// Contract violations and evaluator bugs
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InternalError {
    /// A function returned a value after requesting deps that were not done
    #[error("evaluation of {key} returned a value but requested dependencies that were not done yet ({})", join_keys(.missing))]
    ValueWithMissingDeps {
        /// Node being evaluated
        key: Key,
        /// Deps that were not done
        missing: Vec<Key>,
    },

    /// A function returned no value without requesting a missing dep
    #[error("evaluation of {key} returned no value and requested no missing dependencies")]
    NoValueWithoutMissingDeps {
        /// Node being evaluated
        key: Key,
    },

    /// No function is registered for the key's tag
    #[error("no function registered for '{}' (node {key})", .key.function())]
    UnknownFunction {
        /// Node being evaluated
        key: Key,
    },

    /// A scheduled node has no entry
    #[error("node {key} is not in the graph")]
    MissingEntry {
        /// Node being evaluated
        key: Key,
    },

    /// A done node was scheduled again
    #[error("node {key} was scheduled while already done")]
    AlreadyDone {
        /// Node being evaluated
        key: Key,
    },

    /// A node was scheduled while deps were still pending
    #[error("node {key} was scheduled before its dependencies were done")]
    NotReady {
        /// Node being evaluated
        key: Key,
    },

    /// A dep that signaled its parent is not done
    #[error("dependency {dep} of {key} was expected to be done")]
    DepNotDone {
        /// Node being evaluated
        key: Key,
        /// Dep that was not done
        dep: Key,
    },

    /// A root did not finish and no cycle explains it
    #[error("node {key} did not finish but no cycle was found below it")]
    NoCycleFound {
        /// Node being evaluated
        key: Key,
    },

    /// A node function panicked
    #[error("{message}")]
    Panicked {
        /// Node being evaluated
        key: Key,
        /// Panic message with the nodes that requested the key
        message: String,
    },

    /// An inconsistency receiver rejected the state of the graph
    #[error("graph inconsistency at {key} ({kind}{})", other_node(.other))]
    Inconsistent {
        /// Node being evaluated
        key: Key,
        /// Second node involved, such as an evicted child
        other: Option<Key>,
        /// What was inconsistent
        kind: Inconsistency,
    },
}

/// Failure of a whole `evaluate` call
#[derive(Debug, Error)]
pub enum EvaluationError {
    /// The interrupt handle was triggered
    #[error("evaluation interrupted")]
    Interrupted,

    /// The evaluator or a node function broke an invariant
    #[error(transparent)]
    Internal(#[from] InternalError),
}

fn other_node(other: &Option<Key>) -> String {
    match other {
        Some(key) => format!(", other node {key}"),
        None => String::new(),
    }
}

pub(crate) fn join_keys(keys: &[Key]) -> String {
    keys.iter()
        .map(|key| key.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
