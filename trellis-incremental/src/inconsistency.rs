//! Graph inconsistency reporting
//!
//! Some situations leave the graph in a state the evaluator can recover
//! from but that an embedder may want to know about, or forbid: a function
//! asking to restart from scratch, or a dirty node whose recorded child was
//! evicted from the graph. The evaluator reports each one to an
//! [`InconsistencyReceiver`] before recovering; a receiver that returns an
//! error turns the inconsistency into an internal error.

use crate::error::InternalError;
use parking_lot::Mutex;
use std::fmt;
use tracing::warn;
use trellis_types::Key;

/// Kind of inconsistency noticed during an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Inconsistency {
    /// A node function asked to discard its deps and run again
    ResetRequested,
    /// A dependency recorded by a dirty node is no longer in the graph
    ChildMissingForDirtyNode,
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inconsistency::ResetRequested => write!(f, "reset requested"),
            Inconsistency::ChildMissingForDirtyNode => write!(f, "child missing for dirty node"),
        }
    }
}

/// Decides whether an inconsistency is tolerated
pub trait InconsistencyReceiver: Send + Sync + fmt::Debug {
    /// Called with the node being evaluated and, for a missing child, the
    /// child's key. Returning an error aborts the evaluation.
    fn note_inconsistency(
        &self,
        key: &Key,
        other: Option<&Key>,
        kind: Inconsistency,
    ) -> Result<(), InternalError>;
}

/// Logs every inconsistency and lets the evaluation recover (the default)
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingInconsistencyReceiver;

impl InconsistencyReceiver for LoggingInconsistencyReceiver {
    fn note_inconsistency(
        &self,
        key: &Key,
        other: Option<&Key>,
        kind: Inconsistency,
    ) -> Result<(), InternalError> {
        warn!(%key, other = ?other.map(ToString::to_string), %kind, "graph inconsistency");
        Ok(())
    }
}

/// Rejects every inconsistency
#[derive(Debug, Default, Clone, Copy)]
pub struct StrictInconsistencyReceiver;

impl InconsistencyReceiver for StrictInconsistencyReceiver {
    fn note_inconsistency(
        &self,
        key: &Key,
        other: Option<&Key>,
        kind: Inconsistency,
    ) -> Result<(), InternalError> {
        Err(InternalError::Inconsistent {
            key: key.clone(),
            other: other.cloned(),
            kind,
        })
    }
}

/// Records every inconsistency and tolerates it
#[derive(Debug, Default)]
pub struct CollectingInconsistencyReceiver {
    noted: Mutex<Vec<(Key, Option<Key>, Inconsistency)>>,
}

impl CollectingInconsistencyReceiver {
    /// Create an empty receiver
    pub fn new() -> Self {
        Self::default()
    }

    /// Inconsistencies noted so far, in order
    pub fn noted(&self) -> Vec<(Key, Option<Key>, Inconsistency)> {
        self.noted.lock().clone()
    }
}

impl InconsistencyReceiver for CollectingInconsistencyReceiver {
    fn note_inconsistency(
        &self,
        key: &Key,
        other: Option<&Key>,
        kind: Inconsistency,
    ) -> Result<(), InternalError> {
        self.noted.lock().push((key.clone(), other.cloned(), kind));
        Ok(())
    }
}
