//! Trellis incremental evaluation engine
//!
//! This crate computes the values of requested nodes by running
//! user-supplied node functions, discovering the dependencies between nodes
//! as the functions run, and reusing earlier results across evaluations
//! whenever their transitive inputs are unchanged.
//!
//! # Architecture
//!
//! Every node is named by a [`Key`]: a function tag plus an argument. The
//! [`FunctionRegistry`] maps tags to [`NodeFunction`]s. A function reads
//! other nodes through its [`Environment`]; each read becomes a dependency
//! edge in the [`Graph`].
//!
//! ```text
//! invalidate / inject ──► dirty propagation ──► worker pool ──► EvaluationResult
//!                                                  │    ▲
//!                                         compute  ▼    │ signal parents
//!                                               node functions
//! ```
//!
//! ## Key Features
//!
//! - **Dependency Tracking**: edges are recorded as functions request values
//! - **Memoization**: done nodes are reused until something they read changes
//! - **Change Pruning**: a rebuilt node with an unchanged value does not
//!   force its dependents to rebuild
//! - **Parallelism**: independent nodes are evaluated on a pool of threads
//! - **Error Semantics**: fail-fast and keep-going modes, transient errors
//!   that retry on the next evaluation, and cycle reports
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_incremental::prelude::*;
//!
//! let mut registry = FunctionRegistry::new();
//! registry.register_fn("len", |key, _env| {
//!     Ok(Some(Value::new(key.argument().len())))
//! });
//! registry.register_fn("total", |key, env| {
//!     let parts: Vec<Key> = key.argument().split(',').map(|p| Key::new("len", p)).collect();
//!     let values = env.get_values(&parts);
//!     if env.values_missing() {
//!         return Ok(None);
//!     }
//!     let total: usize = values.iter().flatten().filter_map(|v| v.downcast_ref::<usize>()).sum();
//!     Ok(Some(Value::new(total)))
//! });
//!
//! let mut evaluator = Evaluator::new(registry);
//! let root = Key::new("total", "ab,cde");
//! let result = evaluator.evaluate(&[root.clone()], false)?;
//! assert_eq!(result.value(&root).and_then(|v| v.downcast_ref::<usize>()), Some(&5));
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

// Core modules
pub mod deps;
pub mod error;
pub mod node;
pub mod value;

// Graph and evaluation
pub mod cycle;
pub mod env;
pub mod evaluator;
pub mod function;
pub mod graph;
pub mod inconsistency;
mod invalidation;
pub mod result;
pub mod scheduler;

// Ambient
pub mod config;
pub mod events;
pub mod metrics;

// Re-export main types
pub use config::{ConfigError, EvaluatorConfig};
pub use cycle::CycleInfo;
pub use deps::GroupedDeps;
pub use env::Environment;
pub use error::{
    ComputeError, ErrorInfo, EvaluationError, InternalError, NodeError, NodeErrorKind,
};
pub use evaluator::Evaluator;
pub use events::{
    CollectingEventSink, EvaluationState, Event, EventKind, EventSink, NodeState,
    NullProgressReceiver, ProgressReceiver, TracingEventSink,
};
pub use function::{FunctionRegistry, NodeFunction};
pub use graph::{DepsReport, Graph, InMemoryGraph, NodeHandle};
pub use inconsistency::{
    CollectingInconsistencyReceiver, Inconsistency, InconsistencyReceiver,
    LoggingInconsistencyReceiver, StrictInconsistencyReceiver,
};
pub use metrics::{EvaluationMetrics, MetricsSnapshot};
pub use node::{DependencyState, DirtyKind, DirtyState, NodeEntry, NodeStatus};
pub use result::EvaluationResult;
pub use scheduler::InterruptHandle;
pub use trellis_types::{FunctionName, Key, Version};
pub use value::Value;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::env::Environment;
    pub use crate::error::{ComputeError, ErrorInfo, EvaluationError, NodeError};
    pub use crate::evaluator::Evaluator;
    pub use crate::function::{FunctionRegistry, NodeFunction};
    pub use crate::result::EvaluationResult;
    pub use crate::value::Value;
    pub use trellis_types::{Key, Version};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_usage() {
        let mut registry = FunctionRegistry::new();
        registry.register_fn("answer", |_key, _env| Ok(Some(Value::new(42_u32))));
        let mut evaluator = Evaluator::new(registry);
        let key = Key::new("answer", "");

        let result = evaluator.evaluate(std::slice::from_ref(&key), false).unwrap();

        assert_eq!(evaluator.version(), Version(1));
        assert_eq!(result.value(&key), Some(&Value::new(42_u32)));
    }
}
