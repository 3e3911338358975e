//! Node functions and their registry

use crate::env::Environment;
use crate::error::ComputeError;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use trellis_types::{FunctionName, Key};

/// Computes the value of every key tagged with one function name.
///
/// `compute` returns `Ok(None)` when it requested dependencies that are not
/// done yet. It is then run again from scratch once they are, so it must
/// behave the same up to its first missing dependency.
pub trait NodeFunction: Send + Sync {
    /// Compute the value of `key`, reading deps through `env`
    fn compute(&self, key: &Key, env: &mut Environment<'_>) -> Result<Option<Value>, ComputeError>;
}

impl<F> NodeFunction for F
where
    F: Fn(&Key, &mut Environment<'_>) -> Result<Option<Value>, ComputeError> + Send + Sync,
{
    fn compute(&self, key: &Key, env: &mut Environment<'_>) -> Result<Option<Value>, ComputeError> {
        self(key, env)
    }
}

/// Maps function names to node functions
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<FunctionName, Arc<dyn NodeFunction>>,
}

impl FunctionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `function` for keys tagged `name`, replacing any previous one
    pub fn register(
        &mut self,
        name: impl Into<FunctionName>,
        function: Arc<dyn NodeFunction>,
    ) -> &mut Self {
        self.functions.insert(name.into(), function);
        self
    }

    /// Register a closure
    pub fn register_fn<F>(&mut self, name: impl Into<FunctionName>, function: F) -> &mut Self
    where
        F: Fn(&Key, &mut Environment<'_>) -> Result<Option<Value>, ComputeError>
            + Send
            + Sync
            + 'static,
    {
        self.register(name, Arc::new(function))
    }

    /// Function registered under `name`
    pub fn get(&self, name: &FunctionName) -> Option<&Arc<dyn NodeFunction>> {
        self.functions.get(name)
    }

    /// True if `name` has a function
    pub fn contains(&self, name: &FunctionName) -> bool {
        self.functions.contains_key(name)
    }

    /// Number of registered functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// True if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.functions.keys().map(FunctionName::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}
