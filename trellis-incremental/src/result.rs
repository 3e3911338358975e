//! Outcome of an evaluation

use crate::error::ErrorInfo;
use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use trellis_types::Key;

/// Values and errors of the requested roots
///
/// Roots that neither finished nor received an error (possible only in
/// fail-fast mode, when they did not depend on the failing node) appear in
/// neither map.
#[derive(Debug, Clone, Default)]
pub struct EvaluationResult {
    pub(crate) values: BTreeMap<Key, Value>,
    pub(crate) errors: BTreeMap<Key, Arc<ErrorInfo>>,
    pub(crate) catastrophe: bool,
    pub(crate) error: Option<Arc<ErrorInfo>>,
}

impl EvaluationResult {
    /// Value of a root that finished successfully
    pub fn value(&self, key: &Key) -> Option<&Value> {
        self.values.get(key)
    }

    /// Error recorded for a root
    pub fn error_for(&self, key: &Key) -> Option<&Arc<ErrorInfo>> {
        self.errors.get(key)
    }

    /// All root values, ordered by key
    pub fn values(&self) -> &BTreeMap<Key, Value> {
        &self.values
    }

    /// All root errors, ordered by key
    pub fn errors(&self) -> &BTreeMap<Key, Arc<ErrorInfo>> {
        &self.errors
    }

    /// True if any root failed or a fail-fast error was returned
    pub fn has_error(&self) -> bool {
        !self.errors.is_empty() || self.error.is_some()
    }

    /// True if a catastrophic error ended the evaluation
    pub fn catastrophe(&self) -> bool {
        self.catastrophe
    }

    /// In fail-fast mode, the error that aborted the evaluation, or the
    /// memoized error of the first failed root when nothing had to run.
    /// Always `None` in keep-going mode unless a catastrophe occurred.
    pub fn error(&self) -> Option<&Arc<ErrorInfo>> {
        self.error.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeError;

    #[test]
    fn test_accessors() {
        let ok = Key::new("node", "ok");
        let bad = Key::new("node", "bad");
        let info = Arc::new(ErrorInfo::from_node_error(&bad, NodeError::new("x"), false));
        let result = EvaluationResult {
            values: BTreeMap::from([(ok.clone(), Value::new(1_i64))]),
            errors: BTreeMap::from([(bad.clone(), Arc::clone(&info))]),
            catastrophe: false,
            error: Some(info),
        };

        assert_eq!(result.value(&ok), Some(&Value::new(1_i64)));
        assert!(result.value(&bad).is_none());
        assert!(result.error_for(&bad).is_some());
        assert!(result.has_error());
        assert!(!result.catastrophe());
        assert!(!EvaluationResult::default().has_error());
    }
}
