//! Shared types for trellis
//!
//! This crate provides the identifiers used across the trellis evaluator:
//! node keys, the function-name tags that dispatch them, and evaluation
//! version stamps.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Name of the node function a key is dispatched to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionName(Arc<str>);

impl FunctionName {
    /// Reserved tag of the error-transience node
    pub const ERROR_TRANSIENCE: &'static str = "ERROR_TRANSIENCE";

    /// Create a function tag
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    /// Tag as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FunctionName {
    fn from(name: &str) -> Self {
        FunctionName::new(name)
    }
}

impl From<String> for FunctionName {
    fn from(name: String) -> Self {
        FunctionName::new(name)
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a node: a function tag plus an argument
///
/// Keys order by function name first, then argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    function: FunctionName,
    argument: Arc<str>,
}

impl Key {
    /// Create a key from a function tag and an argument
    pub fn new(function: impl Into<FunctionName>, argument: impl Into<Arc<str>>) -> Self {
        Self {
            function: function.into(),
            argument: argument.into(),
        }
    }

    /// Key of the node whose version advances on every evaluation.
    ///
    /// Nodes that fail transiently depend on it so that the next evaluation
    /// retries them.
    pub fn error_transience() -> Self {
        Key::new(FunctionName::ERROR_TRANSIENCE, "")
    }

    /// Function tag
    pub fn function(&self) -> &FunctionName {
        &self.function
    }

    /// Argument passed to the function
    pub fn argument(&self) -> &str {
        &self.argument
    }

    /// True for the error-transience key
    pub fn is_error_transience(&self) -> bool {
        self.function.as_str() == FunctionName::ERROR_TRANSIENCE && self.argument.is_empty()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.function, self.argument)
    }
}

/// Evaluation version stamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Version(pub u64);

impl Version {
    /// Compares at-most every other version
    pub const MINIMAL: Version = Version(0);

    /// The following version
    pub fn next(self) -> Version {
        Version(self.0 + 1)
    }

    /// True if this version is not newer than `other`
    pub fn at_most(self, other: Version) -> bool {
        self <= other
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display_and_order() {
        let a = Key::new("file", "a.txt");
        let b = Key::new("file", "b.txt");
        let c = Key::new("glob", "a.txt");

        assert_eq!(a.to_string(), "file:a.txt");
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a, Key::new(FunctionName::new("file"), "a.txt"));
    }

    #[test]
    fn test_error_transience_key() {
        let key = Key::error_transience();
        assert!(key.is_error_transience());
        assert!(!Key::new("ERROR_TRANSIENCE", "x").is_error_transience());
    }

    #[test]
    fn test_version_ordering() {
        let v1 = Version(1);
        let v2 = v1.next();

        assert_eq!(v2, Version(2));
        assert!(v1.at_most(v2));
        assert!(v1.at_most(v1));
        assert!(!v2.at_most(v1));
        assert!(Version::MINIMAL.at_most(v1));
    }
}
