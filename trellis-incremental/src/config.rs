//! Evaluator configuration.

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::Path;
use thiserror::Error;

/// Errors loading an evaluator configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// The file is not valid YAML for the config
    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// A setting is out of range
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        /// Offending setting
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

/// Tuning knobs of an [`Evaluator`](crate::Evaluator)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Number of worker threads
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Cycles recorded per node when an evaluation stalls on a cycle
    #[serde(default = "default_max_cycles_reported")]
    pub max_cycles_reported: usize,
}

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

fn default_max_cycles_reported() -> usize {
    20
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        EvaluatorConfig {
            threads: default_threads(),
            max_cycles_reported: default_max_cycles_reported(),
        }
    }
}

impl EvaluatorConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: EvaluatorConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    /// Set the worker count
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Reject settings the evaluator cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::Invalid {
                field: "threads",
                reason: "at least one worker thread is required".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_for_missing_fields() {
        let config = EvaluatorConfig::from_yaml_str("threads: 3\n").unwrap();
        assert_eq!(config.threads, 3);
        assert_eq!(config.max_cycles_reported, 20);
    }

    #[test]
    fn test_zero_threads_rejected() {
        let err = EvaluatorConfig::from_yaml_str("threads: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "threads", .. }));
    }

    #[test]
    fn test_parse_error() {
        let err = EvaluatorConfig::from_yaml_str("threads: [").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "threads: 2\nmax_cycles_reported: 5").unwrap();

        let config = EvaluatorConfig::load(file.path()).unwrap();
        assert_eq!(
            config,
            EvaluatorConfig {
                threads: 2,
                max_cycles_reported: 5,
            }
        );
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = EvaluatorConfig::load(dir.path().join("absent.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError(_)));
    }
}
