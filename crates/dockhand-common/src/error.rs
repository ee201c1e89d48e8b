//! Configuration error shared by every option struct in the workspace.
//!
//! Each higher-level crate defines its own error enum and wraps a
//! [`ConfigError`] together with the identity (image name, container id)
//! the options belonged to.

use std::path::PathBuf;

use thiserror::Error;

/// One or more configuration values were rejected.
///
/// All problems found during a validation pass are reported together
/// rather than stopping at the first one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration: {}", .problems.join("; "))]
pub struct ConfigError {
    /// Human-readable description of every rejected value.
    pub problems: Vec<String>,
}

impl ConfigError {
    /// Creates an error carrying a single problem.
    #[must_use]
    pub fn single(problem: impl Into<String>) -> Self {
        Self {
            problems: vec![problem.into()],
        }
    }
}

/// Errors raised while loading engine configuration from disk.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The configuration file could not be read.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path of the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for the expected shape.
    #[error("malformed configuration: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// The configuration parsed but failed validation.
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

/// Accumulates validation problems and converts them into a [`ConfigError`].
#[derive(Debug, Default)]
pub struct Validator {
    problems: Vec<String>,
}

impl Validator {
    /// Creates an empty validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `problem` unless `ok` holds.
    pub fn check(&mut self, ok: bool, problem: impl FnOnce() -> String) -> &mut Self {
        if !ok {
            self.problems.push(problem());
        }
        self
    }

    /// Returns whether no problem has been recorded so far.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }

    /// Finishes validation.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] listing every recorded problem.
    pub fn finish(self) -> Result<(), ConfigError> {
        if self.problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError {
                problems: self.problems,
            })
        }
    }
}
