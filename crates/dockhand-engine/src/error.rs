//! Errors surfaced by engine calls.

use dockhand_common::error::ConfigError;
use thiserror::Error;

/// Failure of a single engine operation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The transport or the daemon rejected the request.
    #[error("engine request failed: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// The referenced image or container does not exist on the daemon.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// A record in a response stream could not be decoded.
    #[error("decoding {what} failed: {message}")]
    Decode {
        /// What was being decoded.
        what: &'static str,
        /// Decoder error message.
        message: String,
    },

    /// The daemon reported an error inside an otherwise successful response.
    #[error("engine reported: {message}")]
    Daemon {
        /// Message sent by the daemon.
        message: String,
    },

    /// Connection settings were rejected before contacting the daemon.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Reading a local stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller's cancellation token fired before the call completed.
    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Returns whether the daemon reported the target as missing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::Docker(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404,
                    ..
                })
        )
    }

    /// Returns whether the call was abandoned because of cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns whether a response record failed to decode.
    #[must_use]
    pub const fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }
}

/// Convenience alias used throughout the engine crate.
pub type Result<T> = std::result::Result<T, EngineError>;
