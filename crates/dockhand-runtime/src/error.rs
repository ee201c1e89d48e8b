//! Container run and log errors.

use dockhand_common::error::ConfigError;
use dockhand_common::types::ContainerId;
use dockhand_engine::EngineError;
use thiserror::Error;

use crate::logs::LogHandle;

/// Why a container could not be created or run to completion.
///
/// Every variant carries the image name, and the container id once one
/// has been assigned.
#[derive(Debug, Error)]
pub enum RunError {
    /// The container options were rejected.
    #[error("container options for image `{image}` failed: {source}")]
    Options {
        /// Image the container was to be created from.
        image: String,
        /// Rejected options.
        source: ConfigError,
    },

    /// The engine refused to create the container.
    #[error("creating container from image `{image}` failed: {source}")]
    Create {
        /// Image the container was to be created from.
        image: String,
        /// Engine failure.
        source: EngineError,
    },

    /// Starting failed.
    #[error("starting container {id} (image `{image}`) failed: {source}")]
    Start {
        /// Container id.
        id: ContainerId,
        /// Image name.
        image: String,
        /// Engine failure.
        source: EngineError,
    },

    /// Waiting for termination failed.
    #[error("waiting for container {id} (image `{image}`) failed: {source}")]
    Wait {
        /// Container id.
        id: ContainerId,
        /// Image name.
        image: String,
        /// Engine failure.
        source: EngineError,
    },

    /// Inspecting the terminated container failed.
    #[error("inspecting container {id} (image `{image}`) failed: {source}")]
    Inspect {
        /// Container id.
        id: ContainerId,
        /// Image name.
        image: String,
        /// Engine failure.
        source: EngineError,
    },

    /// The log stream could not be opened.
    #[error("reading logs of container {id} (image `{image}`) failed: {source}")]
    Logs {
        /// Container id.
        id: ContainerId,
        /// Image name.
        image: String,
        /// Engine failure.
        source: EngineError,
    },

    /// Removing the container failed.
    #[error("removing container {id} (image `{image}`) failed: {source}")]
    Remove {
        /// Container id.
        id: ContainerId,
        /// Image name.
        image: String,
        /// Engine failure.
        source: EngineError,
    },

    /// The container ran to completion with a non-zero exit code.
    ///
    /// Its logs are still available through [`RunError::logs`].
    #[error("container {id} (image `{image}`) exited with code {code}")]
    ExitCode {
        /// Container id.
        id: ContainerId,
        /// Image name.
        image: String,
        /// Exit code of the main process.
        code: i64,
        /// Output of the failed run.
        logs: LogHandle,
    },

    /// The caller cancelled the run after the container was created.
    #[error("run of container {id} (image `{image}`) was cancelled")]
    Cancelled {
        /// Container id.
        id: ContainerId,
        /// Image name.
        image: String,
    },
}

impl RunError {
    /// Returns the logs of a run that exited non-zero.
    #[must_use]
    pub const fn logs(&self) -> Option<&LogHandle> {
        match self {
            Self::ExitCode { logs, .. } => Some(logs),
            _ => None,
        }
    }

    /// Takes the logs of a run that exited non-zero.
    #[must_use]
    pub fn into_logs(self) -> Option<LogHandle> {
        match self {
            Self::ExitCode { logs, .. } => Some(logs),
            _ => None,
        }
    }

    /// Returns the exit code of a run that exited non-zero.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i64> {
        match self {
            Self::ExitCode { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns whether the failure was caused by cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled { .. } => true,
            Self::Create { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Returns the image name the error belongs to.
    #[must_use]
    pub fn image(&self) -> &str {
        match self {
            Self::Options { image, .. }
            | Self::Create { image, .. }
            | Self::Start { image, .. }
            | Self::Wait { image, .. }
            | Self::Inspect { image, .. }
            | Self::Logs { image, .. }
            | Self::Remove { image, .. }
            | Self::ExitCode { image, .. }
            | Self::Cancelled { image, .. } => image,
        }
    }
}

/// A problem met while demultiplexing a log stream.
///
/// These never fail a read: the affected reader ends early instead.
#[derive(Debug, Error)]
pub enum LogError {
    /// The source stream failed mid-way.
    #[error("log stream of {origin} failed: {source}")]
    Stream {
        /// Container the logs belong to.
        origin: String,
        /// Decode or transport failure.
        source: EngineError,
    },

    /// A second accessor was called on the same handle.
    #[error("log stream of {origin} was already consumed")]
    AlreadyConsumed {
        /// Container the logs belong to.
        origin: String,
    },
}
