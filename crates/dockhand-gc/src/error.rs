//! Collector errors.

use dockhand_common::error::ConfigError;
use dockhand_common::types::ImageId;
use dockhand_engine::EngineError;
use thiserror::Error;

/// Failure to start the collector or to complete a sweep.
#[derive(Debug, Error)]
pub enum CollectError {
    /// The collector configuration was rejected.
    #[error("collector configuration failed: {0}")]
    Config(#[from] ConfigError),

    /// Listing candidate images failed; nothing was removed.
    #[error("listing images failed: {0}")]
    List(#[source] EngineError),

    /// One or more removals failed during a sweep.
    #[error("{} image removal(s) failed: {}", .failures.len(), summary(.failures))]
    Sweep {
        /// Each image that could not be removed, with the reason.
        failures: Vec<(ImageId, EngineError)>,
    },
}

fn summary(failures: &[(ImageId, EngineError)]) -> String {
    failures
        .iter()
        .map(|(id, e)| format!("{id}: {e}"))
        .collect::<Vec<_>>()
        .join("; ")
}
