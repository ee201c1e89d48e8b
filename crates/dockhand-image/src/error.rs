//! Image resolution errors.

use dockhand_common::error::ConfigError;
use dockhand_engine::EngineError;
use thiserror::Error;

/// Why an image could not be made available.
///
/// Every variant names the image so that failures in multi-image
/// orchestration can be attributed without consulting logs.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The resolution options were rejected.
    #[error("image options for image `{image}` failed: {source}")]
    Options {
        /// Image being resolved.
        image: String,
        /// Rejected options.
        source: ConfigError,
    },

    /// The build context could not be read.
    #[error("reading build context for image `{image}` failed: {source}")]
    ReadContext {
        /// Image being resolved.
        image: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The build context has no `Dockerfile` at its root.
    #[error("build context for image `{image}` has no root-level Dockerfile")]
    MissingDockerfile {
        /// Image being resolved.
        image: String,
    },

    /// The engine failed to build the image.
    #[error("building image `{image}` failed: {source}")]
    Build {
        /// Image being resolved.
        image: String,
        /// Engine failure.
        source: EngineError,
    },

    /// The image could not be pulled and no local copy exists.
    #[error("pulling image `{image}` failed: {source}")]
    Pull {
        /// Image being resolved.
        image: String,
        /// Engine failure.
        source: EngineError,
    },

    /// A pull status record was malformed.
    #[error("decoding pull status for image `{image}` failed: {source}")]
    PullStatus {
        /// Image being resolved.
        image: String,
        /// Decode failure.
        source: EngineError,
    },

    /// The caller cancelled the resolution.
    #[error("resolving image `{image}` was cancelled")]
    Cancelled {
        /// Image being resolved.
        image: String,
    },
}

impl ResolveError {
    /// Returns the name of the image the error belongs to.
    #[must_use]
    pub fn image(&self) -> &str {
        match self {
            Self::Options { image, .. }
            | Self::ReadContext { image, .. }
            | Self::MissingDockerfile { image }
            | Self::Build { image, .. }
            | Self::Pull { image, .. }
            | Self::PullStatus { image, .. }
            | Self::Cancelled { image } => image,
        }
    }
}
