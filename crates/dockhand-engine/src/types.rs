//! Request and response types exchanged with an [`Engine`](crate::Engine).

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use dockhand_common::constants::{LABEL_FILTER, REFERENCE_FILTER};
use dockhand_common::types::ImageId;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Progress records produced while an image build runs.
///
/// The stream may borrow the engine that produced it.
pub type BuildStream<'a> = BoxStream<'a, Result<BuildOutput, EngineError>>;

/// Status records produced while an image pull runs.
///
/// The stream may borrow the engine that produced it.
pub type PullStream<'a> = BoxStream<'a, Result<PullStatus, EngineError>>;

/// A container's combined output, one tagged chunk at a time.
pub type LogStream = BoxStream<'static, Result<LogChunk, EngineError>>;

/// Key/value match criteria applied to an image listing.
///
/// Values under the same key are all sent to the engine, mirroring the
/// engine's own filter syntax (`reference=alpine`, `label=team=ci`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFilter(BTreeMap<String, Vec<String>>);

impl ImageFilter {
    /// Creates an empty filter matching every image.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a filter matching images whose reference is `name`.
    #[must_use]
    pub fn reference(name: impl Into<String>) -> Self {
        Self::new().with(REFERENCE_FILTER, name)
    }

    /// Creates a filter matching images carrying `label` (`key` or `key=value`).
    #[must_use]
    pub fn label(label: impl Into<String>) -> Self {
        Self::new().with(LABEL_FILTER, label)
    }

    /// Adds a criterion and returns the filter.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add(key, value);
        self
    }

    /// Adds a criterion in place.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.entry(key.into()).or_default().push(value.into());
    }

    /// Returns whether no criterion has been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over criteria grouped by key.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Converts the filter into the map shape expected by the engine API.
    #[must_use]
    pub fn to_map(&self) -> HashMap<String, Vec<String>> {
        self.0.clone().into_iter().collect()
    }
}

/// An image known to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    /// Daemon id.
    pub id: ImageId,
    /// Registry-qualified tags pointing at this image.
    pub repo_tags: Vec<String>,
    /// Image labels.
    pub labels: HashMap<String, String>,
    /// Creation time in Unix seconds.
    pub created: i64,
}

/// A tagged image build submitted to the engine.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Tag applied to the resulting image.
    pub tag: String,
    /// Path of the Dockerfile inside the context archive.
    pub dockerfile: String,
    /// The build context archive.
    pub context: Bytes,
}

/// One record of build output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutput {
    /// Free-form build log text.
    pub stream: Option<String>,
    /// Status line (layer pulls during `FROM`).
    pub status: Option<String>,
}

/// Byte progress of a pull step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressDetail {
    /// Bytes transferred so far.
    #[serde(default)]
    pub current: Option<i64>,
    /// Total bytes expected.
    #[serde(default)]
    pub total: Option<i64>,
}

/// One newline-delimited status record emitted during a pull.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullStatus {
    /// Status text.
    #[serde(default)]
    pub status: String,
    /// Byte progress, when the step transfers data.
    #[serde(default, rename = "progressDetail")]
    pub progress_detail: ProgressDetail,
    /// Layer or tag the record refers to.
    #[serde(default)]
    pub id: Option<String>,
}

/// A bind mount of a host path into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    /// Host path.
    pub source: String,
    /// Path inside the container.
    pub target: String,
}

/// Everything the engine needs to create a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Image reference.
    pub image: String,
    /// Command and arguments; empty keeps the image default.
    pub command: Vec<String>,
    /// Shell override for shell-form instructions; empty keeps the default.
    pub shell: Vec<String>,
    /// Environment as `KEY=VALUE` entries, in declaration order.
    pub env: Vec<String>,
    /// Working directory; `None` keeps the image default.
    pub working_dir: Option<String>,
    /// Bind mounts, in declaration order.
    pub mounts: Vec<MountSpec>,
}

/// State of a container as reported by inspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerStatus {
    /// Whether the main process is still running.
    pub running: bool,
    /// Exit code of the main process once terminated.
    pub exit_code: Option<i64>,
}

/// A chunk of container output tagged with its origin channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogChunk {
    /// Written to standard output.
    Stdout(Bytes),
    /// Written to standard error.
    Stderr(Bytes),
}

impl LogChunk {
    /// Returns the chunk payload.
    #[must_use]
    pub const fn bytes(&self) -> &Bytes {
        match self {
            Self::Stdout(b) | Self::Stderr(b) => b,
        }
    }

    /// Returns whether the chunk came from standard error.
    #[must_use]
    pub const fn is_stderr(&self) -> bool {
        matches!(self, Self::Stderr(_))
    }
}

/// Splits an image reference into the repository and the tag the engine
/// should pull.
///
/// A missing tag selects `latest`; a digest reference is returned whole
/// with an empty tag.
#[must_use]
pub fn split_reference(reference: &str) -> (&str, &str) {
    if reference.contains('@') {
        return (reference, "");
    }
    let name_start = reference.rfind('/').map_or(0, |i| i + 1);
    match reference[name_start..].rfind(':') {
        Some(i) => {
            let at = name_start + i;
            (&reference[..at], &reference[at + 1..])
        }
        None => (reference, "latest"),
    }
}
