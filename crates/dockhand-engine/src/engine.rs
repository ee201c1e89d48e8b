//! The engine capability consumed by the rest of the workspace.

use async_trait::async_trait;
use dockhand_common::types::ContainerId;

use crate::error::Result;
use crate::types::{
    BuildRequest, BuildStream, ContainerSpec, ContainerStatus, ImageFilter, ImageRecord,
    LogStream, PullStream,
};

/// Image and container operations against a remote engine daemon.
///
/// Implementations must be safe to share between tasks: one handle is
/// used concurrently by resolvers, runners and collectors. Dropping a
/// returned future or stream abandons the underlying request.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Lists images matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon cannot be queried.
    async fn list_images(&self, filter: &ImageFilter) -> Result<Vec<ImageRecord>>;

    /// Submits a tagged build. The build only completes once the returned
    /// stream has been drained.
    fn build_image(&self, request: BuildRequest) -> BuildStream<'_>;

    /// Pulls `reference` from its registry. The pull only completes once
    /// the returned stream has been drained.
    fn pull_image(&self, reference: &str) -> PullStream<'_>;

    /// Force-removes an image and prunes its untagged parents.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`](crate::EngineError::NotFound) for
    /// an unknown image, or any daemon error.
    async fn remove_image(&self, image: &str) -> Result<()>;

    /// Creates a container and returns its daemon id.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon rejects the request.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId>;

    /// Starts a created container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be started.
    async fn start_container(&self, id: &ContainerId) -> Result<()>;

    /// Blocks until the container is no longer running and returns the
    /// status code reported by the daemon.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait request itself fails.
    async fn wait_container(&self, id: &ContainerId) -> Result<i64>;

    /// Reads the container's run state and exit code.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be inspected.
    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerStatus>;

    /// Opens the container's combined stdout/stderr log.
    ///
    /// The request is sent before this returns, so the stream remains
    /// readable after the container is removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the log request is rejected.
    async fn container_logs(&self, id: &ContainerId) -> Result<LogStream>;

    /// Removes a container; `force` also kills it if still running.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be removed.
    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<()>;
}
