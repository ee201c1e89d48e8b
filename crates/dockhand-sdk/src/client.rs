//! Entry point bundling an engine with the resolver, runner and collector.

use std::fmt;
use std::sync::Arc;

use dockhand_common::config::EngineConfig;
use dockhand_engine::{DockerEngine, Engine, EngineError};
use dockhand_gc::{Collector, CollectorConfig};
use dockhand_image::{Image, ImageOptions, ProgressSink, ResolveError, Resolver};
use dockhand_runtime::{Container, ContainerOptions, RunError};
use tokio_util::sync::CancellationToken;

/// A handle on one engine.
///
/// Cloning is cheap and clones share the engine connection; every
/// operation may run concurrently with the others.
#[derive(Clone)]
pub struct Client {
    engine: Arc<dyn Engine>,
    resolver: Resolver,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Connects to the Docker daemon described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the daemon
    /// cannot be reached.
    pub async fn connect(config: &EngineConfig) -> Result<Self, EngineError> {
        let engine = DockerEngine::connect(config).await?;
        Ok(Self::with_engine(Arc::new(engine)))
    }

    /// Connects using `DOCKER_HOST` or the platform default socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon cannot be reached.
    pub async fn from_env() -> Result<Self, EngineError> {
        Self::connect(&EngineConfig::from_env()).await
    }

    /// Uses an already constructed engine.
    #[must_use]
    pub fn with_engine(engine: Arc<dyn Engine>) -> Self {
        let resolver = Resolver::new(Arc::clone(&engine));
        Self { engine, resolver }
    }

    /// Selects where build output is written.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.resolver = self.resolver.with_progress(progress);
        self
    }

    /// Returns the shared engine.
    #[must_use]
    pub const fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Makes the image `name` available, building or pulling it as
    /// `options` dictate.
    ///
    /// # Errors
    ///
    /// See [`Resolver::resolve`].
    pub async fn image(
        &self,
        name: &str,
        options: ImageOptions,
        cancel: &CancellationToken,
    ) -> Result<Image, ResolveError> {
        self.resolver.resolve(name, options, cancel).await
    }

    /// Creates a container from a resolved image.
    ///
    /// # Errors
    ///
    /// See [`dockhand_runtime::instantiate`].
    pub async fn instantiate(
        &self,
        image: &Image,
        options: ContainerOptions,
        cancel: &CancellationToken,
    ) -> Result<Container, RunError> {
        dockhand_runtime::instantiate(image, options, cancel).await
    }

    /// Prepares an image collector against this client's engine.
    #[must_use]
    pub fn collector(&self, config: CollectorConfig) -> Collector {
        Collector::new(Arc::clone(&self.engine), config)
    }
}
