//! Image resolution: build, pull, or reuse.

use std::fmt;
use std::sync::Arc;

use dockhand_common::constants::DOCKERFILE_NAME;
use dockhand_engine::types::BuildOutput;
use dockhand_engine::{BuildRequest, Engine, EngineError, ImageFilter, cancellable};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::context::{BuildContext, has_root_dockerfile};
use crate::error::ResolveError;
use crate::options::ImageOptions;

/// Where build output is written while an image builds.
///
/// Output is forwarded as it arrives and never returned to the caller.
/// Writing is fire-and-forget: stdout is written from a separate task so a
/// blocked terminal never stalls the build, and write failures are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProgressSink {
    /// The process's standard output.
    #[default]
    Stdout,
    /// `tracing` events at info level.
    Tracing,
    /// Dropped.
    Discard,
}

impl ProgressSink {
    fn open(self) -> ProgressWriter {
        let stdout = (self == Self::Stdout).then(|| {
            let (tx, mut rx) = mpsc::unbounded_channel::<String>();
            let _ = tokio::spawn(async move {
                let mut stdout = tokio::io::stdout();
                while let Some(text) = rx.recv().await {
                    if stdout.write_all(text.as_bytes()).await.is_err() {
                        break;
                    }
                    let _ = stdout.flush().await;
                }
            });
            tx
        });
        ProgressWriter { sink: self, stdout }
    }
}

/// The open end of a [`ProgressSink`] for one build.
struct ProgressWriter {
    sink: ProgressSink,
    stdout: Option<UnboundedSender<String>>,
}

impl ProgressWriter {
    fn emit(&self, output: &BuildOutput) {
        let Some(text) = output.stream.as_deref().or(output.status.as_deref()) else {
            return;
        };
        match self.sink {
            ProgressSink::Stdout => {
                if let Some(tx) = &self.stdout {
                    let _ = tx.send(text.to_string());
                }
            }
            ProgressSink::Tracing => {
                tracing::info!(target: "dockhand::build", "{}", text.trim_end());
            }
            ProgressSink::Discard => {}
        }
    }
}

/// An image available on the engine.
///
/// Holds the engine it was resolved against so containers can be
/// created from it. Cloning is cheap.
#[derive(Clone)]
pub struct Image {
    engine: Arc<dyn Engine>,
    name: String,
    build_context: bool,
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("name", &self.name)
            .field("build_context", &self.build_context)
            .finish_non_exhaustive()
    }
}

impl Image {
    /// Returns the registry-qualified name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns whether the image was resolved from a build context.
    #[must_use]
    pub const fn has_build_context(&self) -> bool {
        self.build_context
    }

    /// Returns the engine this image lives on.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Pulls the latest version of the image from its registry.
    ///
    /// Every status record is decoded as it arrives.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::PullStatus`] on a malformed record,
    /// [`ResolveError::Cancelled`] if `cancel` fires, and
    /// [`ResolveError::Pull`] for any other failure.
    pub async fn pull(&self, cancel: &CancellationToken) -> Result<(), ResolveError> {
        tracing::info!(image = %self.name, "pulling image");
        let mut statuses = self.engine.pull_image(&self.name);
        while let Some(item) = cancellable(cancel, async { Ok(statuses.next().await) })
            .await
            .map_err(|_| self.cancelled())?
        {
            match item {
                Ok(status) => tracing::debug!(
                    image = %self.name,
                    status = %status.status,
                    layer = ?status.id,
                    current = ?status.progress_detail.current,
                    total = ?status.progress_detail.total,
                    "pull progress"
                ),
                Err(source) if source.is_decode() => {
                    return Err(ResolveError::PullStatus {
                        image: self.name.clone(),
                        source,
                    });
                }
                Err(source) => {
                    return Err(ResolveError::Pull {
                        image: self.name.clone(),
                        source,
                    });
                }
            }
        }
        tracing::info!(image = %self.name, "image pulled");
        Ok(())
    }

    fn cancelled(&self) -> ResolveError {
        ResolveError::Cancelled {
            image: self.name.clone(),
        }
    }
}

/// Decides how each image becomes available and carries it out.
#[derive(Clone)]
pub struct Resolver {
    engine: Arc<dyn Engine>,
    progress: ProgressSink,
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}

impl Resolver {
    /// Creates a resolver writing build output to stdout.
    #[must_use]
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            progress: ProgressSink::default(),
        }
    }

    /// Selects where build output goes.
    #[must_use]
    pub const fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    /// Makes `name` available on the engine.
    ///
    /// With a build context the image is built when it is missing or when
    /// `force_rebuild` is set, and reused otherwise. Without one it is
    /// pulled; a failed pull is tolerated when a local copy already exists.
    /// The existence check is best-effort: a failed listing counts as
    /// "missing".
    ///
    /// # Errors
    ///
    /// Returns a [`ResolveError`] naming the image when options are
    /// invalid, the build fails, the pull fails with no local copy, or
    /// `cancel` fires.
    pub async fn resolve(
        &self,
        name: &str,
        options: ImageOptions,
        cancel: &CancellationToken,
    ) -> Result<Image, ResolveError> {
        options
            .validate(name)
            .map_err(|source| ResolveError::Options {
                image: name.to_string(),
                source,
            })?;

        let image = Image {
            engine: Arc::clone(&self.engine),
            name: name.to_string(),
            build_context: options.build_context.is_some(),
        };
        let exists = self.exists(name, cancel).await;

        let ImageOptions {
            build_context,
            force_rebuild,
        } = options;

        if let Some(context) = build_context {
            if force_rebuild || !exists {
                self.build(&image, context, cancel).await?;
            } else {
                tracing::info!(image = name, "image present, skipping build");
            }
            return Ok(image);
        }

        match image.pull(cancel).await {
            Ok(()) => Ok(image),
            Err(ResolveError::Cancelled { image }) => Err(ResolveError::Cancelled { image }),
            Err(e) if exists => {
                tracing::warn!(image = name, error = %e, "pull failed, using local copy");
                Ok(image)
            }
            Err(e) => Err(e),
        }
    }

    async fn exists(&self, name: &str, cancel: &CancellationToken) -> bool {
        let filter = ImageFilter::reference(name);
        match cancellable(cancel, self.engine.list_images(&filter)).await {
            Ok(images) => !images.is_empty(),
            Err(e) => {
                tracing::warn!(image = name, error = %e, "existence check failed, assuming missing");
                false
            }
        }
    }

    async fn build(
        &self,
        image: &Image,
        context: BuildContext,
        cancel: &CancellationToken,
    ) -> Result<(), ResolveError> {
        let read_failed = |source| ResolveError::ReadContext {
            image: image.name.clone(),
            source,
        };
        let archive = context.into_bytes().await.map_err(read_failed)?;
        if !has_root_dockerfile(&archive).map_err(read_failed)? {
            return Err(ResolveError::MissingDockerfile {
                image: image.name.clone(),
            });
        }

        tracing::info!(image = %image.name, bytes = archive.len(), "building image");
        let request = BuildRequest {
            tag: image.name.clone(),
            dockerfile: DOCKERFILE_NAME.to_string(),
            context: archive,
        };
        let progress = self.progress.open();
        let mut outputs = self.engine.build_image(request);
        // The build is only complete once its output has been drained.
        while let Some(item) = cancellable(cancel, async { Ok(outputs.next().await) })
            .await
            .map_err(|_: EngineError| image.cancelled())?
        {
            let output = item.map_err(|source| ResolveError::Build {
                image: image.name.clone(),
                source,
            })?;
            progress.emit(&output);
        }
        tracing::info!(image = %image.name, "image built");
        Ok(())
    }
}
