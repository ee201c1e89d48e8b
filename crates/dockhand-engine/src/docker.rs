//! `bollard`-backed engine talking to a Docker-compatible daemon.

use std::pin::{Pin, pin};

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::{BuildImageOptions, CreateImageOptions, ListImagesOptions, RemoveImageOptions};
use bollard::models::{HostConfig, Mount, MountTypeEnum};
use dockhand_common::config::EngineConfig;
use dockhand_common::types::{ContainerId, ImageId};
use futures::StreamExt;

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::types::{
    BuildOutput, BuildRequest, BuildStream, ContainerSpec, ContainerStatus, ImageFilter,
    ImageRecord, LogChunk, LogStream, ProgressDetail, PullStatus, PullStream, split_reference,
};

/// Engine backed by the Docker Engine API.
///
/// Cloning is cheap; clones share the same connection pool.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connects to the daemon described by `config`.
    ///
    /// Without an explicit host the platform default socket is used.
    /// When enabled, the API version is negotiated once here.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the connection
    /// cannot be set up, or version negotiation fails.
    pub async fn connect(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let docker = match config.host.as_deref() {
            None => Docker::connect_with_local_defaults()?,
            Some(host) if host.starts_with("unix://") || host.starts_with("npipe://") => {
                Docker::connect_with_socket(host, config.timeout_secs, bollard::API_DEFAULT_VERSION)?
            }
            Some(host) => {
                Docker::connect_with_http(host, config.timeout_secs, bollard::API_DEFAULT_VERSION)?
            }
        };
        let docker = if config.negotiate_version {
            docker.negotiate_version().await?
        } else {
            docker
        };
        tracing::info!(host = ?config.host, "connected to container engine");
        Ok(Self { docker })
    }

    /// Connects using `DOCKER_HOST` or the platform default.
    ///
    /// # Errors
    ///
    /// See [`DockerEngine::connect`].
    pub async fn from_env() -> Result<Self> {
        Self::connect(&EngineConfig::from_env()).await
    }

    /// Wraps an already configured client.
    #[must_use]
    pub const fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }
}

fn not_found_or(err: DockerError, kind: &'static str, id: &str) -> EngineError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404, ..
        } => EngineError::NotFound {
            kind,
            id: id.to_string(),
        },
        other => other.into(),
    }
}

fn pull_error(err: DockerError) -> EngineError {
    match err {
        e @ (DockerError::JsonSerdeError { .. } | DockerError::JsonDataError { .. }) => {
            EngineError::Decode {
                what: "pull status",
                message: e.to_string(),
            }
        }
        other => other.into(),
    }
}

#[async_trait]
impl Engine for DockerEngine {
    async fn list_images(&self, filter: &ImageFilter) -> Result<Vec<ImageRecord>> {
        let options = ListImagesOptions::<String> {
            filters: filter.to_map(),
            ..Default::default()
        };
        let images = self.docker.list_images(Some(options)).await?;
        Ok(images
            .into_iter()
            .map(|summary| ImageRecord {
                id: ImageId::new(summary.id),
                repo_tags: summary.repo_tags,
                labels: summary.labels,
                created: summary.created,
            })
            .collect())
    }

    fn build_image(&self, request: BuildRequest) -> BuildStream<'_> {
        let options = BuildImageOptions {
            dockerfile: request.dockerfile,
            t: request.tag,
            rm: true,
            ..Default::default()
        };
        self.docker
            .build_image(options, None, Some(request.context))
            .map(|item| match item {
                Ok(info) => match info.error {
                    Some(message) => Err(EngineError::Daemon { message }),
                    None => Ok(BuildOutput {
                        stream: info.stream,
                        status: info.status,
                    }),
                },
                Err(e) => Err(e.into()),
            })
            .boxed()
    }

    fn pull_image(&self, reference: &str) -> PullStream<'_> {
        let (from_image, tag) = split_reference(reference);
        let options = CreateImageOptions::<String> {
            from_image: from_image.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };
        self.docker
            .create_image(Some(options), None, None)
            .map(|item| match item {
                Ok(info) => match info.error {
                    Some(message) => Err(EngineError::Daemon { message }),
                    None => Ok(PullStatus {
                        status: info.status.unwrap_or_default(),
                        progress_detail: info
                            .progress_detail
                            .map(|p| ProgressDetail {
                                current: p.current,
                                total: p.total,
                            })
                            .unwrap_or_default(),
                        id: info.id,
                    }),
                },
                Err(e) => Err(pull_error(e)),
            })
            .boxed()
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        let options = RemoveImageOptions {
            force: true,
            noprune: false,
        };
        self.docker
            .remove_image(image, Some(options), None)
            .await
            .map(|_| ())
            .map_err(|e| not_found_or(e, "image", image))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId> {
        let mounts = spec
            .mounts
            .iter()
            .map(|m| Mount {
                source: Some(m.source.clone()),
                target: Some(m.target.clone()),
                typ: Some(MountTypeEnum::BIND),
                ..Default::default()
            })
            .collect();
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: (!spec.command.is_empty()).then(|| spec.command.clone()),
            shell: (!spec.shell.is_empty()).then(|| spec.shell.clone()),
            env: Some(spec.env.clone()),
            working_dir: spec.working_dir.clone(),
            tty: Some(false),
            host_config: Some(HostConfig {
                mounts: Some(mounts),
                ..Default::default()
            }),
            ..Default::default()
        };
        let response = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(|e| not_found_or(e, "image", &spec.image))?;
        for warning in &response.warnings {
            tracing::warn!(id = %response.id, warning, "engine warning on create");
        }
        Ok(ContainerId::new(response.id))
    }

    async fn start_container(&self, id: &ContainerId) -> Result<()> {
        self.docker
            .start_container(id.as_str(), None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| not_found_or(e, "container", id.as_str()))
    }

    async fn wait_container(&self, id: &ContainerId) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut responses = pin!(self.docker.wait_container(id.as_str(), Some(options)));
        match responses.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero status as an error; it is still a
            // terminal state as far as waiting is concerned.
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(not_found_or(e, "container", id.as_str())),
            None => Err(EngineError::Daemon {
                message: "wait stream ended without a status".into(),
            }),
        }
    }

    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerStatus> {
        let info = self
            .docker
            .inspect_container(id.as_str(), None::<InspectContainerOptions>)
            .await
            .map_err(|e| not_found_or(e, "container", id.as_str()))?;
        let state = info.state.unwrap_or_default();
        Ok(ContainerStatus {
            running: state.running.unwrap_or(false),
            exit_code: state.exit_code,
        })
    }

    async fn container_logs(&self, id: &ContainerId) -> Result<LogStream> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = self
            .docker
            .logs(id.as_str(), Some(options))
            .filter_map(|item| async move {
                match item {
                    Ok(LogOutput::StdOut { message } | LogOutput::Console { message }) => {
                        Some(Ok(LogChunk::Stdout(message)))
                    }
                    Ok(LogOutput::StdErr { message }) => Some(Ok(LogChunk::Stderr(message))),
                    Ok(LogOutput::StdIn { .. }) => None,
                    Err(e) => Some(Err(EngineError::from(e))),
                }
            })
            .boxed()
            .peekable();

        // Polling once sends the request; a rejected request surfaces here
        // instead of inside the caller's reader.
        let rejected = matches!(Pin::new(&mut stream).peek().await, Some(Err(_)));
        if rejected {
            if let Some(Err(e)) = stream.next().await {
                return Err(e);
            }
        }
        Ok(stream.boxed())
    }

    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.docker
            .remove_container(id.as_str(), Some(options))
            .await
            .map_err(|e| not_found_or(e, "container", id.as_str()))
    }
}
