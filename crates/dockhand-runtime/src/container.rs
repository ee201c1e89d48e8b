//! Container creation and the run sequence.

use std::fmt;
use std::sync::Arc;

use dockhand_common::types::{ContainerId, ContainerState};
use dockhand_engine::{Engine, EngineError, cancellable};
use dockhand_image::Image;
use tokio_util::sync::CancellationToken;

use crate::error::RunError;
use crate::logs::LogHandle;
use crate::options::ContainerOptions;

/// Creates a container from `image`.
///
/// The container is created but not started; working directory and
/// volumes are applied as given in `options`.
///
/// # Errors
///
/// Returns [`RunError::Options`] if `options` are invalid and
/// [`RunError::Create`] if the engine rejects the request or `cancel` fires.
pub async fn instantiate(
    image: &Image,
    options: ContainerOptions,
    cancel: &CancellationToken,
) -> Result<Container, RunError> {
    options.validate().map_err(|source| RunError::Options {
        image: image.name().to_string(),
        source,
    })?;
    let spec = options.into_spec(image.name());
    let engine = Arc::clone(image.engine());
    let id = cancellable(cancel, engine.create_container(&spec))
        .await
        .map_err(|source| RunError::Create {
            image: image.name().to_string(),
            source,
        })?;
    tracing::info!(id = %id.short(), image = %image.name(), "container created");
    Ok(Container {
        engine,
        id,
        image: image.name().to_string(),
        state: ContainerState::Created,
    })
}

/// A container created on the engine.
pub struct Container {
    engine: Arc<dyn Engine>,
    id: ContainerId,
    image: String,
    state: ContainerState,
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id)
            .field("image", &self.image)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Container {
    /// Returns the engine-assigned id.
    #[must_use]
    pub const fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Returns the image the container was created from.
    #[must_use]
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Returns the lifecycle state last observed.
    #[must_use]
    pub const fn state(&self) -> ContainerState {
        self.state
    }

    /// Runs the container to completion and collects its output.
    ///
    /// Starts the container (unless already started), waits for it to
    /// stop, reads its exit code, opens its logs and removes it. Removal
    /// happens whatever the exit code; its failure is only logged.
    ///
    /// If any step fails or `cancel` fires, a forced removal is attempted
    /// before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::ExitCode`] carrying the logs when the container
    /// exits non-zero, [`RunError::Cancelled`] on cancellation, and the
    /// variant naming the failed step otherwise.
    pub async fn run(mut self, cancel: &CancellationToken) -> Result<LogHandle, RunError> {
        let (code, logs) = match self.execute(cancel).await {
            Ok(done) => done,
            Err(e) => {
                self.discard().await;
                return Err(e);
            }
        };
        if let Err(e) = self.cleanup().await {
            tracing::warn!(id = %self.id.short(), error = %e, "container cleanup failed");
        }
        if code != 0 {
            return Err(RunError::ExitCode {
                id: self.id,
                image: self.image,
                code,
                logs,
            });
        }
        Ok(logs)
    }

    async fn execute(&mut self, cancel: &CancellationToken) -> Result<(i64, LogHandle), RunError> {
        if self.state == ContainerState::Created {
            self.start(cancel).await?;
        }
        let waited = self.wait(cancel).await?;

        let status = cancellable(cancel, self.engine.inspect_container(&self.id))
            .await
            .map_err(|e| self.fail(e, |id, image, source| RunError::Inspect { id, image, source }))?;
        let code = status.exit_code.unwrap_or(waited);
        if code != waited {
            tracing::debug!(id = %self.id.short(), waited, code, "inspect and wait disagree");
        }
        self.transition(ContainerState::Exited(code));

        let stream = cancellable(cancel, self.engine.container_logs(&self.id))
            .await
            .map_err(|e| self.fail(e, |id, image, source| RunError::Logs { id, image, source }))?;
        Ok((code, LogHandle::from_stream(self.id.short(), stream)))
    }

    /// Starts the container.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Start`] if the engine refuses, or
    /// [`RunError::Cancelled`].
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<(), RunError> {
        cancellable(cancel, self.engine.start_container(&self.id))
            .await
            .map_err(|e| self.fail(e, |id, image, source| RunError::Start { id, image, source }))?;
        self.transition(ContainerState::Running);
        Ok(())
    }

    /// Blocks until the container is no longer running and returns the
    /// exit code the engine reported for the wait.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Wait`] if the engine's wait fails, or
    /// [`RunError::Cancelled`] if `cancel` fires first.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> Result<i64, RunError> {
        let code = cancellable(cancel, self.engine.wait_container(&self.id))
            .await
            .map_err(|e| self.fail(e, |id, image, source| RunError::Wait { id, image, source }))?;
        self.transition(ContainerState::Exited(code));
        Ok(code)
    }

    /// Removes the container from the engine.
    ///
    /// Not cancellable: removal is what a cancelled run still needs.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Remove`] if the engine refuses.
    pub async fn cleanup(&mut self) -> Result<(), RunError> {
        self.remove(false).await
    }

    async fn discard(&mut self) {
        if self.state == ContainerState::Removed {
            return;
        }
        if let Err(e) = self.remove(true).await {
            tracing::warn!(id = %self.id.short(), error = %e, "forced removal failed");
        }
    }

    async fn remove(&mut self, force: bool) -> Result<(), RunError> {
        match self.engine.remove_container(&self.id, force).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!(id = %self.id.short(), "container already gone");
            }
            Err(source) => {
                return Err(RunError::Remove {
                    id: self.id.clone(),
                    image: self.image.clone(),
                    source,
                });
            }
        }
        self.transition(ContainerState::Removed);
        Ok(())
    }

    fn fail<F>(&self, error: EngineError, wrap: F) -> RunError
    where
        F: FnOnce(ContainerId, String, EngineError) -> RunError,
    {
        if error.is_cancelled() {
            tracing::info!(id = %self.id.short(), state = %self.state, "container run cancelled");
            return RunError::Cancelled {
                id: self.id.clone(),
                image: self.image.clone(),
            };
        }
        wrap(self.id.clone(), self.image.clone(), error)
    }

    fn transition(&mut self, next: ContainerState) {
        if self.state != next {
            tracing::info!(
                id = %self.id.short(),
                image = %self.image,
                from = %self.state,
                to = %next,
                "container state changed"
            );
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use dockhand_engine::memory::{MemoryEngine, Operation, ProgramRun};
    use dockhand_image::{ImageOptions, ProgressSink, Resolver};

    use super::*;

    async fn busybox(engine: &Arc<MemoryEngine>) -> Image {
        let _ = engine.insert_image("busybox", 0, &[]);
        engine.publish("busybox");
        Resolver::new(engine.clone())
            .with_progress(ProgressSink::Discard)
            .resolve("busybox", ImageOptions::new(), &CancellationToken::new())
            .await
            .expect("resolve")
    }

    #[tokio::test]
    async fn instantiate_sends_options_to_the_engine() {
        let engine = Arc::new(MemoryEngine::new());
        let image = busybox(&engine).await;

        let container = instantiate(
            &image,
            ContainerOptions::new()
                .command(["echo", "hi"])
                .env("MODE", "test")
                .working_dir("")
                .volume("/host/src", "/src"),
            &CancellationToken::new(),
        )
        .await
        .expect("instantiate");

        assert_eq!(container.state(), ContainerState::Created);
        let spec = &engine.created_specs()[0];
        assert_eq!(spec.image, "busybox");
        assert_eq!(spec.command, ["echo", "hi"]);
        assert_eq!(spec.env, ["MODE=test"]);
        assert!(spec.working_dir.is_none());
        assert_eq!(spec.mounts[0].source, "/host/src");
    }

    #[tokio::test]
    async fn invalid_options_never_reach_the_engine() {
        let engine = Arc::new(MemoryEngine::new());
        let image = busybox(&engine).await;

        let err = instantiate(
            &image,
            ContainerOptions::new().working_dir("relative"),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RunError::Options { .. }));
        assert_eq!(engine.calls(Operation::CreateContainer), 0);
    }

    #[tokio::test]
    async fn successful_run_returns_logs_and_removes_container() {
        let engine = Arc::new(MemoryEngine::new());
        let image = busybox(&engine).await;
        let cancel = CancellationToken::new();

        let container = instantiate(
            &image,
            ContainerOptions::new().command(["echo", "testing message"]),
            &cancel,
        )
        .await
        .expect("instantiate");
        let logs = container.run(&cancel).await.expect("run");

        let text = logs.combined().read_to_string().await.expect("read");
        assert!(text.contains("testing message"));
        assert!(engine.live_containers().is_empty());
    }

    #[tokio::test]
    async fn non_zero_exit_keeps_logs_and_still_cleans_up() {
        let engine = Arc::new(MemoryEngine::new());
        engine.register_program("fail", |_| ProgramRun::exit(3).stderr("boom\n"));
        let image = busybox(&engine).await;
        let cancel = CancellationToken::new();

        let container = instantiate(&image, ContainerOptions::new().command(["fail"]), &cancel)
            .await
            .expect("instantiate");
        let id = container.id().clone();
        let err = container.run(&cancel).await.unwrap_err();

        assert_eq!(err.exit_code(), Some(3));
        assert!(err.to_string().contains(id.as_str()));
        let logs = err.into_logs().expect("logs survive a failed run");
        assert_eq!(logs.stderr().read_to_string().await.expect("read"), "boom\n");
        assert!(engine.live_containers().is_empty());
    }

    #[tokio::test]
    async fn start_failure_is_reported_and_container_removed() {
        let engine = Arc::new(MemoryEngine::new());
        let image = busybox(&engine).await;
        let cancel = CancellationToken::new();

        let container = instantiate(&image, ContainerOptions::new().command(["nope"]), &cancel)
            .await
            .expect("instantiate");
        let err = container.run(&cancel).await.unwrap_err();

        assert!(matches!(err, RunError::Start { ref image, .. } if image == "busybox"));
        assert_eq!(engine.calls(Operation::WaitContainer), 0);
        assert!(engine.live_containers().is_empty());
    }

    #[tokio::test]
    async fn inspect_failure_skips_logs() {
        let engine = Arc::new(MemoryEngine::new());
        engine.fail(Operation::InspectContainer);
        let image = busybox(&engine).await;
        let cancel = CancellationToken::new();

        let container = instantiate(&image, ContainerOptions::new().command(["true"]), &cancel)
            .await
            .expect("instantiate");
        let err = container.run(&cancel).await.unwrap_err();

        assert!(matches!(err, RunError::Inspect { .. }));
        assert_eq!(engine.calls(Operation::ContainerLogs), 0);
    }

    #[tokio::test]
    async fn wait_failure_skips_inspect_and_logs_and_forces_removal() {
        let engine = Arc::new(MemoryEngine::new());
        engine.fail(Operation::WaitContainer);
        let image = busybox(&engine).await;
        let cancel = CancellationToken::new();

        let container = instantiate(&image, ContainerOptions::new().command(["sleep"]), &cancel)
            .await
            .expect("instantiate");
        let err = container.run(&cancel).await.unwrap_err();

        assert!(matches!(err, RunError::Wait { .. }));
        assert_eq!(engine.calls(Operation::InspectContainer), 0);
        assert_eq!(engine.calls(Operation::ContainerLogs), 0);
        // Still running, so only a forced removal succeeds.
        assert!(engine.live_containers().is_empty());
    }

    #[tokio::test]
    async fn logs_failure_is_reported_and_container_removed() {
        let engine = Arc::new(MemoryEngine::new());
        engine.fail(Operation::ContainerLogs);
        let image = busybox(&engine).await;
        let cancel = CancellationToken::new();

        let container = instantiate(&image, ContainerOptions::new().command(["echo", "hi"]), &cancel)
            .await
            .expect("instantiate");
        let err = container.run(&cancel).await.unwrap_err();

        assert!(matches!(err, RunError::Logs { ref image, .. } if image == "busybox"));
        assert!(err.logs().is_none());
        assert_eq!(engine.calls(Operation::RemoveContainer), 1);
        assert!(engine.live_containers().is_empty());
    }

    #[tokio::test]
    async fn cleanup_failure_does_not_fail_the_run() {
        let engine = Arc::new(MemoryEngine::new());
        engine.fail(Operation::RemoveContainer);
        let image = busybox(&engine).await;
        let cancel = CancellationToken::new();

        let container = instantiate(&image, ContainerOptions::new().command(["true"]), &cancel)
            .await
            .expect("instantiate");
        assert!(container.run(&cancel).await.is_ok());
    }

    #[tokio::test]
    async fn cancelled_wait_force_removes_the_container() {
        let engine = Arc::new(MemoryEngine::new());
        let image = busybox(&engine).await;
        let cancel = CancellationToken::new();

        let container = instantiate(&image, ContainerOptions::new().command(["sleep"]), &cancel)
            .await
            .expect("instantiate");
        let run = tokio::spawn({
            let cancel = cancel.clone();
            async move { container.run(&cancel).await }
        });
        tokio::task::yield_now().await;
        cancel.cancel();

        let err = run.await.expect("join").unwrap_err();
        assert!(err.is_cancelled());
        assert!(engine.live_containers().is_empty());
    }

    #[tokio::test]
    async fn step_by_step_lifecycle_tracks_state() {
        let engine = Arc::new(MemoryEngine::new());
        let image = busybox(&engine).await;
        let cancel = CancellationToken::new();

        let mut container = instantiate(&image, ContainerOptions::new().command(["false"]), &cancel)
            .await
            .expect("instantiate");
        container.start(&cancel).await.expect("start");
        assert_eq!(container.state(), ContainerState::Running);
        assert_eq!(container.wait(&cancel).await.expect("wait"), 1);
        assert_eq!(container.state(), ContainerState::Exited(1));
        container.cleanup().await.expect("cleanup");
        assert_eq!(container.state(), ContainerState::Removed);
    }
}
