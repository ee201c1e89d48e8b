//! In-process engine for tests.
//!
//! `MemoryEngine` keeps images and containers in memory, runs containers
//! through scripted programs, and can be told to fail any operation. Its
//! pull responses and log streams go through the same decoders as real
//! daemon output.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dockhand_common::constants::{LABEL_FILTER, REFERENCE_FILTER};
use dockhand_common::types::{ContainerId, ImageId};
use futures::StreamExt;
use futures::stream;

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::frame::{decode_log_stream, encode_frame};
use crate::status::decode_pull_stream;
use crate::types::{
    BuildOutput, BuildRequest, BuildStream, ContainerSpec, ContainerStatus, ImageFilter,
    ImageRecord, LogChunk, LogStream, PullStream, split_reference,
};

/// Engine operations that can be counted or made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// [`Engine::list_images`].
    ListImages,
    /// [`Engine::build_image`].
    BuildImage,
    /// [`Engine::pull_image`].
    PullImage,
    /// [`Engine::remove_image`].
    RemoveImage,
    /// [`Engine::create_container`].
    CreateContainer,
    /// [`Engine::start_container`].
    StartContainer,
    /// [`Engine::wait_container`].
    WaitContainer,
    /// [`Engine::inspect_container`].
    InspectContainer,
    /// [`Engine::container_logs`].
    ContainerLogs,
    /// [`Engine::remove_container`].
    RemoveContainer,
}

/// Outcome of running a scripted program.
#[derive(Debug, Clone, Default)]
pub struct ProgramRun {
    /// Output chunks in emission order.
    pub output: Vec<LogChunk>,
    /// Exit code reported once the program terminates.
    pub exit_code: i64,
    /// Never terminates; waiting on the container blocks forever.
    pub hang: bool,
}

impl ProgramRun {
    /// A run exiting with `code` and no output.
    #[must_use]
    pub const fn exit(code: i64) -> Self {
        Self {
            output: Vec::new(),
            exit_code: code,
            hang: false,
        }
    }

    /// Appends a stdout chunk.
    #[must_use]
    pub fn stdout(mut self, text: &str) -> Self {
        self.output
            .push(LogChunk::Stdout(Bytes::copy_from_slice(text.as_bytes())));
        self
    }

    /// Appends a stderr chunk.
    #[must_use]
    pub fn stderr(mut self, text: &str) -> Self {
        self.output
            .push(LogChunk::Stderr(Bytes::copy_from_slice(text.as_bytes())));
        self
    }
}

/// A scripted program, selected by the first word of a container's command.
pub type Program = Arc<dyn Fn(&ContainerSpec) -> ProgramRun + Send + Sync>;

#[derive(Debug, Clone)]
struct StoredImage {
    id: ImageId,
    tags: Vec<String>,
    labels: HashMap<String, String>,
    created: i64,
}

impl StoredImage {
    fn record(&self) -> ImageRecord {
        ImageRecord {
            id: self.id.clone(),
            repo_tags: self.tags.clone(),
            labels: self.labels.clone(),
            created: self.created,
        }
    }
}

#[derive(Debug, Clone)]
struct StoredContainer {
    spec: ContainerSpec,
    run: Option<ProgramRun>,
}

#[derive(Default)]
struct State {
    images: Vec<StoredImage>,
    containers: HashMap<String, StoredContainer>,
    created_specs: Vec<ContainerSpec>,
    registry: HashSet<String>,
    programs: HashMap<String, Program>,
    failures: HashSet<Operation>,
    calls: HashMap<Operation, usize>,
    corrupt_pulls: bool,
    /// Removed images still reported by listings.
    stale: Option<Vec<StoredImage>>,
    next_id: u64,
}

impl State {
    fn enter(&mut self, op: Operation) -> Result<()> {
        *self.calls.entry(op).or_default() += 1;
        if self.failures.contains(&op) {
            return Err(EngineError::Daemon {
                message: format!("injected failure in {op:?}"),
            });
        }
        Ok(())
    }

    fn fresh_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:064x}", self.next_id)
    }

    fn find_image(&self, reference: &str) -> Option<usize> {
        let tagged = normalize(reference);
        self.images
            .iter()
            .position(|i| i.id.as_str() == reference || i.tags.contains(&tagged))
    }

    fn tag_image(&mut self, reference: &str, labels: HashMap<String, String>) -> ImageId {
        let tag = normalize(reference);
        for image in &mut self.images {
            image.tags.retain(|t| *t != tag);
        }
        let id = ImageId::new(format!("sha256:{}", self.fresh_id()));
        self.images.push(StoredImage {
            id: id.clone(),
            tags: vec![tag],
            labels,
            created: now(),
        });
        id
    }

    fn container(&mut self, id: &ContainerId) -> Result<&mut StoredContainer> {
        self.containers
            .get_mut(id.as_str())
            .ok_or_else(|| EngineError::NotFound {
                kind: "container",
                id: id.to_string(),
            })
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn normalize(reference: &str) -> String {
    let (name, tag) = split_reference(reference);
    if tag.is_empty() {
        name.to_string()
    } else {
        format!("{name}:{tag}")
    }
}

fn matches_filter(image: &StoredImage, filter: &ImageFilter) -> Result<bool> {
    for (key, values) in filter.iter() {
        let ok = match key {
            REFERENCE_FILTER => values.iter().any(|v| {
                let (name, tag) = split_reference(v);
                let explicit_tag = v.len() > name.len();
                image.tags.iter().any(|t| {
                    if explicit_tag {
                        *t == format!("{name}:{tag}")
                    } else {
                        split_reference(t).0 == name
                    }
                })
            }),
            LABEL_FILTER => values.iter().all(|v| match v.split_once('=') {
                Some((k, val)) => image.labels.get(k).is_some_and(|x| x == val),
                None => image.labels.contains_key(v.as_str()),
            }),
            "dangling" => values
                .iter()
                .all(|v| (v == "true") == image.tags.is_empty()),
            other => {
                return Err(EngineError::Daemon {
                    message: format!("invalid filter '{other}'"),
                });
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Deterministic in-memory [`Engine`].
///
/// Built-in programs: `echo` (prints its arguments), `true`, `false`
/// (exit 1) and `sleep` (never terminates). Unknown programs fail at start.
pub struct MemoryEngine {
    state: Mutex<State>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("MemoryEngine")
            .field("images", &state.images.len())
            .field("containers", &state.containers.len())
            .finish_non_exhaustive()
    }
}

impl MemoryEngine {
    /// Creates an engine with no images and the built-in programs.
    #[must_use]
    pub fn new() -> Self {
        let engine = Self {
            state: Mutex::new(State::default()),
        };
        engine.register_program("echo", |spec| {
            let words = spec.command.get(1..).unwrap_or_default();
            ProgramRun::exit(0).stdout(&format!("{}\n", words.join(" ")))
        });
        engine.register_program("true", |_| ProgramRun::exit(0));
        engine.register_program("false", |_| ProgramRun::exit(1));
        engine.register_program("sleep", |_| ProgramRun {
            hang: true,
            ..ProgramRun::default()
        });
        engine
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers (or replaces) a scripted program.
    pub fn register_program<F>(&self, name: &str, program: F)
    where
        F: Fn(&ContainerSpec) -> ProgramRun + Send + Sync + 'static,
    {
        let _ = self
            .state()
            .programs
            .insert(name.to_string(), Arc::new(program));
    }

    /// Makes `reference` available for pulling.
    pub fn publish(&self, reference: &str) {
        let _ = self.state().registry.insert(normalize(reference));
    }

    /// Stores a local image created `age_secs` ago and returns its id.
    pub fn insert_image(
        &self,
        reference: &str,
        age_secs: i64,
        labels: &[(&str, &str)],
    ) -> ImageId {
        let mut state = self.state();
        let labels = labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let id = state.tag_image(reference, labels);
        if let Some(image) = state.images.iter_mut().find(|i| i.id == id) {
            image.created = now() - age_secs;
        }
        id
    }

    /// Returns every stored image.
    #[must_use]
    pub fn images(&self) -> Vec<ImageRecord> {
        self.state().images.iter().map(StoredImage::record).collect()
    }

    /// Returns whether an image with this reference or id is stored.
    #[must_use]
    pub fn has_image(&self, reference: &str) -> bool {
        self.state().find_image(reference).is_some()
    }

    /// Ids of containers that have not been removed.
    #[must_use]
    pub fn live_containers(&self) -> Vec<ContainerId> {
        self.state()
            .containers
            .keys()
            .map(|k| ContainerId::new(k.clone()))
            .collect()
    }

    /// Every specification passed to `create_container`, in call order.
    #[must_use]
    pub fn created_specs(&self) -> Vec<ContainerSpec> {
        self.state().created_specs.clone()
    }

    /// Makes every subsequent call to `op` fail.
    pub fn fail(&self, op: Operation) {
        let _ = self.state().failures.insert(op);
    }

    /// Lets `op` succeed again.
    pub fn recover(&self, op: Operation) {
        let _ = self.state().failures.remove(&op);
    }

    /// Appends a malformed record to every subsequent pull response.
    pub fn corrupt_pulls(&self, corrupt: bool) {
        self.state().corrupt_pulls = corrupt;
    }

    /// Keeps listing images after their removal, as a listing taken
    /// just before another client removed them would.
    pub fn stale_listings(&self, stale: bool) {
        self.state().stale = stale.then(Vec::new);
    }

    /// Number of times `op` has been called.
    #[must_use]
    pub fn calls(&self, op: Operation) -> usize {
        self.state().calls.get(&op).copied().unwrap_or_default()
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    async fn list_images(&self, filter: &ImageFilter) -> Result<Vec<ImageRecord>> {
        let mut state = self.state();
        state.enter(Operation::ListImages)?;
        let mut out = Vec::new();
        let stale = state.stale.iter().flatten();
        for image in state.images.iter().chain(stale) {
            if matches_filter(image, filter)? {
                out.push(image.record());
            }
        }
        Ok(out)
    }

    fn build_image(&self, request: BuildRequest) -> BuildStream<'_> {
        let mut state = self.state();
        if let Err(e) = state.enter(Operation::BuildImage) {
            return stream::iter([Err(e)]).boxed();
        }
        let id = state.tag_image(&request.tag, HashMap::new());
        let lines = [
            format!("Step 1/1 : using {}\n", request.dockerfile),
            format!("Successfully built {}\n", id.as_str()),
            format!("Successfully tagged {}\n", normalize(&request.tag)),
        ];
        stream::iter(lines.map(|line| {
            Ok(BuildOutput {
                stream: Some(line),
                status: None,
            })
        }))
        .boxed()
    }

    fn pull_image(&self, reference: &str) -> PullStream<'_> {
        let mut state = self.state();
        if let Err(e) = state.enter(Operation::PullImage) {
            return stream::iter([Err(e)]).boxed();
        }
        let tagged = normalize(reference);
        if !state.registry.contains(&tagged) {
            return stream::iter([Err(EngineError::NotFound {
                kind: "image",
                id: tagged,
            })])
            .boxed();
        }
        if state.find_image(&tagged).is_none() {
            let _ = state.tag_image(&tagged, HashMap::new());
        }

        let mut raw = format!(
            "{{\"status\":\"Pulling from {tagged}\",\"id\":\"latest\"}}\n\
             {{\"status\":\"Downloading\",\"progressDetail\":{{\"current\":512,\"total\":1024}},\"id\":\"0001\"}}\n\
             {{\"status\":\"Status: Image is up to date for {tagged}\"}}\n"
        );
        if state.corrupt_pulls {
            raw.push_str("{\"status\": truncated\n");
        }
        decode_pull_stream(std::io::Cursor::new(raw.into_bytes()))
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        let mut state = self.state();
        state.enter(Operation::RemoveImage)?;
        let index = state.find_image(image).ok_or_else(|| EngineError::NotFound {
            kind: "image",
            id: image.to_string(),
        })?;
        let removed = state.images.remove(index);
        if let Some(stale) = state.stale.as_mut() {
            stale.push(removed);
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId> {
        let mut state = self.state();
        state.enter(Operation::CreateContainer)?;
        if state.find_image(&spec.image).is_none() {
            return Err(EngineError::NotFound {
                kind: "image",
                id: spec.image.clone(),
            });
        }
        let id = state.fresh_id();
        state.created_specs.push(spec.clone());
        let _ = state.containers.insert(
            id.clone(),
            StoredContainer {
                spec: spec.clone(),
                run: None,
            },
        );
        Ok(ContainerId::new(id))
    }

    async fn start_container(&self, id: &ContainerId) -> Result<()> {
        let mut state = self.state();
        state.enter(Operation::StartContainer)?;
        let spec = state.container(id)?.spec.clone();
        let program_name = spec.command.first().cloned().unwrap_or_default();
        let program = state
            .programs
            .get(&program_name)
            .cloned()
            .ok_or_else(|| EngineError::Daemon {
                message: format!("exec: \"{program_name}\": executable file not found in $PATH"),
            })?;
        state.container(id)?.run = Some(program(&spec));
        Ok(())
    }

    async fn wait_container(&self, id: &ContainerId) -> Result<i64> {
        let outcome = {
            let mut state = self.state();
            state.enter(Operation::WaitContainer)?;
            state.container(id)?.run.clone()
        };
        match outcome {
            Some(run) if run.hang => std::future::pending().await,
            Some(run) => Ok(run.exit_code),
            None => Ok(0),
        }
    }

    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerStatus> {
        let mut state = self.state();
        state.enter(Operation::InspectContainer)?;
        let status = match &state.container(id)?.run {
            Some(run) if run.hang => ContainerStatus {
                running: true,
                exit_code: None,
            },
            Some(run) => ContainerStatus {
                running: false,
                exit_code: Some(run.exit_code),
            },
            None => ContainerStatus::default(),
        };
        Ok(status)
    }

    async fn container_logs(&self, id: &ContainerId) -> Result<LogStream> {
        let mut state = self.state();
        state.enter(Operation::ContainerLogs)?;
        let mut raw = BytesMut::new();
        if let Some(run) = &state.container(id)?.run {
            for chunk in &run.output {
                raw.extend_from_slice(&encode_frame(chunk));
            }
        }
        Ok(decode_log_stream(std::io::Cursor::new(raw.freeze())))
    }

    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<()> {
        let mut state = self.state();
        state.enter(Operation::RemoveContainer)?;
        let running = state
            .container(id)?
            .run
            .as_ref()
            .is_some_and(|run| run.hang);
        if running && !force {
            return Err(EngineError::Daemon {
                message: format!("cannot remove running container {id}"),
            });
        }
        let _ = state.containers.remove(id.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reference_filter_matches_any_tag_without_explicit_tag() {
        let engine = MemoryEngine::new();
        let _ = engine.insert_image("app:v1", 0, &[]);
        let _ = engine.insert_image("app:v2", 0, &[]);
        let _ = engine.insert_image("other", 0, &[]);

        let all = engine.list_images(&ImageFilter::reference("app")).await.expect("list");
        assert_eq!(all.len(), 2);
        let one = engine.list_images(&ImageFilter::reference("app:v2")).await.expect("list");
        assert_eq!(one.len(), 1);
    }

    #[tokio::test]
    async fn label_filter_requires_every_label() {
        let engine = MemoryEngine::new();
        let _ = engine.insert_image("a", 0, &[("team", "ci"), ("tier", "build")]);
        let _ = engine.insert_image("b", 0, &[("team", "ci")]);

        let filter = ImageFilter::label("team=ci").with(LABEL_FILTER, "tier");
        let found = engine.list_images(&filter).await.expect("list");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].repo_tags, vec!["a:latest"]);
    }

    #[tokio::test]
    async fn retagging_leaves_previous_image_dangling() {
        let engine = MemoryEngine::new();
        let first = engine.insert_image("app", 0, &[]);
        let _ = engine.insert_image("app", 0, &[]);

        let dangling = engine
            .list_images(&ImageFilter::new().with("dangling", "true"))
            .await
            .expect("list");
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].id, first);
    }

    #[tokio::test]
    async fn injected_failure_is_counted_and_reported() {
        let engine = MemoryEngine::new();
        engine.fail(Operation::ListImages);
        assert!(engine.list_images(&ImageFilter::new()).await.is_err());
        engine.recover(Operation::ListImages);
        assert!(engine.list_images(&ImageFilter::new()).await.is_ok());
        assert_eq!(engine.calls(Operation::ListImages), 2);
    }

    #[tokio::test]
    async fn echo_output_round_trips_through_frames() {
        let engine = MemoryEngine::new();
        let _ = engine.insert_image("busybox", 0, &[]);
        let id = engine
            .create_container(&ContainerSpec {
                image: "busybox".into(),
                command: vec!["echo".into(), "hi".into(), "there".into()],
                ..ContainerSpec::default()
            })
            .await
            .expect("create");
        engine.start_container(&id).await.expect("start");
        assert_eq!(engine.wait_container(&id).await.expect("wait"), 0);

        let chunks: Vec<LogChunk> = engine
            .container_logs(&id)
            .await
            .expect("logs")
            .map(|c| c.expect("chunk"))
            .collect()
            .await;
        assert_eq!(chunks, vec![LogChunk::Stdout(Bytes::from_static(b"hi there\n"))]);
    }

    #[tokio::test]
    async fn unknown_program_fails_at_start() {
        let engine = MemoryEngine::new();
        let _ = engine.insert_image("busybox", 0, &[]);
        let id = engine
            .create_container(&ContainerSpec {
                image: "busybox".into(),
                command: vec!["does-not-exist".into()],
                ..ContainerSpec::default()
            })
            .await
            .expect("create");
        assert!(engine.start_container(&id).await.is_err());
    }

    #[tokio::test]
    async fn pulling_unpublished_image_is_not_found() {
        let engine = MemoryEngine::new();
        let results: Vec<_> = engine.pull_image("ghost").collect().await;
        assert!(results[0].as_ref().unwrap_err().is_not_found());
    }
}
