//! Container settings applied at creation.

use std::path::Path;

use dockhand_common::error::{ConfigError, Validator};
use dockhand_engine::{ContainerSpec, MountSpec};

/// A host directory bound into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    /// Host path.
    pub source: String,
    /// Absolute path inside the container.
    pub target: String,
}

impl Volume {
    /// Binds `source` on the host to `target` in the container.
    #[must_use]
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// How a container is created from its image.
///
/// Unset fields keep the image defaults. Environment entries and volumes
/// are passed to the engine in the order they were added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerOptions {
    /// Command and arguments.
    pub command: Vec<String>,
    /// Shell used for shell-form commands.
    pub shell: Option<Vec<String>>,
    /// Working directory; an empty value is treated as unset.
    pub working_dir: Option<String>,
    /// `KEY=VALUE` entries.
    pub env: Vec<String>,
    /// Bind mounts.
    pub volumes: Vec<Volume>,
}

impl ContainerOptions {
    /// Options that keep every image default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the command and its arguments.
    #[must_use]
    pub fn command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the shell.
    #[must_use]
    pub fn shell<I, S>(mut self, shell: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shell = Some(shell.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push(format!("{key}={value}"));
        self
    }

    /// Adds a raw `KEY=VALUE` environment entry.
    #[must_use]
    pub fn env_entry(mut self, entry: impl Into<String>) -> Self {
        self.env.push(entry.into());
        self
    }

    /// Adds a bind mount.
    #[must_use]
    pub fn volume(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.volumes.push(Volume::new(source, target));
        self
    }

    /// Checks every setting.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] listing every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut v = Validator::new();
        for entry in &self.env {
            let key = entry.split_once('=').map_or("", |(k, _)| k);
            let _ = v.check(!key.is_empty(), || {
                format!("environment entry `{entry}` must be KEY=VALUE with a non-empty key")
            });
        }
        for volume in &self.volumes {
            let _ = v
                .check(!volume.source.is_empty(), || {
                    format!("volume for `{}` has an empty source", volume.target)
                })
                .check(volume.target.starts_with('/'), || {
                    format!("volume target `{}` must be an absolute path", volume.target)
                });
        }
        if let Some(dir) = self.working_dir.as_deref().filter(|d| !d.is_empty()) {
            let _ = v.check(dir.starts_with('/'), || {
                format!("working directory `{dir}` must be an absolute path")
            });
        }
        if let Some(shell) = &self.shell {
            let _ = v.check(!shell.is_empty(), || "shell must not be empty when set".into());
        }
        v.finish()
    }

    /// Translates the options into a creation request for `image`.
    pub(crate) fn into_spec(self, image: &str) -> ContainerSpec {
        ContainerSpec {
            image: image.to_string(),
            command: self.command,
            shell: self.shell.unwrap_or_default(),
            env: self.env,
            working_dir: self.working_dir.filter(|d| !d.is_empty()),
            mounts: self
                .volumes
                .into_iter()
                .map(|v| MountSpec {
                    source: v.source,
                    target: v.target,
                })
                .collect(),
        }
    }
}

impl From<&Path> for Volume {
    fn from(path: &Path) -> Self {
        let path = path.display().to_string();
        Self::new(path.clone(), path)
    }
}
