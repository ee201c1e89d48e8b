//! Engine connection settings.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_ENGINE_TIMEOUT_SECS, ENGINE_HOST_ENV};
use crate::error::{ConfigError, LoadError, Validator};

/// How to reach the container engine daemon.
///
/// Connection setup happens once, before any image or container
/// operation; everything downstream shares the resulting client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Daemon address (`unix:///var/run/docker.sock`, `tcp://host:2375`).
    ///
    /// `None` selects the platform's local default.
    pub host: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Whether to negotiate the API version with the daemon on connect.
    pub negotiate_version: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: None,
            timeout_secs: DEFAULT_ENGINE_TIMEOUT_SECS,
            negotiate_version: true,
        }
    }
}

impl EngineConfig {
    /// Builds a configuration from the process environment.
    ///
    /// Reads `DOCKER_HOST`; an empty value is treated as unset.
    #[must_use]
    pub fn from_env() -> Self {
        let host = std::env::var(ENGINE_HOST_ENV)
            .ok()
            .filter(|h| !h.trim().is_empty());
        Self {
            host,
            ..Self::default()
        }
    }

    /// Loads a configuration from a JSON file.
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_json_file(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field at once.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] listing all invalid fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut v = Validator::new();
        let _ = v.check(self.timeout_secs > 0, || {
            "engine timeout must be greater than zero".into()
        });
        if let Some(host) = &self.host {
            let _ = v.check(
                ["unix://", "npipe://", "tcp://", "http://"]
                    .iter()
                    .any(|scheme| host.starts_with(scheme)),
                || format!("unsupported engine host scheme: {host}"),
            );
        }
        v.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.host.is_none());
        assert!(config.negotiate_version);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_reports_all_problems() {
        let config = EngineConfig {
            host: Some("ftp://nope".into()),
            timeout_secs: 0,
            negotiate_version: false,
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.problems.len(), 2);
    }

    #[test]
    fn json_file_fills_missing_fields_with_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "host": "tcp://127.0.0.1:2375" }"#).expect("write");

        let config = EngineConfig::from_json_file(&path).expect("load");
        assert_eq!(config.host.as_deref(), Some("tcp://127.0.0.1:2375"));
        assert_eq!(config.timeout_secs, DEFAULT_ENGINE_TIMEOUT_SECS);
    }

    #[test]
    fn json_file_with_invalid_host_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "host": "gopher://x" }"#).expect("write");

        assert!(matches!(
            EngineConfig::from_json_file(&path),
            Err(LoadError::Invalid(_))
        ));
    }

    #[test]
    fn missing_json_file_is_io_error() {
        let err = EngineConfig::from_json_file(Path::new("/nonexistent/engine.json")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }
}
