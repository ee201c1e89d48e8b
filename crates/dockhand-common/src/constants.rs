//! Workspace-wide constants and defaults.

/// File name the engine looks for at the root of a build context.
pub const DOCKERFILE_NAME: &str = "Dockerfile";

/// Image listing filter key matching on image references.
pub const REFERENCE_FILTER: &str = "reference";

/// Image listing filter key matching on labels.
pub const LABEL_FILTER: &str = "label";

/// Buffer size, in bytes, of each demultiplexed log pipe.
pub const LOG_PIPE_CAPACITY: usize = 64 * 1024;

/// Default per-request timeout, in seconds, for the engine connection.
pub const DEFAULT_ENGINE_TIMEOUT_SECS: u64 = 120;

/// Environment variable holding the engine address.
pub const ENGINE_HOST_ENV: &str = "DOCKER_HOST";
