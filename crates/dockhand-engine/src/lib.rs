//! # dockhand-engine
//!
//! The capability boundary between dockhand and a container engine daemon.
//!
//! - **Engine**: the [`Engine`] trait consumed by the resolver, runner and
//!   collector crates.
//! - **Docker**: [`DockerEngine`], the `bollard`-backed implementation.
//! - **Frames**: codec for the engine's multiplexed stdout/stderr log format.
//! - **Status**: incremental decoding of newline-delimited pull status.
//! - **Memory**: an in-process engine for tests (feature `test-util`).

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cancel;
pub mod docker;
pub mod engine;
pub mod error;
pub mod frame;
#[cfg(feature = "test-util")]
pub mod memory;
pub mod status;
pub mod types;

pub use cancel::cancellable;
pub use docker::DockerEngine;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use types::{
    BuildOutput, BuildRequest, BuildStream, ContainerSpec, ContainerStatus, ImageFilter,
    ImageRecord, LogChunk, LogStream, MountSpec, ProgressDetail, PullStatus, PullStream,
};
