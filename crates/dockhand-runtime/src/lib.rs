//! # dockhand-runtime
//!
//! Runs one-shot containers from resolved images.
//!
//! - **Options**: validated container settings (command, shell, working
//!   directory, environment, volumes).
//! - **Container**: `instantiate` plus the start / wait / inspect / logs /
//!   remove sequence of [`Container::run`].
//! - **Logs**: [`LogHandle`], which splits the engine's combined log stream
//!   into stdout, stderr, combined or separated readers.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod container;
pub mod error;
pub mod logs;
pub mod options;

pub use container::{Container, instantiate};
pub use error::{LogError, RunError};
pub use logs::{LogHandle, LogReader};
pub use options::{ContainerOptions, Volume};
