//! # dockhand-image
//!
//! Makes an image available on the engine before containers are created
//! from it.
//!
//! - **Context**: build context archives and their `Dockerfile` check.
//! - **Options**: per-call resolution settings (build context, forced rebuild).
//! - **Resolver**: the build / pull / reuse decision and its execution.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod context;
pub mod error;
pub mod options;
pub mod resolver;

pub use context::BuildContext;
pub use error::ResolveError;
pub use options::ImageOptions;
pub use resolver::{Image, ProgressSink, Resolver};
