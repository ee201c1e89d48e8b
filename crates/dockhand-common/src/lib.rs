//! # dockhand-common
//!
//! Shared types, configuration validation, engine connection settings and
//! constants used across the dockhand workspace.
//!
//! This crate is the leaf of the dependency graph: it depends on no other
//! internal crate and holds the primitives the engine, image, runtime and
//! collector crates agree on.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
