//! # dockhand-gc
//!
//! Periodically removes images older than a maximum age.
//!
//! [`Collector::start`] launches the loop and returns at once; the loop
//! runs until its cancellation token fires. [`sweep`] performs a single
//! pass and can be called directly.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod collector;
pub mod config;
pub mod error;

pub use collector::{Collector, SweepReport, sweep};
pub use config::CollectorConfig;
pub use error::CollectError;
