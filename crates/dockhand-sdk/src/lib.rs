//! # dockhand-sdk
//!
//! Public SDK for using dockhand as a Rust library.
//!
//! [`Client`] ties the pieces together: it resolves images (build, pull or
//! reuse), creates containers from them and runs them to completion, and
//! starts background image collectors, all against one shared engine.
//!
//! # Example
//!
//! ```rust,no_run
//! use dockhand_sdk::{CancellationToken, Client, ContainerOptions, ImageOptions};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::from_env().await?;
//! let cancel = CancellationToken::new();
//! let image = client.image("busybox", ImageOptions::new(), &cancel).await?;
//! let container = client
//!     .instantiate(&image, ContainerOptions::new().command(["echo", "hi"]), &cancel)
//!     .await?;
//! let logs = container.run(&cancel).await?;
//! println!("{}", logs.stdout().read_to_string().await?);
//! # Ok(())
//! # }
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod client;

pub use client::Client;
pub use dockhand_common::config::EngineConfig;
pub use dockhand_common::types::{ContainerId, ContainerState, ImageId};
pub use dockhand_engine::{DockerEngine, Engine, EngineError, ImageFilter};
pub use dockhand_gc::{CollectError, Collector, CollectorConfig, SweepReport, sweep};
pub use dockhand_image::{BuildContext, Image, ImageOptions, ProgressSink, ResolveError};
pub use dockhand_runtime::{
    Container, ContainerOptions, LogError, LogHandle, LogReader, RunError, Volume,
};
pub use tokio_util::sync::CancellationToken;
