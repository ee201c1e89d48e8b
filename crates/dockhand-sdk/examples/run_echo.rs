//! Builds a tiny image, runs `echo` in it, and prints both output channels.
//!
//! Requires a reachable Docker daemon (`DOCKER_HOST` or the default socket).
//! Set `RUST_LOG=dockhand=debug` to see lifecycle events.

use anyhow::Context;
use dockhand_sdk::{BuildContext, CancellationToken, Client, ContainerOptions, ImageOptions};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let client = Client::from_env().await.context("connecting to the engine")?;
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    let _ = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let context = BuildContext::from_dockerfile("FROM busybox:latest\n")?;
    let image = client
        .image("dockhand/echo:latest", ImageOptions::new().build(context), &cancel)
        .await?;

    let container = client
        .instantiate(
            &image,
            ContainerOptions::new().command(["sh", "-c", "echo testing message; echo oops >&2"]),
            &cancel,
        )
        .await?;
    let logs = container.run(&cancel).await?;

    let (mut stdout, mut stderr) = logs.separated();
    let (out, err) = tokio::join!(stdout.read_to_string(), stderr.read_to_string());
    let (out, err) = (out?, err?);
    tracing::info!(stdout = %out.trim_end(), stderr = %err.trim_end(), "container finished");
    Ok(())
}
