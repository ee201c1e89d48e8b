//! Tests against a real Docker daemon.
//!
//! Ignored by default; run with `cargo test -p dockhand-sdk -- --ignored`
//! on a machine where `DOCKER_HOST` (or the default socket) is reachable
//! and `busybox:latest` can be pulled.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;

use dockhand_sdk::{
    BuildContext, CancellationToken, Client, CollectorConfig, ContainerOptions, ImageOptions,
    ProgressSink, RunError, sweep,
};

const TEST_IMAGE: &str = "dockhand-test/echo:latest";

async fn client() -> Client {
    Client::from_env()
        .await
        .expect("docker daemon")
        .with_progress(ProgressSink::Tracing)
}

async fn test_image(client: &Client, cancel: &CancellationToken) -> dockhand_sdk::Image {
    let context = BuildContext::from_dockerfile("FROM busybox:latest\n").expect("pack");
    client
        .image(TEST_IMAGE, ImageOptions::new().build(context), cancel)
        .await
        .expect("build")
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn echo_round_trip() {
    let client = client().await;
    let cancel = CancellationToken::new();
    let image = test_image(&client, &cancel).await;

    let logs = client
        .instantiate(
            &image,
            ContainerOptions::new().command(["echo", "testing message"]),
            &cancel,
        )
        .await
        .expect("instantiate")
        .run(&cancel)
        .await
        .expect("run");
    let text = logs.combined().read_to_string().await.unwrap();
    assert!(text.contains("testing message"));
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn non_zero_exit_and_separation() {
    let client = client().await;
    let cancel = CancellationToken::new();
    let image = test_image(&client, &cancel).await;

    let err = client
        .instantiate(
            &image,
            ContainerOptions::new().command(["sh", "-c", "echo out; echo err >&2; exit 7"]),
            &cancel,
        )
        .await
        .expect("instantiate")
        .run(&cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::ExitCode { code: 7, .. }));
    let (mut out, mut errs) = err.logs().expect("logs").separated();
    let (out, errs) = tokio::join!(out.read_to_string(), errs.read_to_string());
    assert_eq!(out.unwrap(), "out\n");
    assert_eq!(errs.unwrap(), "err\n");
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn cancelled_run_is_cleaned_up() {
    let client = client().await;
    let cancel = CancellationToken::new();
    let image = test_image(&client, &cancel).await;

    let container = client
        .instantiate(&image, ContainerOptions::new().command(["sleep", "300"]), &cancel)
        .await
        .expect("instantiate");
    let id = container.id().clone();
    let canceller = cancel.clone();
    let _ = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let err = container.run(&cancel).await.unwrap_err();
    assert!(err.is_cancelled());
    let gone = client.engine().inspect_container(&id).await.unwrap_err();
    assert!(gone.is_not_found());
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn sweep_with_unmatched_filter_removes_nothing() {
    let client = client().await;
    let config = CollectorConfig::new().filter("label", "dockhand-test=never-set");

    let report = sweep(client.engine().as_ref(), Duration::ZERO, &config.filter).await;
    assert!(report.is_clean());
    assert!(report.removed.is_empty());
}
