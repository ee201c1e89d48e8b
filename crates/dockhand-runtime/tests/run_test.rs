//! Run-sequence tests against the in-memory engine.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use dockhand_engine::memory::{MemoryEngine, Operation, ProgramRun};
use dockhand_image::{BuildContext, Image, ImageOptions, ProgressSink, Resolver};
use dockhand_runtime::{ContainerOptions, RunError, instantiate};
use tokio_util::sync::CancellationToken;

async fn built_image(engine: &Arc<MemoryEngine>) -> Image {
    let context = BuildContext::from_dockerfile("FROM busybox\n").expect("pack");
    Resolver::new(engine.clone())
        .with_progress(ProgressSink::Discard)
        .resolve(
            "dockhand/test:latest",
            ImageOptions::new().build(context),
            &CancellationToken::new(),
        )
        .await
        .expect("resolve")
}

#[tokio::test]
async fn echo_exits_zero_with_its_message_in_the_logs() {
    let engine = Arc::new(MemoryEngine::new());
    let image = built_image(&engine).await;
    let cancel = CancellationToken::new();

    let container = instantiate(
        &image,
        ContainerOptions::new().command(["echo", "testing message"]),
        &cancel,
    )
    .await
    .expect("instantiate");
    let logs = container.run(&cancel).await.expect("run should succeed");

    let text = logs.combined().read_to_string().await.expect("read");
    assert!(text.contains("testing message"));
}

#[tokio::test]
async fn separated_streams_never_cross() {
    let engine = Arc::new(MemoryEngine::new());
    engine.register_program("chatty", |_| {
        ProgramRun::exit(0)
            .stdout("to-stdout-1\n")
            .stderr("to-stderr\n")
            .stdout("to-stdout-2\n")
    });
    let image = built_image(&engine).await;
    let cancel = CancellationToken::new();

    let run = |options: ContainerOptions| {
        let image = image.clone();
        let cancel = cancel.clone();
        async move {
            instantiate(&image, options, &cancel)
                .await
                .expect("instantiate")
                .run(&cancel)
                .await
                .expect("run")
        }
    };

    let logs = run(ContainerOptions::new().command(["chatty"])).await;
    let (mut stdout, mut stderr) = logs.separated();
    let (out, err) = tokio::join!(stdout.read_to_string(), stderr.read_to_string());
    assert_eq!(out.unwrap(), "to-stdout-1\nto-stdout-2\n");
    assert_eq!(err.unwrap(), "to-stderr\n");

    let logs = run(ContainerOptions::new().command(["chatty"])).await;
    let combined = logs.combined().read_to_string().await.unwrap();
    assert_eq!(combined, "to-stdout-1\nto-stderr\nto-stdout-2\n");
}

#[tokio::test]
async fn failing_container_reports_code_and_keeps_logs() {
    let engine = Arc::new(MemoryEngine::new());
    engine.register_program("explode", |_| {
        ProgramRun::exit(42).stdout("partial work\n").stderr("fatal\n")
    });
    let image = built_image(&engine).await;
    let cancel = CancellationToken::new();

    let err = instantiate(&image, ContainerOptions::new().command(["explode"]), &cancel)
        .await
        .expect("instantiate")
        .run(&cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::ExitCode { code: 42, .. }));
    assert_eq!(err.image(), "dockhand/test:latest");
    let logs = err.logs().expect("logs");
    assert_eq!(logs.stdout().read_to_string().await.unwrap(), "partial work\n");
    assert_eq!(engine.calls(Operation::RemoveContainer), 1);
}

#[tokio::test]
async fn cancellation_before_exit_leaves_nothing_behind() {
    let engine = Arc::new(MemoryEngine::new());
    let image = built_image(&engine).await;
    let cancel = CancellationToken::new();

    let container = instantiate(&image, ContainerOptions::new().command(["sleep"]), &cancel)
        .await
        .expect("instantiate");
    let canceller = cancel.clone();
    let _ = tokio::spawn(async move {
        tokio::task::yield_now().await;
        canceller.cancel();
    });

    let err = container.run(&cancel).await.unwrap_err();
    assert!(matches!(err, RunError::Cancelled { .. }));
    assert!(engine.live_containers().is_empty());
}

#[tokio::test]
async fn concurrent_runs_do_not_share_output() {
    let engine = Arc::new(MemoryEngine::new());
    let image = built_image(&engine).await;
    let cancel = CancellationToken::new();

    let runs = (0..8).map(|n| {
        let image = image.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let message = format!("container-{n}");
            let logs = instantiate(
                &image,
                ContainerOptions::new().command(["echo".to_string(), message.clone()]),
                &cancel,
            )
            .await
            .expect("instantiate")
            .run(&cancel)
            .await
            .expect("run");
            (message, logs.stdout().read_to_string().await.expect("read"))
        })
    });

    for handle in futures::future::join_all(runs).await {
        let (message, output) = handle.expect("join");
        assert_eq!(output, format!("{message}\n"));
    }
    assert!(engine.live_containers().is_empty());
}
