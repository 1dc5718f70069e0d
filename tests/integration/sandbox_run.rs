//! End-to-end sandbox behavior against a live Docker daemon.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use vibekit::config::ConfigStore;
use vibekit::docker::{ContainerEngine, DockerClient};
use vibekit::registry::RegistryManager;
use vibekit::resolver::ImageResolver;
use vibekit::sandbox::{
    DockerBackend, EventKind, RunOptions, SandboxError, SandboxProvider,
};

use crate::common::{docker_available, TestHome};

/// Provider over a throwaway home whose claude agent resolves to a tiny
/// public image, so no agent image builds happen in tests.
async fn test_provider(home: &TestHome) -> SandboxProvider {
    home.write_config(r#"{"per_agent_overrides": {"claude": "alpine:3.20"}}"#);

    let client = Arc::new(DockerClient::new().await.unwrap());
    let config = ConfigStore::new(home.path());
    let engine: Arc<dyn ContainerEngine> = client.clone();
    engine.pull("alpine:3.20").await.unwrap();

    let registries = Arc::new(RegistryManager::new(engine.clone(), config.clone()));
    let resolver = Arc::new(ImageResolver::new(engine, registries, config));
    SandboxProvider::new(Arc::new(DockerBackend::new(client)), resolver)
}

#[tokio::test]
async fn streaming_run_delivers_output_and_events() {
    if !docker_available() {
        eprintln!("skipping: docker not available");
        return;
    }
    let home = TestHome::new();
    let provider = test_provider(&home).await;
    let sandbox = provider
        .create(BTreeMap::new(), Some("claude".parse().unwrap()), None)
        .await
        .unwrap();
    let mut events = sandbox.subscribe();

    let stdout_chunks = Arc::new(Mutex::new(String::new()));
    let stderr_chunks = Arc::new(Mutex::new(String::new()));
    let options = RunOptions {
        on_stdout: Some(Box::new({
            let chunks = stdout_chunks.clone();
            move |c: &str| chunks.lock().unwrap().push_str(c)
        })),
        on_stderr: Some(Box::new({
            let chunks = stderr_chunks.clone();
            move |c: &str| chunks.lock().unwrap().push_str(c)
        })),
        ..Default::default()
    };

    let result = sandbox
        .run("echo hello; echo err 1>&2", options)
        .await
        .unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, "hello\n");
    assert_eq!(result.stderr, "err\n");
    assert_eq!(stdout_chunks.lock().unwrap().as_str(), "hello\n");
    assert_eq!(stderr_chunks.lock().unwrap().as_str(), "err\n");

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind);
    }
    assert_eq!(kinds.first(), Some(&EventKind::Start));
    assert_eq!(kinds.last(), Some(&EventKind::End));
    assert_eq!(kinds.iter().filter(|k| **k == EventKind::Start).count(), 1);
    assert_eq!(kinds.iter().filter(|k| **k == EventKind::End).count(), 1);

    sandbox.kill().await;
}

#[tokio::test]
async fn buffered_workspace_persists_between_runs() {
    if !docker_available() {
        eprintln!("skipping: docker not available");
        return;
    }
    let home = TestHome::new();
    let provider = test_provider(&home).await;
    let sandbox = provider
        .create(BTreeMap::new(), Some("claude".parse().unwrap()), Some("/tmp".to_string()))
        .await
        .unwrap();

    sandbox
        .run("echo persisted > marker.txt", RunOptions::default())
        .await
        .unwrap();
    let result = sandbox
        .run("cat marker.txt", RunOptions::default())
        .await
        .unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout.trim(), "persisted");

    sandbox.kill().await;
}

#[tokio::test]
async fn timeout_kills_the_command_and_reports_sentinel() {
    if !docker_available() {
        eprintln!("skipping: docker not available");
        return;
    }
    let home = TestHome::new();
    let provider = test_provider(&home).await;
    let sandbox = provider
        .create(BTreeMap::new(), Some("claude".parse().unwrap()), None)
        .await
        .unwrap();
    let mut events = sandbox.subscribe();

    let err = sandbox
        .run(
            "sleep 5",
            RunOptions {
                timeout_ms: Some(500),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    match err {
        SandboxError::Timeout { partial, .. } => assert_eq!(partial.exit_code, -1),
        other => panic!("expected timeout, got {other:?}"),
    }

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind);
    }
    assert_eq!(kinds.last(), Some(&EventKind::End), "end even on timeout");

    sandbox.kill().await;
    sandbox.kill().await; // idempotent against a live daemon too
}
