use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::docker::exec::OutputChunk;
use crate::docker::{container, exec, DockerClient, DockerError};

/// Everything the daemon needs to know to start a sandbox container.
#[derive(Debug, Clone)]
pub struct WorkspaceSpec {
    pub sandbox_id: String,
    pub image: String,
    pub env: Vec<(String, String)>,
    pub work_dir: String,
    pub agent: Option<String>,
    pub branch: Option<String>,
}

impl WorkspaceSpec {
    fn labels(&self) -> std::collections::HashMap<String, String> {
        container::sandbox_labels(&self.sandbox_id, self.agent.as_deref(), self.branch.as_deref())
    }
}

/// Container operations a sandbox instance performs, behind a trait so the
/// run loop (serialization, events, timeouts) is testable without a
/// daemon.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Start the long-lived workspace container; returns its id.
    async fn start_workspace(&self, spec: &WorkspaceSpec) -> Result<String, DockerError>;

    /// Execute a command in the workspace container, forwarding output
    /// chunks. Returns the exit code.
    async fn exec(
        &self,
        container_id: &str,
        command: &str,
        work_dir: &str,
        tx: mpsc::Sender<OutputChunk>,
    ) -> Result<i64, DockerError>;

    /// Create (but do not start) a one-shot container for a streaming run.
    async fn create_streaming(
        &self,
        spec: &WorkspaceSpec,
        command: &str,
    ) -> Result<String, DockerError>;

    /// Start the one-shot container, stream its output, wait for exit, and
    /// clean it up.
    async fn run_streaming(
        &self,
        container_id: &str,
        tx: mpsc::Sender<OutputChunk>,
    ) -> Result<i64, DockerError>;

    /// Spawn a detached command; returns an opaque handle id.
    async fn exec_detached(
        &self,
        container_id: &str,
        command: &str,
        work_dir: &str,
    ) -> Result<String, DockerError>;

    /// Graceful terminate with a grace period, then force-kill.
    async fn stop(&self, container_id: &str, grace_secs: i32) -> Result<(), DockerError>;

    async fn remove(&self, container_id: &str) -> Result<(), DockerError>;

    /// Host port published for a container port, when there is one.
    async fn host_port(
        &self,
        container_id: &str,
        container_port: u16,
    ) -> Result<Option<u16>, DockerError>;
}

/// The real daemon-backed implementation.
pub struct DockerBackend {
    client: Arc<DockerClient>,
}

impl DockerBackend {
    pub fn new(client: Arc<DockerClient>) -> Self {
        DockerBackend { client }
    }
}

#[async_trait]
impl SandboxBackend for DockerBackend {
    async fn start_workspace(&self, spec: &WorkspaceSpec) -> Result<String, DockerError> {
        container::create_workspace_container(
            self.client.docker(),
            &spec.sandbox_id,
            &spec.image,
            &spec.env,
            &spec.work_dir,
            spec.labels(),
        )
        .await
    }

    async fn exec(
        &self,
        container_id: &str,
        command: &str,
        work_dir: &str,
        tx: mpsc::Sender<OutputChunk>,
    ) -> Result<i64, DockerError> {
        exec::exec_streaming(
            self.client.docker(),
            container_id,
            command,
            Some(work_dir),
            &[],
            tx,
        )
        .await
    }

    async fn create_streaming(
        &self,
        spec: &WorkspaceSpec,
        command: &str,
    ) -> Result<String, DockerError> {
        container::create_oneshot_container(
            self.client.docker(),
            &spec.sandbox_id,
            &spec.image,
            command,
            &spec.env,
            &spec.work_dir,
            spec.labels(),
        )
        .await
    }

    async fn run_streaming(
        &self,
        container_id: &str,
        tx: mpsc::Sender<OutputChunk>,
    ) -> Result<i64, DockerError> {
        exec::run_oneshot(self.client.docker(), container_id, tx).await
    }

    async fn exec_detached(
        &self,
        container_id: &str,
        command: &str,
        work_dir: &str,
    ) -> Result<String, DockerError> {
        exec::exec_detached(self.client.docker(), container_id, command, Some(work_dir)).await
    }

    async fn stop(&self, container_id: &str, grace_secs: i32) -> Result<(), DockerError> {
        container::stop_container(self.client.docker(), container_id, grace_secs).await
    }

    async fn remove(&self, container_id: &str) -> Result<(), DockerError> {
        container::remove_container(self.client.docker(), container_id, true).await
    }

    async fn host_port(
        &self,
        container_id: &str,
        container_port: u16,
    ) -> Result<Option<u16>, DockerError> {
        container::host_port(self.client.docker(), container_id, container_port).await
    }
}
