use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentKind;
use crate::docker::exec::OutputChunk;
use crate::docker::DockerError;
use crate::sandbox::backend::{SandboxBackend, WorkspaceSpec};
use crate::sandbox::command::{snippet, validate_command, CommandResult, RunOptions};
use crate::sandbox::events::{EventBus, EventKind, SandboxEvent};

/// Working directory commands run in unless the caller picks another.
pub const DEFAULT_WORK_DIR: &str = "/vibekit";

/// Grace period between the terminate signal and the force kill.
const KILL_GRACE_SECS: i32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("command rejected ({reason}): '{snippet}'")]
    InvalidInput {
        reason: &'static str,
        snippet: String,
    },

    #[error("sandbox '{id}' is already running a command")]
    Busy { id: String },

    #[error("sandbox '{id}' has been killed")]
    Killed { id: String },

    #[error("command timed out after {timeout_ms}ms: '{snippet}'")]
    Timeout {
        timeout_ms: u64,
        snippet: String,
        /// Accumulated output with the `-1` sentinel exit code.
        partial: CommandResult,
    },

    #[error("sandbox runtime failure: {reason}")]
    Execution { reason: String },

    #[error(transparent)]
    Docker(#[from] DockerError),
}

/// Opaque handle to the workspace filesystem state after the last
/// successful buffered command; moved between successive runs and dropped
/// on kill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceSnapshot {
    container_id: String,
    generation: u64,
}

impl WorkspaceSnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Point-in-time view of a sandbox for listings.
#[derive(Debug, Clone)]
pub struct SandboxRecord {
    pub sandbox_id: String,
    pub agent_kind: Option<AgentKind>,
    pub env_vars: BTreeMap<String, String>,
    pub work_dir: String,
    pub running: bool,
    pub image_tag: String,
    pub branch: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

struct SandboxState {
    running: bool,
    container_id: Option<String>,
    workspace: Option<WorkspaceSnapshot>,
    last_used_at: DateTime<Utc>,
}

enum RunTarget {
    /// Exec inside the persistent workspace container.
    Workspace { container_id: String },
    /// One-shot container created for a streaming run.
    OneShot { container_id: String },
}

/// One container lifecycle: serialized command execution, an event stream,
/// and idempotent teardown.
pub struct Sandbox {
    id: String,
    agent: Option<AgentKind>,
    image_tag: String,
    env: Vec<(String, String)>,
    work_dir: String,
    branch: Option<String>,
    created_at: DateTime<Utc>,
    backend: Arc<dyn SandboxBackend>,
    events: EventBus,
    run_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    state: Mutex<SandboxState>,
}

impl Sandbox {
    pub(crate) fn new(
        id: String,
        agent: Option<AgentKind>,
        image_tag: String,
        env: Vec<(String, String)>,
        work_dir: String,
        branch: Option<String>,
        backend: Arc<dyn SandboxBackend>,
    ) -> Arc<Self> {
        Arc::new(Sandbox {
            id,
            agent,
            image_tag,
            env,
            work_dir,
            branch,
            created_at: Utc::now(),
            backend,
            events: EventBus::new(),
            run_lock: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
            state: Mutex::new(SandboxState {
                running: true,
                container_id: None,
                workspace: None,
                last_used_at: Utc::now(),
            }),
        })
    }

    /// Start the workspace container without running anything, so the
    /// sandbox is visible to daemon-level listings immediately.
    pub async fn start(&self) -> Result<(), SandboxError> {
        self.ensure_alive()?;
        self.ensure_workspace().await?;
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn agent(&self) -> Option<AgentKind> {
        self.agent
    }

    pub fn image_tag(&self) -> &str {
        &self.image_tag
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().expect("sandbox state lock poisoned").running
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SandboxEvent> {
        self.events.subscribe()
    }

    pub fn record(&self) -> SandboxRecord {
        let state = self.state.lock().expect("sandbox state lock poisoned");
        SandboxRecord {
            sandbox_id: self.id.clone(),
            agent_kind: self.agent,
            env_vars: self.env.iter().cloned().collect(),
            work_dir: self.work_dir.clone(),
            running: state.running,
            image_tag: self.image_tag.clone(),
            branch: self.branch.clone(),
            created_at: self.created_at,
            last_used_at: state.last_used_at,
        }
    }

    /// Current workspace snapshot generation, when one exists.
    pub fn workspace_snapshot(&self) -> Option<WorkspaceSnapshot> {
        self.state
            .lock()
            .expect("sandbox state lock poisoned")
            .workspace
            .clone()
    }

    /// Run a command. Commands on one sandbox are strictly serialized: a
    /// second `run` while one is in flight fails with `Busy` instead of
    /// interleaving. Emits `start` before and `end` after every attempt
    /// that passes validation, on every exit path.
    pub async fn run(
        &self,
        command: &str,
        mut options: RunOptions,
    ) -> Result<CommandResult, SandboxError> {
        if let Err(pattern) = validate_command(command) {
            return Err(SandboxError::InvalidInput {
                reason: pattern,
                snippet: snippet(command),
            });
        }
        self.ensure_alive()?;

        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| SandboxError::Busy { id: self.id.clone() })?;
        // A kill can land between the first check and the lock.
        self.ensure_alive()?;

        tracing::debug!(sandbox = %self.id, command = %snippet(command), "running command");
        self.events.emit(EventKind::Start, command, None);

        let result = self.dispatch(command, &mut options).await;

        self.state
            .lock()
            .expect("sandbox state lock poisoned")
            .last_used_at = Utc::now();

        if let Err(e) = &result {
            self.events.emit(EventKind::Error, command, Some(e.to_string()));
        }
        self.events.emit(EventKind::End, command, None);
        result
    }

    async fn dispatch(
        &self,
        command: &str,
        options: &mut RunOptions,
    ) -> Result<CommandResult, SandboxError> {
        if options.background {
            return self.run_background(command).await;
        }
        if options.streaming() {
            let spec = self.spec();
            let container_id = self.backend.create_streaming(&spec, command).await?;
            self.supervise(command, options, RunTarget::OneShot { container_id })
                .await
        } else {
            let container_id = self.ensure_workspace().await?;
            let result = self
                .supervise(command, options, RunTarget::Workspace { container_id: container_id.clone() })
                .await;
            if matches!(&result, Ok(r) if r.success()) {
                self.save_snapshot(&container_id);
            }
            result
        }
    }

    /// Detached spawn: returns immediately with a synthetic success naming
    /// the exec handle.
    async fn run_background(&self, command: &str) -> Result<CommandResult, SandboxError> {
        let container_id = self.ensure_workspace().await?;
        let handle = self
            .backend
            .exec_detached(&container_id, command, &self.work_dir)
            .await?;
        self.save_snapshot(&container_id);
        tracing::debug!(sandbox = %self.id, handle = %handle, "background command started");
        Ok(CommandResult {
            exit_code: 0,
            stdout: format!("command running in background (handle {handle})\n"),
            stderr: String::new(),
        })
    }

    /// Drive one execution to completion: forward output as it arrives,
    /// enforce the timeout, and react to an external kill.
    async fn supervise(
        &self,
        command: &str,
        options: &mut RunOptions,
        target: RunTarget,
    ) -> Result<CommandResult, SandboxError> {
        let (tx, mut rx) = mpsc::channel::<OutputChunk>(64);
        let backend = self.backend.clone();
        let work_dir = self.work_dir.clone();
        let command_owned = command.to_string();

        let (container_id, oneshot) = match &target {
            RunTarget::Workspace { container_id } => (container_id.clone(), false),
            RunTarget::OneShot { container_id } => (container_id.clone(), true),
        };

        let task = {
            let container_id = container_id.clone();
            tokio::spawn(async move {
                if oneshot {
                    backend.run_streaming(&container_id, tx).await
                } else {
                    backend.exec(&container_id, &command_owned, &work_dir, tx).await
                }
            })
        };

        let timeout_ms = options.timeout_ms();
        let deadline = tokio::time::sleep(Duration::from_millis(timeout_ms));
        tokio::pin!(deadline);

        let mut result = CommandResult::default();
        loop {
            tokio::select! {
                chunk = rx.recv() => match chunk {
                    Some(chunk) => self.deliver(&chunk, options, &mut result, command),
                    None => break,
                },
                _ = &mut deadline => {
                    task.abort();
                    self.terminate_target(&container_id, oneshot).await;
                    result.exit_code = -1;
                    tracing::warn!(sandbox = %self.id, timeout_ms, "command timed out");
                    return Err(SandboxError::Timeout {
                        timeout_ms,
                        snippet: snippet(command),
                        partial: result,
                    });
                }
                _ = self.cancel.cancelled() => {
                    task.abort();
                    self.terminate_target(&container_id, oneshot).await;
                    return Err(SandboxError::Killed { id: self.id.clone() });
                }
            }
        }

        let exit_code = match task.await {
            Ok(Ok(code)) => code,
            Ok(Err(e)) => return Err(e.into()),
            Err(e) => {
                return Err(SandboxError::Execution {
                    reason: format!("execution task failed: {e}"),
                });
            }
        };
        result.exit_code = exit_code;
        Ok(result)
    }

    fn deliver(
        &self,
        chunk: &OutputChunk,
        options: &mut RunOptions,
        result: &mut CommandResult,
        command: &str,
    ) {
        if chunk.stderr {
            result.stderr.push_str(&chunk.data);
            if let Some(cb) = options.on_stderr.as_mut() {
                cb(&chunk.data);
            }
            self.events
                .emit(EventKind::Stderr, command, Some(chunk.data.clone()));
        } else {
            result.stdout.push_str(&chunk.data);
            if let Some(cb) = options.on_stdout.as_mut() {
                cb(&chunk.data);
            }
            self.events
                .emit(EventKind::Stdout, command, Some(chunk.data.clone()));
        }
    }

    /// Stop a timed-out or cancelled execution: SIGTERM, a short grace,
    /// then SIGKILL via the daemon's stop semantics.
    async fn terminate_target(&self, container_id: &str, oneshot: bool) {
        if let Err(e) = self.backend.stop(container_id, KILL_GRACE_SECS).await {
            tracing::warn!(sandbox = %self.id, "stopping container: {e}");
        }
        if oneshot {
            if let Err(e) = self.backend.remove(container_id).await {
                tracing::warn!(sandbox = %self.id, "removing container: {e}");
            }
        } else {
            // The workspace container is gone; the next run recreates it.
            let mut state = self.state.lock().expect("sandbox state lock poisoned");
            state.container_id = None;
            state.workspace = None;
        }
    }

    async fn ensure_workspace(&self) -> Result<String, SandboxError> {
        let existing = self
            .state
            .lock()
            .expect("sandbox state lock poisoned")
            .container_id
            .clone();
        if let Some(id) = existing {
            return Ok(id);
        }

        let id = self.backend.start_workspace(&self.spec()).await?;
        self.state
            .lock()
            .expect("sandbox state lock poisoned")
            .container_id = Some(id.clone());
        Ok(id)
    }

    fn save_snapshot(&self, container_id: &str) {
        let mut state = self.state.lock().expect("sandbox state lock poisoned");
        let generation = state
            .workspace
            .take()
            .map(|s| s.generation + 1)
            .unwrap_or(0);
        state.workspace = Some(WorkspaceSnapshot {
            container_id: container_id.to_string(),
            generation,
        });
    }

    fn spec(&self) -> WorkspaceSpec {
        WorkspaceSpec {
            sandbox_id: self.id.clone(),
            image: self.image_tag.clone(),
            env: self.env.clone(),
            work_dir: self.work_dir.clone(),
            agent: self.agent.map(|a| a.slug().to_string()),
            branch: self.branch.clone(),
        }
    }

    fn ensure_alive(&self) -> Result<(), SandboxError> {
        if self.state.lock().expect("sandbox state lock poisoned").running {
            Ok(())
        } else {
            Err(SandboxError::Killed { id: self.id.clone() })
        }
    }

    /// Tear the sandbox down. Idempotent: repeated kills are no-ops, and an
    /// in-flight `run` returns promptly with a `Killed` error.
    pub async fn kill(&self) {
        let container = {
            let mut state = self.state.lock().expect("sandbox state lock poisoned");
            if !state.running {
                return;
            }
            state.running = false;
            state.workspace = None;
            state.container_id.take()
        };

        self.cancel.cancel();

        if let Some(id) = container {
            if let Err(e) = self.backend.stop(&id, KILL_GRACE_SECS).await {
                tracing::warn!(sandbox = %self.id, "stopping workspace container: {e}");
            }
            if let Err(e) = self.backend.remove(&id).await {
                tracing::warn!(sandbox = %self.id, "removing workspace container: {e}");
            }
        }
        tracing::info!(sandbox = %self.id, "sandbox killed");
    }

    /// Interface-compatibility no-op: local containers are not suspended.
    pub async fn pause(&self) {
        tracing::debug!(sandbox = %self.id, "pause is a no-op for local sandboxes");
    }

    /// Address where a service bound to `port` inside the container is
    /// reachable from the host.
    pub async fn host(&self, port: u16) -> String {
        let container = self
            .state
            .lock()
            .expect("sandbox state lock poisoned")
            .container_id
            .clone();
        if let Some(id) = container {
            if let Ok(Some(host_port)) = self.backend.host_port(&id, port).await {
                return format!("localhost:{host_port}");
            }
        }
        format!("localhost:{port}")
    }
}
