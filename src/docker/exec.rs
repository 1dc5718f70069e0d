use bollard::container::LogOutput;
use bollard::exec::{StartExecOptions, StartExecResults};
use bollard::models::ExecConfig;
use bollard::query_parameters::{AttachContainerOptions, WaitContainerOptions};
use bollard::Docker;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::docker::{container, DockerError};

/// One chunk of process output, delivered in arrival order.
#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub stderr: bool,
    pub data: String,
}

impl OutputChunk {
    fn from_log(output: &LogOutput) -> Option<Self> {
        match output {
            LogOutput::StdOut { message } => Some(OutputChunk {
                stderr: false,
                data: String::from_utf8_lossy(message).to_string(),
            }),
            LogOutput::StdErr { message } => Some(OutputChunk {
                stderr: true,
                data: String::from_utf8_lossy(message).to_string(),
            }),
            _ => None,
        }
    }
}

fn network_error(operation: &'static str, reference: &str, e: impl ToString) -> DockerError {
    DockerError::Network {
        operation,
        reference: reference.to_string(),
        reason: e.to_string(),
    }
}

/// Run `sh -lc <command>` inside a running container, forwarding output
/// chunks through `tx` as they arrive. Returns the process exit code.
pub async fn exec_streaming(
    docker: &Docker,
    container_id: &str,
    command: &str,
    work_dir: Option<&str>,
    env_vars: &[(String, String)],
    tx: mpsc::Sender<OutputChunk>,
) -> Result<i64, DockerError> {
    let env: Vec<String> = env_vars.iter().map(|(k, v)| format!("{k}={v}")).collect();

    let config = ExecConfig {
        cmd: Some(vec![
            "sh".to_string(),
            "-lc".to_string(),
            command.to_string(),
        ]),
        env: (!env.is_empty()).then_some(env),
        working_dir: work_dir.map(str::to_string),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        ..Default::default()
    };

    let exec = docker
        .create_exec(container_id, config)
        .await
        .map_err(|e| network_error("exec", container_id, e))?;

    let start_options = StartExecOptions {
        detach: false,
        ..Default::default()
    };
    if let StartExecResults::Attached {
        output: mut stream, ..
    } = docker
        .start_exec(&exec.id, Some(start_options))
        .await
        .map_err(|e| network_error("exec", container_id, e))?
    {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(output) => {
                    if let Some(chunk) = OutputChunk::from_log(&output) {
                        if tx.send(chunk).await.is_err() {
                            break; // receiver gone, the run was abandoned
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(container = %container_id, "exec stream error: {e}");
                    break;
                }
            }
        }
    }

    let inspect = docker
        .inspect_exec(&exec.id)
        .await
        .map_err(|e| network_error("exec", container_id, e))?;
    Ok(inspect.exit_code.unwrap_or(-1))
}

/// Spawn a detached exec and return its handle id without waiting.
pub async fn exec_detached(
    docker: &Docker,
    container_id: &str,
    command: &str,
    work_dir: Option<&str>,
) -> Result<String, DockerError> {
    let config = ExecConfig {
        cmd: Some(vec![
            "sh".to_string(),
            "-lc".to_string(),
            command.to_string(),
        ]),
        working_dir: work_dir.map(str::to_string),
        ..Default::default()
    };

    let exec = docker
        .create_exec(container_id, config)
        .await
        .map_err(|e| network_error("exec", container_id, e))?;

    let options = StartExecOptions {
        detach: true,
        ..Default::default()
    };
    docker
        .start_exec(&exec.id, Some(options))
        .await
        .map_err(|e| network_error("exec", container_id, e))?;

    Ok(exec.id)
}

/// Run a one-shot container to completion, forwarding attached output.
/// The container is removed afterwards regardless of outcome.
pub async fn run_oneshot(
    docker: &Docker,
    container_id: &str,
    tx: mpsc::Sender<OutputChunk>,
) -> Result<i64, DockerError> {
    let attach_options = AttachContainerOptions {
        stdout: true,
        stderr: true,
        stream: true,
        ..Default::default()
    };
    let attached = docker
        .attach_container(container_id, Some(attach_options))
        .await
        .map_err(|e| network_error("attach", container_id, e))?;

    container::start_container(docker, container_id).await?;

    let mut output = attached.output;
    while let Some(msg) = output.next().await {
        match msg {
            Ok(log) => {
                if let Some(chunk) = OutputChunk::from_log(&log) {
                    if tx.send(chunk).await.is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(container = %container_id, "attach stream error: {e}");
                break;
            }
        }
    }

    let mut wait = docker.wait_container(container_id, None::<WaitContainerOptions>);
    let exit_code = match wait.next().await {
        Some(Ok(response)) => response.status_code,
        Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => code,
        Some(Err(e)) => {
            tracing::warn!(container = %container_id, "wait error: {e}");
            -1
        }
        None => -1,
    };

    container::remove_container(docker, container_id, true).await?;
    Ok(exit_code)
}
