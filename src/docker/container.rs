use bollard::models::{ContainerCreateBody, ContainerSummary, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions, ListContainersOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::Docker;
use std::collections::HashMap;

use crate::docker::DockerError;

/// Label carrying the sandbox id on every container vibekit creates.
pub const SANDBOX_LABEL: &str = "vibekit.sandbox";
/// Label carrying the agent kind, when one was selected.
pub const AGENT_LABEL: &str = "vibekit.agent";
/// Label carrying the git branch the sandbox was created from.
pub const BRANCH_LABEL: &str = "vibekit.branch";

pub fn sandbox_labels(
    sandbox_id: &str,
    agent: Option<&str>,
    branch: Option<&str>,
) -> HashMap<String, String> {
    let mut labels = HashMap::from([(SANDBOX_LABEL.to_string(), sandbox_id.to_string())]);
    if let Some(agent) = agent {
        labels.insert(AGENT_LABEL.to_string(), agent.to_string());
    }
    if let Some(branch) = branch {
        labels.insert(BRANCH_LABEL.to_string(), branch.to_string());
    }
    labels
}

/// Container names accept a narrower charset than sandbox ids; anything
/// outside `[a-zA-Z0-9_.-]` becomes a dash.
pub fn container_name(sandbox_id: &str) -> String {
    sandbox_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn network_error(operation: &'static str, reference: &str, e: impl ToString) -> DockerError {
    DockerError::Network {
        operation,
        reference: reference.to_string(),
        reason: e.to_string(),
    }
}

/// Create the long-lived workspace container for a sandbox. The container
/// idles on `sleep infinity`; commands are delivered through exec.
pub async fn create_workspace_container(
    docker: &Docker,
    sandbox_id: &str,
    image: &str,
    env_vars: &[(String, String)],
    work_dir: &str,
    labels: HashMap<String, String>,
) -> Result<String, DockerError> {
    let env: Vec<String> = env_vars.iter().map(|(k, v)| format!("{k}={v}")).collect();

    let host_config = HostConfig {
        publish_all_ports: Some(true),
        ..Default::default()
    };

    let config = ContainerCreateBody {
        image: Some(image.to_string()),
        env: Some(env),
        cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
        entrypoint: Some(vec![]),
        working_dir: Some(work_dir.to_string()),
        labels: Some(labels),
        host_config: Some(host_config),
        ..Default::default()
    };

    let name = container_name(sandbox_id);
    let options = CreateContainerOptions {
        name: Some(name.clone()),
        ..Default::default()
    };

    // Remove a stale container with the same name (idempotent resume)
    let _ = remove_container(docker, &name, true).await;

    let response = docker
        .create_container(Some(options), config)
        .await
        .map_err(|e| match e {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => DockerError::NotFound {
                reference: image.to_string(),
                reason: message,
            },
            other => network_error("create", sandbox_id, other),
        })?;

    start_container(docker, &response.id).await?;
    tracing::debug!(sandbox = %sandbox_id, container = %response.id, "workspace container started");
    Ok(response.id)
}

/// Create a one-shot container for a streaming run. The caller attaches to
/// the container before starting it and removes it afterwards.
pub async fn create_oneshot_container(
    docker: &Docker,
    sandbox_id: &str,
    image: &str,
    command: &str,
    env_vars: &[(String, String)],
    work_dir: &str,
    labels: HashMap<String, String>,
) -> Result<String, DockerError> {
    let env: Vec<String> = env_vars.iter().map(|(k, v)| format!("{k}={v}")).collect();

    let config = ContainerCreateBody {
        image: Some(image.to_string()),
        env: Some(env),
        cmd: Some(vec![
            "sh".to_string(),
            "-lc".to_string(),
            command.to_string(),
        ]),
        entrypoint: Some(vec![]),
        working_dir: Some(work_dir.to_string()),
        labels: Some(labels),
        ..Default::default()
    };

    let response = docker
        .create_container(None::<CreateContainerOptions>, config)
        .await
        .map_err(|e| match e {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => DockerError::NotFound {
                reference: image.to_string(),
                reason: message,
            },
            other => network_error("create", sandbox_id, other),
        })?;

    Ok(response.id)
}

pub async fn start_container(docker: &Docker, container_id: &str) -> Result<(), DockerError> {
    docker
        .start_container(container_id, None::<StartContainerOptions>)
        .await
        .map_err(|e| network_error("start", container_id, e))
}

/// Stop with a grace period; the daemon delivers SIGTERM, then SIGKILL once
/// the period elapses. Already-stopped and missing containers are fine.
pub async fn stop_container(
    docker: &Docker,
    container_id: &str,
    grace_secs: i32,
) -> Result<(), DockerError> {
    let options = StopContainerOptions {
        t: Some(grace_secs),
        signal: None,
    };
    match docker.stop_container(container_id, Some(options)).await {
        Ok(()) => Ok(()),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 304 | 404,
            ..
        }) => Ok(()),
        Err(e) => Err(network_error("stop", container_id, e)),
    }
}

pub async fn remove_container(
    docker: &Docker,
    container_id: &str,
    force: bool,
) -> Result<(), DockerError> {
    let options = RemoveContainerOptions {
        force,
        ..Default::default()
    };
    match docker.remove_container(container_id, Some(options)).await {
        Ok(()) => Ok(()),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => Ok(()),
        Err(e) => Err(network_error("remove", container_id, e)),
    }
}

/// All containers carrying the vibekit sandbox label, running or not.
pub async fn list_sandbox_containers(docker: &Docker) -> Result<Vec<ContainerSummary>, DockerError> {
    let filters = HashMap::from([("label".to_string(), vec![SANDBOX_LABEL.to_string()])]);
    let options = ListContainersOptions {
        all: true,
        filters: Some(filters),
        ..Default::default()
    };
    docker
        .list_containers(Some(options))
        .await
        .map_err(|e| network_error("list", "sandboxes", e))
}

/// Host port mapped to `container_port`, when the daemon published one.
pub async fn host_port(
    docker: &Docker,
    container_id: &str,
    container_port: u16,
) -> Result<Option<u16>, DockerError> {
    let inspect = docker
        .inspect_container(container_id, None::<bollard::query_parameters::InspectContainerOptions>)
        .await
        .map_err(|e| network_error("inspect", container_id, e))?;

    let key = format!("{container_port}/tcp");
    let port = inspect
        .network_settings
        .and_then(|net| net.ports)
        .and_then(|ports| ports.get(&key).cloned().flatten())
        .and_then(|bindings| {
            bindings
                .iter()
                .find_map(|b| b.host_port.as_deref().and_then(|p| p.parse::<u16>().ok()))
        });

    Ok(port)
}
