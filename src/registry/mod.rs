pub mod cloud;
pub mod forge;
pub mod hub;
pub mod manager;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use crate::agent::AgentKind;
use crate::docker::{ContainerEngine, DockerError, LoginStatus};
use crate::reference::ImageReference;

pub use manager::RegistryManager;

/// The registries vibekit can publish agent images to.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    #[default]
    Dockerhub,
    Github,
    Aws,
}

impl RegistryKind {
    pub const ALL: [RegistryKind; 3] = [RegistryKind::Dockerhub, RegistryKind::Github, RegistryKind::Aws];

    pub fn name(&self) -> &'static str {
        match self {
            RegistryKind::Dockerhub => "dockerhub",
            RegistryKind::Github => "github",
            RegistryKind::Aws => "aws",
        }
    }
}

impl Display for RegistryKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RegistryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dockerhub" | "hub" | "docker" => Ok(RegistryKind::Dockerhub),
            "github" | "ghcr" => Ok(RegistryKind::Github),
            "aws" | "ecr" => Ok(RegistryKind::Aws),
            other => Err(format!(
                "unknown registry '{}' (expected one of: dockerhub, github, aws)",
                other
            )),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("not logged in to {registry}: {hint}")]
    AuthRequired { registry: String, hint: String },

    #[error("no namespace known for {registry} -- pass a user or set registry_user in the config")]
    NoNamespace { registry: String },

    #[error(transparent)]
    Docker(#[from] DockerError),

    #[error("{operation} against {registry} failed: {reason}")]
    Api {
        operation: &'static str,
        registry: String,
        reason: String,
    },
}

/// Outcome of pushing one agent's image.
#[derive(Debug, Clone)]
pub struct AgentUpload {
    pub agent: AgentKind,
    pub success: bool,
    pub error: Option<String>,
    pub image: Option<ImageReference>,
}

/// Batch result of an upload; per-agent failures never abort the batch.
#[derive(Debug, Clone, Default)]
pub struct UploadReport {
    pub per_agent: Vec<AgentUpload>,
}

impl UploadReport {
    pub fn ok(&self) -> bool {
        self.per_agent.iter().all(|u| u.success)
    }
}

/// One container registry: login detection, image-name synthesis, and
/// upload orchestration.
///
/// `image_name_for` returns `None` when no usable namespace is known. In
/// particular, a credential store that hides the daemon username is NOT a
/// usable namespace -- callers must pass the user explicitly in that case.
#[async_trait]
pub trait RegistryProvider: Send + Sync {
    fn kind(&self) -> RegistryKind;
    fn registry_url(&self) -> String;

    async fn check_login(&self) -> Result<LoginStatus, RegistryError>;

    /// Idempotent login using credentials from the environment appropriate
    /// to this registry kind.
    async fn login(&self, user: Option<&str>) -> Result<(), RegistryError>;

    async fn image_name_for(
        &self,
        agent: AgentKind,
        user: Option<&str>,
    ) -> Result<Option<ImageReference>, RegistryError>;

    async fn upload_images(
        &self,
        user: &str,
        agents: &[AgentKind],
    ) -> Result<UploadReport, RegistryError>;

    async fn pull(&self, reference: &ImageReference) -> Result<(), RegistryError>;

    async fn image_exists_locally(&self, reference: &ImageReference) -> Result<bool, RegistryError>;
}

/// Tag and push one agent image, preceded by an optional per-repository
/// preparation step (ECR repository creation). Shared by all providers.
pub(crate) async fn upload_one(
    engine: &Arc<dyn ContainerEngine>,
    agent: AgentKind,
    remote: &ImageReference,
) -> AgentUpload {
    let local_tag = agent.local_tag();
    let remote_text = remote.to_string();

    let exists = match engine.image_exists_locally(&local_tag).await {
        Ok(exists) => exists,
        Err(e) => {
            return AgentUpload {
                agent,
                success: false,
                error: Some(e.to_string()),
                image: None,
            };
        }
    };
    if !exists {
        return AgentUpload {
            agent,
            success: false,
            error: Some(format!(
                "local image '{local_tag}' not found -- build it first with `vibekit setup`"
            )),
            image: None,
        };
    }

    let result = async {
        engine.tag(&local_tag, &remote_text).await?;
        engine.push(&remote_text).await
    }
    .await;

    match result {
        Ok(()) => {
            tracing::info!(agent = %agent, image = %remote_text, "image uploaded");
            AgentUpload {
                agent,
                success: true,
                error: None,
                image: Some(remote.clone()),
            }
        }
        Err(e) => AgentUpload {
            agent,
            success: false,
            error: Some(e.to_string()),
            image: Some(remote.clone()),
        },
    }
}

/// Run a host CLI and return trimmed stdout, mapping failures onto the
/// registry error taxonomy.
pub(crate) async fn run_cli(
    registry: &str,
    operation: &'static str,
    program: &str,
    args: &[&str],
) -> Result<String, RegistryError> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| RegistryError::Api {
            operation,
            registry: registry.to_string(),
            reason: format!("spawning {program}: {e}"),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RegistryError::Api {
            operation,
            registry: registry.to_string(),
            reason: stderr.trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_from_str() {
        for kind in RegistryKind::ALL {
            let parsed: RegistryKind = kind.name().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn kind_accepts_aliases() {
        assert_eq!("hub".parse::<RegistryKind>().unwrap(), RegistryKind::Dockerhub);
        assert_eq!("ghcr".parse::<RegistryKind>().unwrap(), RegistryKind::Github);
        assert_eq!("ecr".parse::<RegistryKind>().unwrap(), RegistryKind::Aws);
    }

    #[test]
    fn default_registry_is_the_hub() {
        assert_eq!(RegistryKind::default(), RegistryKind::Dockerhub);
    }
}
