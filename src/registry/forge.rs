use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;

use crate::agent::AgentKind;
use crate::docker::{ContainerEngine, LoginStatus};
use crate::reference::ImageReference;
use crate::registry::{
    run_cli, upload_one, RegistryError, RegistryKind, RegistryProvider, UploadReport,
};

pub const GHCR_HOST: &str = "ghcr.io";

/// GitHub container registry. Login requires a personal access token in
/// the environment (`GITHUB_TOKEN` or `GH_TOKEN`); namespaces are the
/// lowercased GitHub username.
pub struct GithubRegistry {
    engine: Arc<dyn ContainerEngine>,
}

impl GithubRegistry {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        GithubRegistry { engine }
    }

    fn env_token() -> Option<String> {
        std::env::var("GITHUB_TOKEN")
            .or_else(|_| std::env::var("GH_TOKEN"))
            .ok()
            .filter(|t| !t.is_empty())
    }

    /// GitHub username: explicit arg, then `GITHUB_USER`, then the `gh`
    /// CLI when it is installed and authenticated.
    async fn discover_user(&self, user: Option<&str>) -> Option<String> {
        if let Some(user) = user {
            return Some(user.to_string());
        }
        if let Ok(user) = std::env::var("GITHUB_USER") {
            if !user.is_empty() {
                return Some(user);
            }
        }
        match run_cli(GHCR_HOST, "whoami", "gh", &["api", "user", "--jq", ".login"]).await {
            Ok(login) if !login.is_empty() => Some(login),
            _ => None,
        }
    }
}

#[async_trait]
impl RegistryProvider for GithubRegistry {
    fn kind(&self) -> RegistryKind {
        RegistryKind::Github
    }

    fn registry_url(&self) -> String {
        GHCR_HOST.to_string()
    }

    async fn check_login(&self) -> Result<LoginStatus, RegistryError> {
        if Self::env_token().is_none() {
            return Ok(LoginStatus::logged_out());
        }
        Ok(LoginStatus {
            logged_in: true,
            user: self.discover_user(None).await,
            registry: Some(GHCR_HOST.to_string()),
        })
    }

    /// `docker login ghcr.io` with the env token piped on stdin. Repeating
    /// the login is harmless, so the operation is idempotent.
    async fn login(&self, user: Option<&str>) -> Result<(), RegistryError> {
        let Some(token) = Self::env_token() else {
            return Err(RegistryError::AuthRequired {
                registry: GHCR_HOST.to_string(),
                hint: "set GITHUB_TOKEN (a PAT with write:packages) and retry".to_string(),
            });
        };
        let Some(user) = self.discover_user(user).await else {
            return Err(RegistryError::NoNamespace {
                registry: GHCR_HOST.to_string(),
            });
        };

        let mut child = tokio::process::Command::new("docker")
            .args(["login", GHCR_HOST, "-u", &user, "--password-stdin"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RegistryError::Api {
                operation: "login",
                registry: GHCR_HOST.to_string(),
                reason: format!("spawning docker login: {e}"),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            let _ = stdin.write_all(token.as_bytes()).await;
        }

        let output = child.wait_with_output().await.map_err(|e| RegistryError::Api {
            operation: "login",
            registry: GHCR_HOST.to_string(),
            reason: e.to_string(),
        })?;
        if !output.status.success() {
            return Err(RegistryError::AuthRequired {
                registry: GHCR_HOST.to_string(),
                hint: format!(
                    "docker login failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        tracing::info!(user = %user, "logged in to ghcr.io");
        Ok(())
    }

    async fn image_name_for(
        &self,
        agent: AgentKind,
        user: Option<&str>,
    ) -> Result<Option<ImageReference>, RegistryError> {
        let Some(user) = self.discover_user(user).await else {
            return Ok(None);
        };
        Ok(Some(ImageReference::with_namespace(
            Some(GHCR_HOST),
            &user.to_lowercase(),
            &agent.repository(),
            "latest",
        )))
    }

    async fn upload_images(
        &self,
        user: &str,
        agents: &[AgentKind],
    ) -> Result<UploadReport, RegistryError> {
        let namespace = user.to_lowercase();
        let mut report = UploadReport::default();
        for &agent in agents {
            let remote = ImageReference::with_namespace(
                Some(GHCR_HOST),
                &namespace,
                &agent.repository(),
                "latest",
            );
            report.per_agent.push(upload_one(&self.engine, agent, &remote).await);
        }
        Ok(report)
    }

    async fn pull(&self, reference: &ImageReference) -> Result<(), RegistryError> {
        Ok(self.engine.pull(&reference.to_string()).await?)
    }

    async fn image_exists_locally(
        &self,
        reference: &ImageReference,
    ) -> Result<bool, RegistryError> {
        Ok(self
            .engine
            .image_exists_locally(&reference.to_string())
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::test_support::FakeEngine;

    #[tokio::test]
    async fn image_name_includes_host_and_lowercases_user() {
        let registry = GithubRegistry::new(Arc::new(FakeEngine::default()));
        let reference = registry
            .image_name_for(AgentKind::Gemini, Some("Alice-Dev"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            reference.to_string(),
            "ghcr.io/alice-dev/vibekit-gemini:latest"
        );
        assert_eq!(reference.registry_host.as_deref(), Some(GHCR_HOST));
        assert_eq!(reference.repository, "vibekit-gemini");
    }

    #[tokio::test]
    async fn upload_pushes_to_ghcr_namespace() {
        let engine = Arc::new(FakeEngine::default().with_local_image("vibekit-codex:latest"));
        let registry = GithubRegistry::new(engine.clone());
        let report = registry
            .upload_images("Bob", &[AgentKind::Codex])
            .await
            .unwrap();
        assert!(report.ok());
        assert_eq!(
            report.per_agent[0].image.as_ref().unwrap().to_string(),
            "ghcr.io/bob/vibekit-codex:latest"
        );
    }
}
