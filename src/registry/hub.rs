use async_trait::async_trait;
use std::sync::Arc;

use crate::agent::AgentKind;
use crate::docker::{ContainerEngine, LoginStatus};
use crate::reference::ImageReference;
use crate::registry::{upload_one, RegistryError, RegistryKind, RegistryProvider, UploadReport};

/// Docker Hub: the default registry. References omit the host; the
/// namespace is the logged-in (or explicitly supplied) username.
pub struct DockerhubRegistry {
    engine: Arc<dyn ContainerEngine>,
}

impl DockerhubRegistry {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        DockerhubRegistry { engine }
    }

    /// Namespace for name synthesis: the explicit user wins; otherwise the
    /// daemon login username. A credential-store login with a hidden
    /// username yields None -- the caller must supply one.
    async fn namespace(&self, user: Option<&str>) -> Result<Option<String>, RegistryError> {
        if let Some(user) = user {
            return Ok(Some(user.to_string()));
        }
        let status = self.engine.check_login().await?;
        Ok(status.user)
    }
}

#[async_trait]
impl RegistryProvider for DockerhubRegistry {
    fn kind(&self) -> RegistryKind {
        RegistryKind::Dockerhub
    }

    fn registry_url(&self) -> String {
        "docker.io".to_string()
    }

    async fn check_login(&self) -> Result<LoginStatus, RegistryError> {
        Ok(self.engine.check_login().await?)
    }

    /// The hub has no out-of-band credential source; login succeeds when
    /// the daemon is already authenticated and otherwise points the user
    /// at `docker login`.
    async fn login(&self, _user: Option<&str>) -> Result<(), RegistryError> {
        let status = self.engine.check_login().await?;
        if status.logged_in {
            return Ok(());
        }
        Err(RegistryError::AuthRequired {
            registry: self.registry_url(),
            hint: "run `docker login` and retry".to_string(),
        })
    }

    async fn image_name_for(
        &self,
        agent: AgentKind,
        user: Option<&str>,
    ) -> Result<Option<ImageReference>, RegistryError> {
        let Some(namespace) = self.namespace(user).await? else {
            return Ok(None);
        };
        Ok(Some(ImageReference::with_namespace(
            None,
            &namespace,
            &agent.repository(),
            "latest",
        )))
    }

    async fn upload_images(
        &self,
        user: &str,
        agents: &[AgentKind],
    ) -> Result<UploadReport, RegistryError> {
        let mut report = UploadReport::default();
        for &agent in agents {
            let remote =
                ImageReference::with_namespace(None, user, &agent.repository(), "latest");
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
