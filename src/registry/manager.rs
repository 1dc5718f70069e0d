use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::agent::AgentKind;
use crate::config::ConfigStore;
use crate::docker::{ContainerEngine, LoginStatus};
use crate::reference::ImageReference;
use crate::registry::{
    cloud::AwsRegistry, forge::GithubRegistry, hub::DockerhubRegistry, RegistryError, RegistryKind,
    RegistryProvider, UploadReport,
};

/// Routes registry operations to the provider selected as default (or by
/// explicit kind). The registry user for name synthesis comes from the
/// call site, falling back to the persisted `registry_user`.
pub struct RegistryManager {
    providers: HashMap<RegistryKind, Arc<dyn RegistryProvider>>,
    default: RwLock<RegistryKind>,
    config: ConfigStore,
}

impl RegistryManager {
    /// Manager with all three built-in providers sharing one engine.
    pub fn new(engine: Arc<dyn ContainerEngine>, config: ConfigStore) -> Self {
        let default = config.load().map(|c| c.registry_kind).unwrap_or_default();
        let providers: HashMap<RegistryKind, Arc<dyn RegistryProvider>> = HashMap::from([
            (
                RegistryKind::Dockerhub,
                Arc::new(DockerhubRegistry::new(engine.clone())) as Arc<dyn RegistryProvider>,
            ),
            (
                RegistryKind::Github,
                Arc::new(GithubRegistry::new(engine.clone())) as Arc<dyn RegistryProvider>,
            ),
            (
                RegistryKind::Aws,
                Arc::new(AwsRegistry::new(engine)) as Arc<dyn RegistryProvider>,
            ),
        ]);
        RegistryManager {
            providers,
            default: RwLock::new(default),
            config,
        }
    }

    /// Manager over an explicit provider set; used by tests.
    pub fn with_providers(
        providers: HashMap<RegistryKind, Arc<dyn RegistryProvider>>,
        default: RegistryKind,
        config: ConfigStore,
    ) -> Self {
        RegistryManager {
            providers,
            default: RwLock::new(default),
            config,
        }
    }

    pub fn default_kind(&self) -> RegistryKind {
        *self.default.read().expect("registry default lock poisoned")
    }

    pub fn set_default(&self, kind: RegistryKind) {
        *self.default.write().expect("registry default lock poisoned") = kind;
    }

    pub fn provider(&self, kind: Option<RegistryKind>) -> Arc<dyn RegistryProvider> {
        let kind = kind.unwrap_or_else(|| self.default_kind());
        self.providers
            .get(&kind)
            .expect("all registry kinds are registered at construction")
            .clone()
    }

    fn configured_user(&self) -> Option<String> {
        self.config.load().ok().and_then(|c| c.registry_user)
    }

    pub async fn check_login(&self) -> Result<LoginStatus, RegistryError> {
        self.provider(None).check_login().await
    }

    pub async fn login(&self, user: Option<&str>) -> Result<(), RegistryError> {
        self.provider(None).login(user).await
    }

    /// Synthesized remote name for an agent image on the default registry,
    /// or None when no namespace is known.
    pub async fn image_name_for(
        &self,
        agent: AgentKind,
        user: Option<&str>,
    ) -> Result<Option<ImageReference>, RegistryError> {
        let configured = self.configured_user();
        let user = user.or(configured.as_deref());
        self.provider(None).image_name_for(agent, user).await
    }

    pub async fn pull(&self, reference: &ImageReference) -> Result<(), RegistryError> {
        self.provider(None).pull(reference).await
    }

    pub async fn upload_images(
        &self,
        user: &str,
        agents: &[AgentKind],
    ) -> Result<UploadReport, RegistryError> {
        self.provider(None).upload_images(user, agents).await
    }

    /// Check login, then upload the requested agent images. The happy path
    /// for `vibekit setup --upload`.
    pub async fn setup_registry(
        &self,
        user: Option<&str>,
        agents: &[AgentKind],
    ) -> Result<UploadReport, RegistryError> {
        let provider = self.provider(None);
        let status = provider.check_login().await?;
        if !status.logged_in {
            provider.login(user).await?;
        }

        let configured = self.configured_user();
        let user = user
            .map(str::to_string)
            .or_else(|| status.user.clone())
            .or(configured)
            .ok_or_else(|| RegistryError::NoNamespace {
                registry: provider.registry_url(),
            })?;

        provider.upload_images(&user, agents).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::test_support::FakeEngine;

    fn manager() -> (tempfile::TempDir, RegistryManager) {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigStore::new(dir.path());
        let engine: Arc<dyn ContainerEngine> = Arc::new(FakeEngine::default());
        (dir, RegistryManager::new(engine, config))
    }

    #[test]
    fn default_kind_is_switchable() {
        let (_dir, manager) = manager();
        assert_eq!(manager.default_kind(), RegistryKind::Dockerhub);
        manager.set_default(RegistryKind::Github);
        assert_eq!(manager.default_kind(), RegistryKind::Github);
        assert_eq!(manager.provider(None).kind(), RegistryKind::Github);
    }

    #[test]
    fn explicit_kind_overrides_default() {
        let (_dir, manager) = manager();
        assert_eq!(
            manager.provider(Some(RegistryKind::Aws)).kind(),
            RegistryKind::Aws
        );
    }

    #[tokio::test]
    async fn image_name_uses_configured_registry_user() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigStore::new(dir.path());
        config
            .update(|c| c.registry_user = Some("carol".to_string()))
            .unwrap();
        let engine: Arc<dyn ContainerEngine> = Arc::new(FakeEngine::default());
        let manager = RegistryManager::new(engine, config);

        let reference = manager
            .image_name_for(AgentKind::Claude, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reference.to_string(), "carol/vibekit-claude:latest");
    }

    #[tokio::test]
    async fn all_providers_synthesize_vibekit_repositories() {
        let (_dir, manager) = manager();
        for kind in RegistryKind::ALL {
            let provider = manager.provider(Some(kind));
            // Explicit user so no provider needs live credentials.
            if let Ok(Some(reference)) = provider.image_name_for(AgentKind::Codex, Some("u")).await
            {
                assert_eq!(
                    reference.repository, "vibekit-codex",
                    "{kind} must keep the vibekit-<agent> repository convention"
                );
            }
        }
    }
}
