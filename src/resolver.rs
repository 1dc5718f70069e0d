use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;

use crate::agent::AgentKind;
use crate::config::{ConfigError, ConfigStore};
use crate::docker::{ContainerEngine, DockerError};
use crate::registry::{RegistryError, RegistryManager};

/// Neutral OS base returned when no agent is requested or nothing else can
/// be resolved.
pub const FALLBACK_IMAGE: &str = "ubuntu:24.04";

/// Conventional location of the per-agent Dockerfiles.
pub const DOCKERFILE_ROOT: &str = "assets/dockerfiles";

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Docker(#[from] DockerError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Per-agent outcome of a prebuild batch.
#[derive(Debug)]
pub struct PrebuildOutcome {
    pub agent: AgentKind,
    pub result: Result<String, String>,
}

/// Maps an agent kind to a locally-runnable image tag with a layered
/// strategy: config override, local cache, registry pull, local build
/// (+ optional push), neutral fallback.
pub struct ImageResolver {
    engine: Arc<dyn ContainerEngine>,
    registries: Arc<RegistryManager>,
    config: ConfigStore,
    dockerfile_root: PathBuf,
}

impl ImageResolver {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        registries: Arc<RegistryManager>,
        config: ConfigStore,
    ) -> Self {
        ImageResolver {
            engine,
            registries,
            config,
            dockerfile_root: PathBuf::from(DOCKERFILE_ROOT),
        }
    }

    pub fn with_dockerfile_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.dockerfile_root = root.into();
        self
    }

    /// Resolve the image for an agent. After a success, a repeat call for
    /// the same agent is a cheap local cache check.
    pub async fn resolve_image(
        &self,
        agent: Option<AgentKind>,
    ) -> Result<String, ResolveError> {
        let Some(agent) = agent else {
            return Ok(FALLBACK_IMAGE.to_string());
        };

        // Explicit overrides bypass name synthesis entirely.
        if let Some(reference) = self.config.agent_override(agent)? {
            tracing::debug!(agent = %agent, image = %reference, "using per-agent override");
            return Ok(reference);
        }

        let local_tag = agent.local_tag();
        if self.engine.image_exists_locally(&local_tag).await? {
            tracing::debug!(agent = %agent, tag = %local_tag, "image cache hit");
            return Ok(local_tag);
        }

        let config = self.config.load()?;

        if config.prefer_registry_images {
            if let Some(tag) = self.try_registry_pull(agent, &local_tag).await? {
                return Ok(tag);
            }
        }

        let dockerfile = self.dockerfile_root.join(agent.dockerfile_name());
        if dockerfile.is_file() {
            crate::reference::validate_path(&dockerfile).map_err(DockerError::from)?;
            tracing::info!(agent = %agent, tag = %local_tag, "building agent image");
            self.engine
                .build(&dockerfile, &local_tag, &self.dockerfile_root)
                .await?;
            let _ = self.config.update(|c| c.last_build_at = Some(Utc::now()));

            if config.push_images {
                self.push_built_image(agent, &local_tag).await;
            }
            return Ok(local_tag);
        }

        tracing::warn!(
            agent = %agent,
            "no cached image, registry image, or Dockerfile -- falling back to {}",
            FALLBACK_IMAGE
        );
        Ok(FALLBACK_IMAGE.to_string())
    }

    /// Pull the registry image and retag it locally. `NotFound` and
    /// network-class failures are swallowed so a local build can still
    /// succeed; everything else propagates.
    async fn try_registry_pull(
        &self,
        agent: AgentKind,
        local_tag: &str,
    ) -> Result<Option<String>, ResolveError> {
        let Some(remote) = self.registries.image_name_for(agent, None).await? else {
            tracing::debug!(agent = %agent, "no registry namespace known, skipping pull");
            return Ok(None);
        };

        let remote_text = remote.to_string();
        match self.engine.pull(&remote_text).await {
            Ok(()) => {
                self.engine.tag(&remote_text, local_tag).await?;
                tracing::info!(agent = %agent, image = %remote_text, "pulled registry image");
                Ok(Some(local_tag.to_string()))
            }
            Err(DockerError::NotFound { .. } | DockerError::Network { .. }) => {
                tracing::debug!(agent = %agent, image = %remote_text, "registry pull missed");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Publish a freshly built image. Failure is logged and swallowed; the
    /// local tag is still usable.
    async fn push_built_image(&self, agent: AgentKind, local_tag: &str) {
        let remote = match self.registries.image_name_for(agent, None).await {
            Ok(Some(remote)) => remote,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(agent = %agent, "skipping push, no registry name: {e}");
                return;
            }
        };

        let remote_text = remote.to_string();
        let result = async {
            self.engine.tag(local_tag, &remote_text).await?;
            self.engine.push(&remote_text).await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(agent = %agent, image = %remote_text, "push failed (image still usable locally): {e}");
        }
    }

    /// Resolve every requested agent, collecting per-agent outcomes.
    /// Errors never abort the batch.
    pub async fn prebuild_images(&self, agents: &[AgentKind]) -> Vec<PrebuildOutcome> {
        let mut outcomes = Vec::with_capacity(agents.len());
        for &agent in agents {
            let result = self
                .resolve_image(Some(agent))
                .await
                .map_err(|e| e.to_string());
            if let Err(e) = &result {
                tracing::warn!(agent = %agent, "prebuild failed: {e}");
            }
            outcomes.push(PrebuildOutcome { agent, result });
        }
        outcomes
    }
}

#[cfg(test)]
pub mod test_support {
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::Mutex;

    use crate::docker::{ContainerEngine, DockerError, LoginStatus};
    use crate::reference::ImageReference;

    /// Recording in-memory engine. Every operation appends to a call log
    /// so tests can assert which daemon interactions happened.
    #[derive(Default)]
    pub struct FakeEngine {
        login: Mutex<Option<LoginStatus>>,
        local: Mutex<HashSet<String>>,
        remote: Mutex<HashSet<String>>,
        log: Mutex<Vec<String>>,
        fail_push: Mutex<bool>,
        fail_pull_network: Mutex<bool>,
    }

    impl FakeEngine {
        pub fn with_login(self, status: LoginStatus) -> Self {
            *self.login.lock().unwrap() = Some(status);
            self
        }

        pub fn with_local_image(self, reference: &str) -> Self {
            self.local.lock().unwrap().insert(reference.to_string());
            self
        }

        pub fn with_remote_image(self, reference: &str) -> Self {
            self.remote.lock().unwrap().insert(reference.to_string());
            self
        }

        pub fn with_push_failure(self) -> Self {
            *self.fail_push.lock().unwrap() = true;
            self
        }

        pub fn with_network_down(self) -> Self {
            *self.fail_pull_network.lock().unwrap() = true;
            self
        }

        pub fn call_log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        /// Number of recorded calls for one operation name.
        pub fn calls(&self, operation: &str) -> usize {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|entry| entry.starts_with(operation))
                .count()
        }

        fn record(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }
    }

    #[async_trait]
    impl ContainerEngine for FakeEngine {
        async fn check_login(&self) -> Result<LoginStatus, DockerError> {
            self.record("check_login".to_string());
            Ok(self
                .login
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(LoginStatus::logged_out))
        }

        async fn image_exists_locally(&self, reference: &str) -> Result<bool, DockerError> {
            self.record(format!("exists {reference}"));
            Ok(self.local.lock().unwrap().contains(reference))
        }

        async fn pull(&self, reference: &str) -> Result<(), DockerError> {
            self.record(format!("pull {reference}"));
            if *self.fail_pull_network.lock().unwrap() {
                return Err(DockerError::Network {
                    operation: "pull",
                    reference: reference.to_string(),
                    reason: "network down".to_string(),
                });
            }
            if self.remote.lock().unwrap().contains(reference) {
                self.local.lock().unwrap().insert(reference.to_string());
                Ok(())
            } else {
                Err(DockerError::NotFound {
                    reference: reference.to_string(),
                    reason: "manifest unknown".to_string(),
                })
            }
        }

        async fn build(
            &self,
            dockerfile: &Path,
            tag: &str,
            _context: &Path,
        ) -> Result<(), DockerError> {
            self.record(format!("build {} -> {tag}", dockerfile.display()));
            self.local.lock().unwrap().insert(tag.to_string());
            Ok(())
        }

        async fn tag(&self, source: &str, target: &str) -> Result<(), DockerError> {
            self.record(format!("tag {source} {target}"));
            if !self.local.lock().unwrap().contains(source) {
                return Err(DockerError::NotFound {
                    reference: source.to_string(),
                    reason: "no such image".to_string(),
                });
            }
            self.local.lock().unwrap().insert(target.to_string());
            Ok(())
        }

        async fn push(&self, reference: &str) -> Result<(), DockerError> {
            self.record(format!("push {reference}"));
            if *self.fail_push.lock().unwrap() {
                return Err(DockerError::Network {
                    operation: "push",
                    reference: reference.to_string(),
                    reason: "connection reset".to_string(),
                });
            }
            self.remote.lock().unwrap().insert(reference.to_string());
            Ok(())
        }

        async fn remove(&self, reference: &str, _force: bool) -> Result<(), DockerError> {
            self.record(format!("remove {reference}"));
            self.local.lock().unwrap().remove(reference);
            Ok(())
        }

        async fn list_images(
            &self,
            filter: Option<&str>,
        ) -> Result<Vec<ImageReference>, DockerError> {
            self.record(format!("list {}", filter.unwrap_or("*")));
            let images = self.local.lock().unwrap();
            Ok(images
                .iter()
                .filter(|i| filter.is_none_or(|f| i.starts_with(f)))
                .filter_map(|i| i.parse().ok())
                .collect())
        }
    }

    /// Registry provider returning a fixed synthesized name.
    pub struct FakeRegistry {
        pub name: Mutex<Option<ImageReference>>,
        pub name_calls: Mutex<usize>,
    }

    impl FakeRegistry {
        pub fn returning(name: Option<&str>) -> Self {
            FakeRegistry {
                name: Mutex::new(name.map(|n| n.parse().unwrap())),
                name_calls: Mutex::new(0),
            }
        }

        pub fn name_call_count(&self) -> usize {
            *self.name_calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl crate::registry::RegistryProvider for FakeRegistry {
        fn kind(&self) -> crate::registry::RegistryKind {
            crate::registry::RegistryKind::Dockerhub
        }

        fn registry_url(&self) -> String {
            "fake.example".to_string()
        }

        async fn check_login(&self) -> Result<LoginStatus, crate::registry::RegistryError> {
            Ok(LoginStatus::logged_out())
        }

        async fn login(&self, _user: Option<&str>) -> Result<(), crate::registry::RegistryError> {
            Ok(())
        }

        async fn image_name_for(
            &self,
            _agent: crate::agent::AgentKind,
            _user: Option<&str>,
        ) -> Result<Option<ImageReference>, crate::registry::RegistryError> {
            *self.name_calls.lock().unwrap() += 1;
            Ok(self.name.lock().unwrap().clone())
        }

        async fn upload_images(
            &self,
            _user: &str,
            _agents: &[crate::agent::AgentKind],
        ) -> Result<crate::registry::UploadReport, crate::registry::RegistryError> {
            Ok(crate::registry::UploadReport::default())
        }

        async fn pull(
            &self,
            _reference: &ImageReference,
        ) -> Result<(), crate::registry::RegistryError> {
            Ok(())
        }

        async fn image_exists_locally(
            &self,
            _reference: &ImageReference,
        ) -> Result<bool, crate::registry::RegistryError> {
            Ok(false)
        }
    }
}
