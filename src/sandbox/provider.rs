use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::agent::AgentKind;
use crate::resolver::{ImageResolver, ResolveError};
use crate::sandbox::backend::SandboxBackend;
use crate::sandbox::instance::{Sandbox, DEFAULT_WORK_DIR};

pub const ID_PREFIX: &str = "vibekit";

const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn base36(mut value: u128) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are ascii")
}

fn random_suffix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| DIGITS[rng.gen_range(0..DIGITS.len())] as char)
        .collect()
}

/// `vibekit-<agent-or-default>-<base36 millis>-<6 random chars>`.
pub fn generate_sandbox_id(agent: Option<AgentKind>) -> String {
    let agent = agent.map(|a| a.slug()).unwrap_or("default");
    let ts = base36(Utc::now().timestamp_millis().max(0) as u128);
    format!("{ID_PREFIX}-{agent}-{ts}-{}", random_suffix(6))
}

/// Factory and in-memory registry for sandbox instances. Sandboxes are
/// ephemeral: the registry does not survive a restart.
pub struct SandboxProvider {
    backend: Arc<dyn SandboxBackend>,
    resolver: Arc<ImageResolver>,
    sandboxes: DashMap<String, Arc<Sandbox>>,
}

impl SandboxProvider {
    pub fn new(backend: Arc<dyn SandboxBackend>, resolver: Arc<ImageResolver>) -> Self {
        SandboxProvider {
            backend,
            resolver,
            sandboxes: DashMap::new(),
        }
    }

    /// Create a sandbox: resolve the agent image, mint an id, register the
    /// instance. The container itself starts lazily on the first run.
    pub async fn create(
        &self,
        env: BTreeMap<String, String>,
        agent: Option<AgentKind>,
        work_dir: Option<String>,
    ) -> Result<Arc<Sandbox>, ResolveError> {
        self.create_with_id(generate_sandbox_id(agent), env, agent, work_dir)
            .await
    }

    /// Create a sandbox under a caller-chosen id (`local create --name`).
    pub async fn create_with_id(
        &self,
        id: String,
        env: BTreeMap<String, String>,
        agent: Option<AgentKind>,
        work_dir: Option<String>,
    ) -> Result<Arc<Sandbox>, ResolveError> {
        let image = self.resolver.resolve_image(agent).await?;
        tracing::info!(sandbox = %id, image = %image, "sandbox created");

        let sandbox = Sandbox::new(
            id.clone(),
            agent,
            image,
            env.into_iter().collect(),
            work_dir.unwrap_or_else(|| DEFAULT_WORK_DIR.to_string()),
            current_git_branch().await,
            self.backend.clone(),
        );
        self.sandboxes.insert(id, sandbox.clone());
        Ok(sandbox)
    }

    /// Attach a logical id to an instance. Containers are ephemeral, so
    /// resuming an unknown id yields a fresh instance bound to that id
    /// with no workspace continuity.
    pub async fn resume(&self, id: &str) -> Result<Arc<Sandbox>, ResolveError> {
        if let Some(existing) = self.sandboxes.get(id) {
            return Ok(existing.clone());
        }

        let agent = agent_from_id(id);
        tracing::info!(sandbox = %id, "resuming as a fresh sandbox");
        self.create_with_id(id.to_string(), BTreeMap::new(), agent, None)
            .await
    }

    pub fn get(&self, id: &str) -> Option<Arc<Sandbox>> {
        self.sandboxes.get(id).map(|s| s.clone())
    }

    pub fn list(&self) -> Vec<Arc<Sandbox>> {
        let mut sandboxes: Vec<_> = self.sandboxes.iter().map(|e| e.value().clone()).collect();
        sandboxes.sort_by(|a, b| a.id().cmp(b.id()));
        sandboxes
    }

    /// Kill and forget a sandbox. Unknown ids are fine.
    pub async fn remove(&self, id: &str) -> bool {
        let Some((_, sandbox)) = self.sandboxes.remove(id) else {
            return false;
        };
        sandbox.kill().await;
        true
    }

    pub async fn kill_all(&self) {
        let ids: Vec<String> = self.sandboxes.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.remove(&id).await;
        }
    }
}

/// Recover the agent kind a generated id encodes, for resume.
fn agent_from_id(id: &str) -> Option<AgentKind> {
    let rest = id.strip_prefix("vibekit-")?;
    let slug = rest.split('-').next()?;
    slug.parse().ok()
}

/// Current git branch of the working directory, best-effort. Sandboxes
/// carry it as a label so listings can filter by branch.
async fn current_git_branch() -> Option<String> {
    let output = tokio::process::Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!branch.is_empty() && branch != "HEAD").then_some(branch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use crate::docker::ContainerEngine;
    use crate::registry::{RegistryKind, RegistryManager, RegistryProvider};
    use crate::resolver::test_support::{FakeEngine, FakeRegistry};
    use crate::sandbox::test_support::FakeBackend;
    use std::collections::HashMap;

    fn provider() -> (tempfile::TempDir, SandboxProvider) {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigStore::new(dir.path());
        let engine: Arc<dyn ContainerEngine> = Arc::new(FakeEngine::default());
        let providers: HashMap<RegistryKind, Arc<dyn RegistryProvider>> = HashMap::from([(
            RegistryKind::Dockerhub,
            Arc::new(FakeRegistry::returning(None)) as Arc<dyn RegistryProvider>,
        )]);
        let manager = Arc::new(RegistryManager::with_providers(
            providers,
            RegistryKind::Dockerhub,
            config.clone(),
        ));
        let resolver = Arc::new(ImageResolver::new(engine, manager, config));
        let backend = Arc::new(FakeBackend::succeeding());
        (dir, SandboxProvider::new(backend, resolver))
    }

    #[test]
    fn base36_encodes_known_values() {
        assert_eq!(base36(0), "0");
        assert_eq!(base36(35), "z");
        assert_eq!(base36(36), "10");
        assert_eq!(base36(36 * 36 + 1), "101");
    }

    #[test]
    fn id_has_prefix_agent_timestamp_and_suffix() {
        let id = generate_sandbox_id(Some(AgentKind::Claude));
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts[0], "vibekit");
        assert_eq!(parts[1], "claude");
        assert!(parts[2].chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_eq!(parts[3].len(), 6);
    }

    #[test]
    fn id_without_agent_uses_default_segment() {
        let id = generate_sandbox_id(None);
        assert!(id.starts_with("vibekit-default-"));
    }

    #[test]
    fn ids_are_unique() {
        let a = generate_sandbox_id(Some(AgentKind::Codex));
        let b = generate_sandbox_id(Some(AgentKind::Codex));
        assert_ne!(a, b, "random suffix must make ids unique");
    }

    #[test]
    fn agent_round_trips_through_id() {
        let id = generate_sandbox_id(Some(AgentKind::Gemini));
        assert_eq!(agent_from_id(&id), Some(AgentKind::Gemini));
        assert_eq!(agent_from_id("vibekit-default-x-y"), None);
        assert_eq!(agent_from_id("something-else"), None);
    }

    #[tokio::test]
    async fn create_registers_and_lists() {
        let (_dir, provider) = provider();
        let sandbox = provider
            .create(BTreeMap::new(), None, None)
            .await
            .unwrap();
        assert!(provider.get(sandbox.id()).is_some());
        assert_eq!(provider.list().len(), 1);

        let record = sandbox.record();
        assert!(record.running);
        assert_eq!(record.work_dir, DEFAULT_WORK_DIR);
    }

    #[tokio::test]
    async fn create_uses_fallback_image_without_agent() {
        let (_dir, provider) = provider();
        let sandbox = provider.create(BTreeMap::new(), None, None).await.unwrap();
        assert_eq!(sandbox.image_tag(), crate::resolver::FALLBACK_IMAGE);
    }

    #[tokio::test]
    async fn resume_known_id_returns_same_instance() {
        let (_dir, provider) = provider();
        let sandbox = provider.create(BTreeMap::new(), None, None).await.unwrap();
        let resumed = provider.resume(sandbox.id()).await.unwrap();
        assert!(Arc::ptr_eq(&sandbox, &resumed));
    }

    #[tokio::test]
    async fn resume_unknown_id_creates_fresh_instance() {
        let (_dir, provider) = provider();
        let resumed = provider.resume("vibekit-default-abc-xyz123").await.unwrap();
        assert_eq!(resumed.id(), "vibekit-default-abc-xyz123");
        assert!(
            resumed.workspace_snapshot().is_none(),
            "resume gives no workspace continuity"
        );
    }

    #[tokio::test]
    async fn remove_kills_and_forgets() {
        let (_dir, provider) = provider();
        let sandbox = provider.create(BTreeMap::new(), None, None).await.unwrap();
        let id = sandbox.id().to_string();

        assert!(provider.remove(&id).await);
        assert!(provider.get(&id).is_none());
        assert!(!sandbox.is_running(), "removed sandbox must be killed");
        assert!(!provider.remove(&id).await, "second remove is a no-op");
    }
}
