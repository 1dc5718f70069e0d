pub mod auth;
pub mod local;
pub mod setup_cmd;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::config::ConfigStore;
use crate::docker::{ContainerEngine, DockerClient};
use crate::registry::RegistryManager;
use crate::resolver::ImageResolver;
use crate::sandbox::{DockerBackend, SandboxProvider};

/// Everything a sandbox-facing command needs, wired once per invocation.
pub(crate) struct Stack {
    pub client: Arc<DockerClient>,
    pub config: ConfigStore,
    pub registries: Arc<RegistryManager>,
    pub resolver: Arc<ImageResolver>,
    pub provider: SandboxProvider,
}

pub(crate) async fn build_stack(home: Option<&Path>) -> Result<Stack> {
    let client = Arc::new(
        DockerClient::new()
            .await
            .context("connecting to the Docker daemon")?,
    );
    let config = match home {
        Some(home) => ConfigStore::new(home),
        None => ConfigStore::default_location(),
    };

    let engine: Arc<dyn ContainerEngine> = client.clone();
    let registries = Arc::new(RegistryManager::new(engine.clone(), config.clone()));
    let resolver = Arc::new(ImageResolver::new(
        engine,
        registries.clone(),
        config.clone(),
    ));
    let backend = Arc::new(DockerBackend::new(client.clone()));
    let provider = SandboxProvider::new(backend, resolver.clone());

    Ok(Stack {
        client,
        config,
        registries,
        resolver,
        provider,
    })
}
