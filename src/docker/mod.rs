pub mod container;
pub mod exec;
pub mod image;
pub mod login;

use async_trait::async_trait;
use bollard::Docker;
use std::path::{Path, PathBuf};

use crate::reference::{ImageReference, InvalidPath, InvalidReference};

/// Image known to exist on every public mirror; used to probe registry
/// authentication when the local credential store hides the username.
pub const PROBE_IMAGE: &str = "alpine:3.20";

#[derive(Debug, thiserror::Error)]
pub enum DockerError {
    #[error("cannot connect to the Docker daemon: {reason}. Is Docker running?")]
    DaemonUnavailable { reason: String },

    #[error(transparent)]
    InvalidReference(#[from] InvalidReference),

    #[error(transparent)]
    InvalidPath(#[from] InvalidPath),

    #[error("image '{reference}' not found: {reason}")]
    NotFound { reference: String, reason: String },

    #[error("network failure during {operation} of '{reference}': {reason}")]
    Network {
        operation: &'static str,
        reference: String,
        reason: String,
    },

    #[error("build of '{tag}' failed: {reason}")]
    BuildFailed { tag: String, reason: String },

    #[error("registry authentication required for '{reference}' -- run `docker login` first")]
    AuthRequired { reference: String },
}

/// Result of asking the daemon who is logged in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginStatus {
    pub logged_in: bool,
    /// None when a credential store hides the username; callers that need a
    /// namespace must supply one explicitly in that case.
    pub user: Option<String>,
    pub registry: Option<String>,
}

impl LoginStatus {
    pub fn logged_out() -> Self {
        LoginStatus {
            logged_in: false,
            user: None,
            registry: None,
        }
    }
}

/// Narrow interface over the local container daemon. The resolver and the
/// registry providers speak to this trait so tests can substitute a
/// recording fake.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn check_login(&self) -> Result<LoginStatus, DockerError>;
    async fn image_exists_locally(&self, reference: &str) -> Result<bool, DockerError>;
    async fn pull(&self, reference: &str) -> Result<(), DockerError>;
    async fn build(&self, dockerfile: &Path, tag: &str, context: &Path)
        -> Result<(), DockerError>;
    async fn tag(&self, source: &str, target: &str) -> Result<(), DockerError>;
    async fn push(&self, reference: &str) -> Result<(), DockerError>;
    async fn remove(&self, reference: &str, force: bool) -> Result<(), DockerError>;
    async fn list_images(&self, filter: Option<&str>) -> Result<Vec<ImageReference>, DockerError>;
}

/// Bollard-backed client for the local daemon.
pub struct DockerClient {
    docker: Docker,
    /// Directory holding the daemon CLI config (`config.json`); overridable
    /// for tests via `$DOCKER_CONFIG`.
    config_dir: PathBuf,
}

impl DockerClient {
    /// Connect to the local daemon, verifying connectivity with a ping.
    pub async fn new() -> Result<Self, DockerError> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| DockerError::DaemonUnavailable {
                reason: e.to_string(),
            })?;
        docker
            .ping()
            .await
            .map_err(|e| DockerError::DaemonUnavailable {
                reason: e.to_string(),
            })?;

        Ok(Self {
            docker,
            config_dir: login::docker_config_dir(),
        })
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    pub async fn ping(&self) -> Result<(), DockerError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| DockerError::DaemonUnavailable {
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl ContainerEngine for DockerClient {
    async fn check_login(&self) -> Result<LoginStatus, DockerError> {
        login::check_login(&self.docker, &self.config_dir).await
    }

    async fn image_exists_locally(&self, reference: &str) -> Result<bool, DockerError> {
        crate::reference::validate_image_ref(reference)?;
        Ok(image::image_exists(&self.docker, reference).await)
    }

    async fn pull(&self, reference: &str) -> Result<(), DockerError> {
        crate::reference::validate_image_ref(reference)?;
        image::pull_with_retry(&self.docker, reference, &self.config_dir).await
    }

    async fn build(
        &self,
        dockerfile: &Path,
        tag: &str,
        context: &Path,
    ) -> Result<(), DockerError> {
        crate::reference::validate_image_ref(tag)?;
        crate::reference::validate_path(dockerfile)?;
        crate::reference::validate_path(context)?;
        image::build(&self.docker, dockerfile, tag, context).await
    }

    async fn tag(&self, source: &str, target: &str) -> Result<(), DockerError> {
        crate::reference::validate_image_ref(source)?;
        crate::reference::validate_image_ref(target)?;
        image::tag(&self.docker, source, target).await
    }

    async fn push(&self, reference: &str) -> Result<(), DockerError> {
        crate::reference::validate_image_ref(reference)?;
        image::push_with_retry(reference).await
    }

    async fn remove(&self, reference: &str, force: bool) -> Result<(), DockerError> {
        crate::reference::validate_image_ref(reference)?;
        image::remove(&self.docker, reference, force).await
    }

    async fn list_images(&self, filter: Option<&str>) -> Result<Vec<ImageReference>, DockerError> {
        image::list_images(&self.docker, filter).await
    }
}
