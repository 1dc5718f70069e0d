use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::agent::AgentKind;
use crate::docker::{ContainerEngine, LoginStatus};
use crate::reference::ImageReference;
use crate::registry::{
    run_cli, upload_one, RegistryError, RegistryKind, RegistryProvider, UploadReport,
};

const DEFAULT_REGION: &str = "us-east-1";

/// AWS ECR. The registry host is derived from the caller identity
/// (`<account>.dkr.ecr.<region>.amazonaws.com`); repositories must exist
/// before a push and are created on demand.
pub struct AwsRegistry {
    engine: Arc<dyn ContainerEngine>,
    identity: OnceCell<EcrIdentity>,
}

#[derive(Debug, Clone)]
struct EcrIdentity {
    account_id: String,
    region: String,
}

impl EcrIdentity {
    fn host(&self) -> String {
        format!("{}.dkr.ecr.{}.amazonaws.com", self.account_id, self.region)
    }
}

fn aws_region() -> String {
    std::env::var("AWS_REGION")
        .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
        .ok()
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_REGION.to_string())
}

impl AwsRegistry {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        AwsRegistry {
            engine,
            identity: OnceCell::new(),
        }
    }

    /// Caller identity via the cloud CLI, resolved once per process.
    async fn identity(&self) -> Result<&EcrIdentity, RegistryError> {
        self.identity
            .get_or_try_init(|| async {
                let account_id = run_cli(
                    "ecr",
                    "identity",
                    "aws",
                    &[
                        "sts",
                        "get-caller-identity",
                        "--query",
                        "Account",
                        "--output",
                        "text",
                    ],
                )
                .await?;
                if account_id.is_empty() {
                    return Err(RegistryError::AuthRequired {
                        registry: "ecr".to_string(),
                        hint: "run `aws configure` or set AWS credentials in the environment"
                            .to_string(),
                    });
                }
                Ok(EcrIdentity {
                    account_id,
                    region: aws_region(),
                })
            })
            .await
    }

    /// Create the repository when it does not exist yet. ECR rejects
    /// pushes to unknown repositories, unlike the other registries.
    async fn ensure_repository(
        &self,
        identity: &EcrIdentity,
        repository: &str,
    ) -> Result<(), RegistryError> {
        let describe = run_cli(
            "ecr",
            "describe-repository",
            "aws",
            &[
                "ecr",
                "describe-repositories",
                "--repository-names",
                repository,
                "--region",
                &identity.region,
            ],
        )
        .await;

        match describe {
            Ok(_) => Ok(()),
            Err(RegistryError::Api { reason, .. })
                if reason.contains("RepositoryNotFoundException") =>
            {
                tracing::info!(repository = %repository, "creating ECR repository");
                run_cli(
                    "ecr",
                    "create-repository",
                    "aws",
                    &[
                        "ecr",
                        "create-repository",
                        "--repository-name",
                        repository,
                        "--region",
                        &identity.region,
                    ],
                )
                .await
                .map(|_| ())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl RegistryProvider for AwsRegistry {
    fn kind(&self) -> RegistryKind {
        RegistryKind::Aws
    }

    fn registry_url(&self) -> String {
        match self.identity.get() {
            Some(identity) => identity.host(),
            None => format!("<account>.dkr.ecr.{}.amazonaws.com", aws_region()),
        }
    }

    async fn check_login(&self) -> Result<LoginStatus, RegistryError> {
        match self.identity().await {
            Ok(identity) => Ok(LoginStatus {
                logged_in: true,
                user: Some(identity.account_id.clone()),
                registry: Some(identity.host()),
            }),
            Err(RegistryError::Api { .. } | RegistryError::AuthRequired { .. }) => {
                Ok(LoginStatus::logged_out())
            }
            Err(e) => Err(e),
        }
    }

    /// `aws ecr get-login-password` piped into a daemon login.
    async fn login(&self, _user: Option<&str>) -> Result<(), RegistryError> {
        let identity = self.identity().await?.clone();
        let password = run_cli(
            "ecr",
            "login",
            "aws",
            &["ecr", "get-login-password", "--region", &identity.region],
        )
        .await?;

        let host = identity.host();
        let mut child = tokio::process::Command::new("docker")
            .args(["login", &host, "-u", "AWS", "--password-stdin"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RegistryError::Api {
                operation: "login",
                registry: host.clone(),
                reason: format!("spawning docker login: {e}"),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            let _ = stdin.write_all(password.as_bytes()).await;
        }

        let output = child.wait_with_output().await.map_err(|e| RegistryError::Api {
            operation: "login",
            registry: host.clone(),
            reason: e.to_string(),
        })?;
        if !output.status.success() {
            return Err(RegistryError::AuthRequired {
                registry: host,
                hint: format!(
                    "docker login failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        tracing::info!(registry = %host, "logged in to ECR");
        Ok(())
    }

    async fn image_name_for(
        &self,
        agent: AgentKind,
        _user: Option<&str>,
    ) -> Result<Option<ImageReference>, RegistryError> {
        let Ok(identity) = self.identity().await else {
            return Ok(None);
        };
        Ok(Some(ImageReference {
            registry_host: Some(identity.host()),
            namespace: None,
            repository: agent.repository(),
            tag: "latest".to_string(),
        }))
    }

    async fn upload_images(
        &self,
        _user: &str,
        agents: &[AgentKind],
    ) -> Result<UploadReport, RegistryError> {
        let identity = self.identity().await?.clone();
        let mut report = UploadReport::default();

        for &agent in agents {
            let repository = agent.repository();
            if let Err(e) = self.ensure_repository(&identity, &repository).await {
                report.per_agent.push(crate::registry::AgentUpload {
                    agent,
                    success: false,
                    error: Some(e.to_string()),
                    image: None,
                });
                continue;
            }

            let remote = ImageReference {
                registry_host: Some(identity.host()),
                namespace: None,
                repository,
                tag: "latest".to_string(),
            };
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
