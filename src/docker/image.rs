use backon::{ExponentialBuilder, Retryable};
use bollard::auth::DockerCredentials;
use bollard::models::{BuildInfo, CreateImageInfo};
use bollard::query_parameters::{
    BuildImageOptions, CreateImageOptions, ListImagesOptions, RemoveImageOptions, TagImageOptions,
};
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::docker::{login, DockerError};
use crate::reference::ImageReference;

/// Builds are not retried (failures are deterministic) but they are bounded.
const BUILD_TIMEOUT: Duration = Duration::from_secs(600);

/// Pull/push retry policy: 1s base delay, doubling, three attempts.
fn transfer_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_factor(2.0)
        .with_max_times(3)
}

/// Split an image reference into (name, tag), defaulting the tag to latest.
pub fn split_tag(reference: &str) -> (&str, &str) {
    match reference.rsplit_once(':') {
        Some((name, tag)) if !name.is_empty() && !tag.contains('/') => (name, tag),
        _ => (reference, "latest"),
    }
}

pub async fn image_exists(docker: &Docker, reference: &str) -> bool {
    docker.inspect_image(reference).await.is_ok()
}

/// Pull an image, retrying network-class failures with exponential backoff.
/// `NotFound` and `AuthRequired` are surfaced immediately.
pub async fn pull_with_retry(
    docker: &Docker,
    reference: &str,
    config_dir: &Path,
) -> Result<(), DockerError> {
    let credentials = login::credentials_for(reference, config_dir);

    (|| async { pull_once(docker, reference, credentials.clone()).await })
        .retry(transfer_backoff())
        .when(|e| matches!(e, DockerError::Network { .. }))
        .notify(|err, dur| {
            tracing::debug!(image = %reference, retry_in = ?dur, "pull failed: {err}, retrying")
        })
        .await
}

async fn pull_once(
    docker: &Docker,
    reference: &str,
    credentials: Option<DockerCredentials>,
) -> Result<(), DockerError> {
    let (name, tag) = split_tag(reference);
    tracing::debug!(image = %reference, "pulling image");

    let options = CreateImageOptions {
        from_image: Some(name.to_string()),
        tag: Some(tag.to_string()),
        ..Default::default()
    };

    let mut stream = docker.create_image(Some(options), None, credentials);
    while let Some(result) = stream.next().await {
        let info: CreateImageInfo = result.map_err(|e| classify_pull_error(reference, e))?;
        if let Some(err) = &info.error_detail {
            let message = err.message.clone().unwrap_or_default();
            return Err(classify_pull_message(reference, &message));
        }
    }

    tracing::debug!(image = %reference, "image pulled");
    Ok(())
}

fn classify_pull_error(reference: &str, err: bollard::errors::Error) -> DockerError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => DockerError::NotFound {
            reference: reference.to_string(),
            reason: message,
        },
        bollard::errors::Error::DockerResponseServerError {
            status_code: 401 | 403,
            ..
        } => DockerError::AuthRequired {
            reference: reference.to_string(),
        },
        bollard::errors::Error::DockerResponseServerError { message, .. } => {
            classify_pull_message(reference, &message)
        }
        other => DockerError::Network {
            operation: "pull",
            reference: reference.to_string(),
            reason: other.to_string(),
        },
    }
}

fn classify_pull_message(reference: &str, message: &str) -> DockerError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("not found") || lower.contains("manifest unknown") {
        DockerError::NotFound {
            reference: reference.to_string(),
            reason: message.to_string(),
        }
    } else if lower.contains("denied") || lower.contains("unauthorized") {
        DockerError::AuthRequired {
            reference: reference.to_string(),
        }
    } else {
        DockerError::Network {
            operation: "pull",
            reference: reference.to_string(),
            reason: message.to_string(),
        }
    }
}

/// Build a Dockerfile into a local tag by streaming a tar of the context to
/// the daemon. The dockerfile must live inside the context directory.
pub async fn build(
    docker: &Docker,
    dockerfile: &Path,
    tag: &str,
    context: &Path,
) -> Result<(), DockerError> {
    let dockerfile_rel = dockerfile
        .strip_prefix(context)
        .map_err(|_| DockerError::BuildFailed {
            tag: tag.to_string(),
            reason: format!(
                "dockerfile {} is outside the build context {}",
                dockerfile.display(),
                context.display()
            ),
        })?
        .to_string_lossy()
        .to_string();

    let context_tar = tar_directory(context).map_err(|e| DockerError::BuildFailed {
        tag: tag.to_string(),
        reason: format!("packing build context: {e}"),
    })?;

    let options = BuildImageOptions {
        dockerfile: dockerfile_rel,
        t: Some(tag.to_string()),
        ..Default::default()
    };

    tracing::info!(tag = %tag, dockerfile = %dockerfile.display(), "building image");

    let build = async {
        let mut stream = docker.build_image(options, None, Some(bollard::body_full(context_tar.into())));
        while let Some(result) = stream.next().await {
            let info: BuildInfo = result.map_err(|e| DockerError::BuildFailed {
                tag: tag.to_string(),
                reason: e.to_string(),
            })?;
            if let Some(err) = info.error_detail {
                return Err(DockerError::BuildFailed {
                    tag: tag.to_string(),
                    reason: err.message.unwrap_or_default(),
                });
            }
            if let Some(line) = info.stream {
                let line = line.trim_end();
                if !line.is_empty() {
                    tracing::debug!(tag = %tag, "{}", line);
                }
            }
        }
        Ok(())
    };

    match tokio::time::timeout(BUILD_TIMEOUT, build).await {
        Ok(result) => result,
        Err(_) => Err(DockerError::BuildFailed {
            tag: tag.to_string(),
            reason: format!("build exceeded {}s", BUILD_TIMEOUT.as_secs()),
        }),
    }
}

fn tar_directory(dir: &Path) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.append_dir_all(".", dir)?;
    builder.into_inner()
}

pub async fn tag(docker: &Docker, source: &str, target: &str) -> Result<(), DockerError> {
    let (repo, tag) = split_tag(target);
    let options = TagImageOptions {
        repo: Some(repo.to_string()),
        tag: Some(tag.to_string()),
    };
    docker
        .tag_image(source, Some(options))
        .await
        .map_err(|e| match e {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => DockerError::NotFound {
                reference: source.to_string(),
                reason: message,
            },
            other => DockerError::Network {
                operation: "tag",
                reference: source.to_string(),
                reason: other.to_string(),
            },
        })
}

/// Push through the daemon CLI so credential helpers are honored, retrying
/// network-class failures. The reference is validated before it reaches argv.
pub async fn push_with_retry(reference: &str) -> Result<(), DockerError> {
    (|| async { push_once(reference).await })
        .retry(transfer_backoff())
        .when(|e| matches!(e, DockerError::Network { .. }))
        .notify(|err, dur| {
            tracing::debug!(image = %reference, retry_in = ?dur, "push failed: {err}, retrying")
        })
        .await
}

async fn push_once(reference: &str) -> Result<(), DockerError> {
    tracing::debug!(image = %reference, "pushing image");

    let output = tokio::process::Command::new("docker")
        .args(["push", reference])
        .output()
        .await
        .map_err(|e| DockerError::DaemonUnavailable {
            reason: format!("spawning docker push: {e}"),
        })?;

    if output.status.success() {
        tracing::debug!(image = %reference, "image pushed");
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("denied") || lower.contains("unauthorized") || lower.contains("authentication")
    {
        Err(DockerError::AuthRequired {
            reference: reference.to_string(),
        })
    } else if lower.contains("does not exist") || lower.contains("not found") {
        Err(DockerError::NotFound {
            reference: reference.to_string(),
            reason: stderr.trim().to_string(),
        })
    } else {
        Err(DockerError::Network {
            operation: "push",
            reference: reference.to_string(),
            reason: stderr.trim().to_string(),
        })
    }
}

pub async fn remove(docker: &Docker, reference: &str, force: bool) -> Result<(), DockerError> {
    let options = RemoveImageOptions {
        force,
        ..Default::default()
    };
    match docker.remove_image(reference, Some(options), None).await {
        Ok(_) => Ok(()),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => Ok(()),
        Err(e) => Err(DockerError::Network {
            operation: "remove",
            reference: reference.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// List local images, optionally filtered by repository name prefix.
pub async fn list_images(
    docker: &Docker,
    filter: Option<&str>,
) -> Result<Vec<ImageReference>, DockerError> {
    let filters = filter.map(|f| {
        HashMap::from([("reference".to_string(), vec![format!("{f}*")])])
    });
    let options = ListImagesOptions {
        all: false,
        filters,
        ..Default::default()
    };

    let summaries =
        docker
            .list_images(Some(options))
            .await
            .map_err(|e| DockerError::Network {
                operation: "list",
                reference: filter.unwrap_or("*").to_string(),
                reason: e.to_string(),
            })?;

    let mut references = Vec::new();
    for summary in summaries {
        for tag in summary.repo_tags {
            if let Ok(parsed) = tag.parse::<ImageReference>() {
                references.push(parsed);
            }
        }
    }
    Ok(references)
}
