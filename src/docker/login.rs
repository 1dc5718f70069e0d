use base64::Engine;
use bollard::auth::DockerCredentials;
use bollard::Docker;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::docker::{image, DockerError, LoginStatus, PROBE_IMAGE};

const DEFAULT_REGISTRY_KEYS: &[&str] = &[
    "https://index.docker.io/v1/",
    "index.docker.io",
    "docker.io",
];

/// The daemon CLI's `config.json`, reduced to the fields login detection
/// needs.
#[derive(Debug, Default, Deserialize)]
struct CliConfig {
    #[serde(default)]
    auths: BTreeMap<String, AuthEntry>,
    #[serde(default, rename = "credsStore")]
    creds_store: Option<String>,
    #[serde(default, rename = "credHelpers")]
    cred_helpers: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
}

pub fn docker_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DOCKER_CONFIG") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".docker")
}

fn read_cli_config(config_dir: &Path) -> CliConfig {
    let path = config_dir.join("config.json");
    let Ok(content) = std::fs::read_to_string(&path) else {
        return CliConfig::default();
    };
    serde_json::from_str(&content).unwrap_or_default()
}

fn decode_auth_blob(blob: &str) -> Option<String> {
    let decoded = base64::engine::general_purpose::STANDARD.decode(blob).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, _pass) = text.split_once(':')?;
    (!user.is_empty()).then(|| user.to_string())
}

/// Detect the daemon's registry login state.
///
/// An inline `auth` blob yields the decoded username. When a credential
/// store hides the credentials, authentication is probed by pulling a tiny
/// public image; a successful probe reports `logged_in = true` with no
/// username, and callers that need a namespace must supply one.
pub async fn check_login(docker: &Docker, config_dir: &Path) -> Result<LoginStatus, DockerError> {
    let config = read_cli_config(config_dir);

    for (registry, entry) in &config.auths {
        if let Some(user) = entry.auth.as_deref().and_then(decode_auth_blob) {
            return Ok(LoginStatus {
                logged_in: true,
                user: Some(user),
                registry: Some(registry.clone()),
            });
        }
    }

    let store_in_use = config.creds_store.is_some()
        || !config.cred_helpers.is_empty()
        || !config.auths.is_empty();
    if store_in_use {
        tracing::debug!("credential store in use, probing registry access");
        match image::pull_with_retry(docker, PROBE_IMAGE, config_dir).await {
            Ok(()) => {
                return Ok(LoginStatus {
                    logged_in: true,
                    user: None,
                    registry: config.auths.keys().next().cloned(),
                });
            }
            Err(err) => {
                tracing::debug!("login probe failed: {err}");
            }
        }
    }

    Ok(LoginStatus::logged_out())
}

/// Inline credentials for a reference's registry, when the config file
/// carries them directly. Credential-store entries yield None; the CLI
/// paths handle those.
pub fn credentials_for(reference: &str, config_dir: &Path) -> Option<DockerCredentials> {
    let config = read_cli_config(config_dir);
    let host = registry_host(reference);

    for (registry, entry) in &config.auths {
        let matches_default = host.is_none()
            && DEFAULT_REGISTRY_KEYS
                .iter()
                .any(|key| registry.contains(key) || key.contains(registry.as_str()));
        let matches_host = host.is_some_and(|h| registry.contains(h));
        if !(matches_default || matches_host) {
            continue;
        }
        let blob = entry.auth.as_deref()?;
        let decoded = base64::engine::general_purpose::STANDARD.decode(blob).ok()?;
        let text = String::from_utf8(decoded).ok()?;
        let (user, pass) = text.split_once(':')?;
        return Some(DockerCredentials {
            username: Some(user.to_string()),
            password: Some(pass.to_string()),
            serveraddress: Some(registry.clone()),
            ..Default::default()
        });
    }
    None
}

/// Registry host of a reference, when it names one explicitly.
fn registry_host(reference: &str) -> Option<&str> {
    let first = reference.split('/').next()?;
    if reference.contains('/') && (first.contains('.') || first.contains(':')) {
        Some(first)
    } else {
        None
    }
}
