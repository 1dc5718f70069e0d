use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

static IMAGE_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._\-/:]*$").expect("image ref regex must compile")
});

/// Structured container image reference: `host/namespace/repository:tag`.
///
/// The host is optional (references without one resolve to the default hub),
/// as is the namespace for library images like `ubuntu:24.04`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub registry_host: Option<String>,
    pub namespace: Option<String>,
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    pub fn local(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        ImageReference {
            registry_host: None,
            namespace: None,
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    pub fn with_namespace(
        host: Option<&str>,
        namespace: &str,
        repository: &str,
        tag: &str,
    ) -> Self {
        ImageReference {
            registry_host: host.map(str::to_string),
            namespace: Some(namespace.to_string()),
            repository: repository.to_string(),
            tag: tag.to_string(),
        }
    }

    /// Reference without the tag suffix, e.g. `ghcr.io/alice/vibekit-claude`.
    pub fn name(&self) -> String {
        let mut out = String::new();
        if let Some(host) = &self.registry_host {
            out.push_str(host);
            out.push('/');
        }
        if let Some(ns) = &self.namespace {
            out.push_str(ns);
            out.push('/');
        }
        out.push_str(&self.repository);
        out
    }
}

impl Display for ImageReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name(), self.tag)
    }
}

impl FromStr for ImageReference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_image_ref(s).map_err(|e| e.to_string())?;

        let (name, tag) = match s.rsplit_once(':') {
            // A colon inside a path segment is a port on the registry host,
            // not a tag separator.
            Some((name, tag)) if !tag.contains('/') => (name, tag),
            _ => (s, "latest"),
        };

        let parts: Vec<&str> = name.split('/').collect();
        let reference = match parts.as_slice() {
            [repo] => ImageReference::local(*repo, tag),
            [ns, repo] => {
                // A first segment with a dot or colon is a registry host
                // (`ghcr.io/foo`), otherwise it is a hub namespace.
                if ns.contains('.') || ns.contains(':') {
                    ImageReference {
                        registry_host: Some(ns.to_string()),
                        namespace: None,
                        repository: repo.to_string(),
                        tag: tag.to_string(),
                    }
                } else {
                    ImageReference::with_namespace(None, ns, repo, tag)
                }
            }
            [host, middle @ .., repo] => ImageReference {
                registry_host: Some(host.to_string()),
                namespace: Some(middle.join("/")),
                repository: repo.to_string(),
                tag: tag.to_string(),
            },
            [] => return Err(format!("empty image reference: '{}'", s)),
        };

        Ok(reference)
    }
}

/// Reject image references containing anything outside the daemon's
/// reference grammar before they reach a spawned process.
pub fn validate_image_ref(reference: &str) -> Result<(), InvalidReference> {
    if reference.is_empty() || !IMAGE_REF_RE.is_match(reference) {
        return Err(InvalidReference {
            reference: reference.to_string(),
        });
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
#[error("invalid image reference '{reference}'")]
pub struct InvalidReference {
    pub reference: String,
}

const SHELL_METACHARACTERS: &[char] = &[';', '&', '|', '`', '$', '(', ')', '<', '>'];

/// Reject paths with shell metacharacters, `..` traversal segments, or a
/// leading `~` before they are handed to the daemon or a child process.
pub fn validate_path(path: &Path) -> Result<(), InvalidPath> {
    let text = path.to_string_lossy();

    if text.starts_with('~') || text.chars().any(|c| SHELL_METACHARACTERS.contains(&c)) {
        return Err(InvalidPath {
            path: text.to_string(),
            reason: "contains shell metacharacters",
        });
    }
    if path
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(InvalidPath {
            path: text.to_string(),
            reason: "contains '..' segments",
        });
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
#[error("invalid path '{path}': {reason}")]
pub struct InvalidPath {
    pub path: String,
    pub reason: &'static str,
}
