use crate::agent::AgentKind;
use crate::docker::DockerClient;
use crate::resolver::{ImageResolver, PrebuildOutcome};

/// One host dependency probe. Optional dependencies degrade features
/// instead of aborting setup.
#[derive(Debug)]
pub struct DependencyCheck {
    pub name: &'static str,
    pub ok: bool,
    pub required: bool,
    pub detail: String,
    pub remediation: Option<&'static str>,
}

#[derive(Debug, Default)]
pub struct DependencyReport {
    pub checks: Vec<DependencyCheck>,
}

impl DependencyReport {
    /// True when every required dependency is present; missing optional
    /// ones are warnings.
    pub fn ok(&self) -> bool {
        self.checks.iter().all(|c| c.ok || !c.required)
    }

    /// Remediation lines for everything that failed.
    pub fn remediations(&self) -> Vec<&'static str> {
        self.checks
            .iter()
            .filter(|c| !c.ok)
            .filter_map(|c| c.remediation)
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("missing host dependencies: {failed:?}")]
pub struct MissingDependencies {
    pub failed: Vec<String>,
    pub report: DependencyReport,
}

#[derive(Debug, Clone, Default)]
pub struct SetupOptions {
    /// Agents to warm; empty means all of them.
    pub agents: Vec<AgentKind>,
    pub skip_prebuild: bool,
}

#[derive(Debug)]
pub struct SetupOutcome {
    pub report: DependencyReport,
    pub prebuilt: Vec<PrebuildOutcome>,
}

async fn probe_cli(program: &str, args: &[&str]) -> Option<String> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if stdout.is_empty() {
        // Some tools print their version to stderr.
        Some(String::from_utf8_lossy(&output.stderr).trim().to_string())
    } else {
        Some(stdout)
    }
}

/// Probe the container daemon, the daemon CLI, the build engine, and the
/// host-side helpers.
pub async fn validate_dependencies() -> DependencyReport {
    let mut report = DependencyReport::default();

    let daemon = match DockerClient::new().await {
        Ok(client) => {
            let version = client
                .docker()
                .version()
                .await
                .ok()
                .and_then(|v| v.version)
                .unwrap_or_else(|| "unknown version".to_string());
            DependencyCheck {
                name: "docker daemon",
                ok: true,
                required: true,
                detail: version,
                remediation: None,
            }
        }
        Err(e) => DependencyCheck {
            name: "docker daemon",
            ok: false,
            required: true,
            detail: e.to_string(),
            remediation: Some("start Docker Desktop or the docker service"),
        },
    };
    report.checks.push(daemon);

    let cli = match probe_cli("docker", &["--version"]).await {
        Some(version) => DependencyCheck {
            name: "docker cli",
            ok: true,
            required: true,
            detail: version,
            remediation: None,
        },
        None => DependencyCheck {
            name: "docker cli",
            ok: false,
            required: true,
            detail: "not found on PATH".to_string(),
            remediation: Some("install docker (https://docs.docker.com/get-docker/)"),
        },
    };
    report.checks.push(cli);

    // Local image builds need buildkit; registry pulls work without it.
    let buildx = match probe_cli("docker", &["buildx", "version"]).await {
        Some(version) => DependencyCheck {
            name: "build engine",
            ok: true,
            required: false,
            detail: version,
            remediation: None,
        },
        None => DependencyCheck {
            name: "build engine",
            ok: false,
            required: false,
            detail: "buildx plugin unavailable (local image builds disabled)".to_string(),
            remediation: Some("install the docker buildx plugin"),
        },
    };
    report.checks.push(buildx);

    // Branch labels on sandboxes come from the git CLI.
    let git = match probe_cli("git", &["--version"]).await {
        Some(version) => DependencyCheck {
            name: "git",
            ok: true,
            required: false,
            detail: version,
            remediation: None,
        },
        None => DependencyCheck {
            name: "git",
            ok: false,
            required: false,
            detail: "not found on PATH (branch labels disabled)".to_string(),
            remediation: Some("install git"),
        },
    };
    report.checks.push(git);

    report
}

/// Validate the host, then warm the requested agent images. Hard
/// dependency failures abort; per-agent prebuild failures are collected
/// and reported as warnings.
pub async fn setup(
    resolver: &ImageResolver,
    options: SetupOptions,
) -> Result<SetupOutcome, MissingDependencies> {
    let report = validate_dependencies().await;
    if !report.ok() {
        let failed = report
            .checks
            .iter()
            .filter(|c| !c.ok && c.required)
            .map(|c| c.name.to_string())
            .collect();
        return Err(MissingDependencies { failed, report });
    }
    for check in report.checks.iter().filter(|c| !c.ok) {
        tracing::warn!(dependency = %check.name, "{}", check.detail);
    }

    let prebuilt = if options.skip_prebuild {
        Vec::new()
    } else {
        let agents = if options.agents.is_empty() {
            AgentKind::ALL.to_vec()
        } else {
            options.agents.clone()
        };
        resolver.prebuild_images(&agents).await
    };

    Ok(SetupOutcome { report, prebuilt })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_ok_requires_every_required_check() {
        let mut report = DependencyReport::default();
        report.checks.push(DependencyCheck {
            name: "a",
            ok: true,
            required: true,
            detail: String::new(),
            remediation: None,
        });
        assert!(report.ok());

        report.checks.push(DependencyCheck {
            name: "b",
            ok: false,
            required: true,
            detail: "gone".to_string(),
            remediation: Some("install b"),
        });
        assert!(!report.ok());
        assert_eq!(report.remediations(), vec!["install b"]);
    }

    #[test]
    fn optional_failures_are_warnings_not_errors() {
        let mut report = DependencyReport::default();
        report.checks.push(DependencyCheck {
            name: "build engine",
            ok: false,
            required: false,
            detail: "missing".to_string(),
            remediation: Some("install the docker buildx plugin"),
        });
        assert!(report.ok(), "optional checks must not fail setup");
        assert_eq!(
            report.remediations(),
            vec!["install the docker buildx plugin"],
            "but their remediation is still surfaced"
        );
    }
}
