use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// The five coding-agent identities vibekit can run. Each kind selects a
/// Dockerfile under `assets/dockerfiles/`, a default local image tag, and a
/// registry repository name.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Claude,
    Codex,
    Opencode,
    Gemini,
    Grok,
}

impl AgentKind {
    pub const ALL: [AgentKind; 5] = [
        AgentKind::Claude,
        AgentKind::Codex,
        AgentKind::Opencode,
        AgentKind::Gemini,
        AgentKind::Grok,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            AgentKind::Claude => "claude",
            AgentKind::Codex => "codex",
            AgentKind::Opencode => "opencode",
            AgentKind::Gemini => "gemini",
            AgentKind::Grok => "grok",
        }
    }

    /// Repository name under any registry namespace: `vibekit-<agent>`.
    pub fn repository(&self) -> String {
        format!("vibekit-{}", self.slug())
    }

    /// Default local image tag: `vibekit-<agent>:latest`.
    pub fn local_tag(&self) -> String {
        format!("vibekit-{}:latest", self.slug())
    }

    /// Dockerfile filename under the dockerfiles root.
    pub fn dockerfile_name(&self) -> String {
        format!("Dockerfile.{}", self.slug())
    }
}

impl Display for AgentKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "claude" => Ok(AgentKind::Claude),
            "codex" => Ok(AgentKind::Codex),
            "opencode" => Ok(AgentKind::Opencode),
            "gemini" => Ok(AgentKind::Gemini),
            "grok" => Ok(AgentKind::Grok),
            other => Err(format!(
                "unknown agent '{}' (expected one of: claude, codex, opencode, gemini, grok)",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_round_trips_through_from_str() {
        for kind in AgentKind::ALL {
            let parsed: AgentKind = kind.slug().parse().unwrap();
            assert_eq!(parsed, kind, "slug must parse back to the same kind");
        }
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("Claude".parse::<AgentKind>().unwrap(), AgentKind::Claude);
        assert_eq!("GROK".parse::<AgentKind>().unwrap(), AgentKind::Grok);
    }

    #[test]
    fn unknown_agent_is_rejected_with_candidates() {
        let err = "cursor".parse::<AgentKind>().unwrap_err();
        assert!(err.contains("cursor"));
        assert!(err.contains("claude"), "error should list valid agents");
    }

    #[test]
    fn repository_uses_vibekit_prefix() {
        assert_eq!(AgentKind::Codex.repository(), "vibekit-codex");
        assert_eq!(AgentKind::Gemini.local_tag(), "vibekit-gemini:latest");
    }
}
