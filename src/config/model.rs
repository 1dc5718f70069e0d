use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::agent::AgentKind;
use crate::registry::RegistryKind;

fn default_true() -> bool {
    true
}

/// User-level preferences, persisted whole as `~/.vibekit/config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VibekitConfig {
    #[serde(default)]
    pub registry_kind: RegistryKind,
    #[serde(default)]
    pub registry_user: Option<String>,
    /// Prefer pulling prebuilt agent images over building locally.
    #[serde(default = "default_true")]
    pub prefer_registry_images: bool,
    /// Push locally-built agent images back to the registry.
    #[serde(default = "default_true")]
    pub push_images: bool,
    #[serde(default)]
    pub private_registry: Option<String>,
    /// Full image references that bypass name synthesis entirely.
    #[serde(default)]
    pub per_agent_overrides: BTreeMap<AgentKind, String>,
    #[serde(default)]
    pub last_build_at: Option<DateTime<Utc>>,
    /// Fields written by other vibekit versions survive a load/save cycle.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for VibekitConfig {
    fn default() -> Self {
        VibekitConfig {
            registry_kind: RegistryKind::default(),
            registry_user: None,
            prefer_registry_images: true,
            push_images: true,
            private_registry: None,
            per_agent_overrides: BTreeMap::new(),
            last_build_at: None,
            extra: BTreeMap::new(),
        }
    }
}
