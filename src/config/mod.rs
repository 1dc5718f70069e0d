pub mod model;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::agent::AgentKind;
use model::VibekitConfig;

// Whole-document writes are serialized process-wide; each write lands via
// tmp-file + rename so readers never observe a partial document.
static WRITE_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("writing config {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("config {path} is not valid JSON: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Store for the user-level config document under the vibekit home
/// directory (`$VIBEKIT_HOME` or `~/.vibekit`).
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        ConfigStore { dir: dir.into() }
    }

    /// Store rooted at the user's vibekit home.
    pub fn default_location() -> Self {
        ConfigStore::new(vibekit_home())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join("config.json")
    }

    /// Load the config document; a missing file yields defaults.
    pub fn load(&self) -> Result<VibekitConfig, ConfigError> {
        let path = self.path();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(VibekitConfig::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        };
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Rewrite the whole document atomically (tmp file + rename).
    pub fn save(&self, config: &VibekitConfig) -> Result<(), ConfigError> {
        let _guard = WRITE_LOCK.lock().expect("config write lock poisoned");
        let path = self.path();
        let write_err = |e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        };

        std::fs::create_dir_all(&self.dir).map_err(write_err)?;
        let content =
            serde_json::to_string_pretty(config).expect("config serialization is infallible");
        let tmp_path = self.dir.join("config.json.tmp");
        std::fs::write(&tmp_path, &content).map_err(write_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600));
        }
        std::fs::rename(&tmp_path, &path).map_err(write_err)?;
        Ok(())
    }

    /// Load, apply a partial update, save. Writers are serialized.
    pub fn update(
        &self,
        apply: impl FnOnce(&mut VibekitConfig),
    ) -> Result<VibekitConfig, ConfigError> {
        let mut config = self.load()?;
        apply(&mut config);
        self.save(&config)?;
        Ok(config)
    }

    pub fn agent_override(&self, kind: AgentKind) -> Result<Option<String>, ConfigError> {
        Ok(self.load()?.per_agent_overrides.get(&kind).cloned())
    }

    pub fn set_agent_override(
        &self,
        kind: AgentKind,
        reference: Option<String>,
    ) -> Result<(), ConfigError> {
        self.update(|config| {
            match reference {
                Some(reference) => {
                    config.per_agent_overrides.insert(kind, reference);
                }
                None => {
                    config.per_agent_overrides.remove(&kind);
                }
            };
        })?;
        Ok(())
    }

    /// Remove the config document. Missing files are fine.
    pub fn delete(&self) -> Result<(), ConfigError> {
        let path = self.path();
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ConfigError::Write {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }
}

/// Root directory for all persisted vibekit state.
pub fn vibekit_home() -> PathBuf {
    if let Ok(dir) = std::env::var("VIBEKIT_HOME") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vibekit")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryKind;

    fn store() -> (tempfile::TempDir, ConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn missing_file_loads_defaults() {
        let (_dir, store) = store();
        let config = store.load().unwrap();
        assert_eq!(config, VibekitConfig::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let (_dir, store) = store();
        let mut config = VibekitConfig::default();
        config.registry_kind = RegistryKind::Aws;
        config.registry_user = Some("alice".to_string());
        config.prefer_registry_images = false;

        store.save(&config).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, config, "save/load must round-trip the document");
    }

    #[test]
    fn update_is_read_modify_write() {
        let (_dir, store) = store();
        store
            .update(|c| c.registry_user = Some("bob".to_string()))
            .unwrap();
        store.update(|c| c.push_images = false).unwrap();

        let config = store.load().unwrap();
        assert_eq!(config.registry_user.as_deref(), Some("bob"));
        assert!(!config.push_images, "second update must keep the first");
    }

    #[test]
    fn agent_override_set_get_clear() {
        let (_dir, store) = store();
        store
            .set_agent_override(AgentKind::Grok, Some("ghcr.io/x/y:1".to_string()))
            .unwrap();
        assert_eq!(
            store.agent_override(AgentKind::Grok).unwrap().as_deref(),
            Some("ghcr.io/x/y:1")
        );

        store.set_agent_override(AgentKind::Grok, None).unwrap();
        assert_eq!(store.agent_override(AgentKind::Grok).unwrap(), None);
    }

    #[test]
    fn delete_is_idempotent() {
        let (_dir, store) = store();
        store.save(&VibekitConfig::default()).unwrap();
        store.delete().unwrap();
        store.delete().unwrap();
        assert_eq!(store.load().unwrap(), VibekitConfig::default());
    }

    #[test]
    fn no_tmp_file_left_behind() {
        let (dir, store) = store();
        store.save(&VibekitConfig::default()).unwrap();
        assert!(
            !dir.path().join("config.json.tmp").exists(),
            "atomic write must clean up the tmp file"
        );
    }
}
