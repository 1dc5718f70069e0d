use std::path::PathBuf;
use std::sync::Mutex;

use crate::auth::token::TokenRecord;
use crate::auth::AuthError;

/// Where a provider's token record lives. Chosen at manager construction.
pub trait TokenStorage: Send + Sync {
    fn load(&self) -> Result<Option<TokenRecord>, AuthError>;
    fn save(&self, record: &TokenRecord) -> Result<(), AuthError>;
    fn delete(&self) -> Result<(), AuthError>;
}

/// Process-local storage; used by tests and one-off flows.
#[derive(Default)]
pub struct MemoryStorage {
    slot: Mutex<Option<TokenRecord>>,
}

impl MemoryStorage {
    pub fn with_record(record: TokenRecord) -> Self {
        MemoryStorage {
            slot: Mutex::new(Some(record)),
        }
    }
}

impl TokenStorage for MemoryStorage {
    fn load(&self) -> Result<Option<TokenRecord>, AuthError> {
        Ok(self.slot.lock().expect("token slot poisoned").clone())
    }

    fn save(&self, record: &TokenRecord) -> Result<(), AuthError> {
        *self.slot.lock().expect("token slot poisoned") = Some(record.clone());
        Ok(())
    }

    fn delete(&self) -> Result<(), AuthError> {
        *self.slot.lock().expect("token slot poisoned") = None;
        Ok(())
    }
}

/// Private per-provider file under `~/.vibekit/tokens/`, written
/// atomically with owner-only permissions.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStorage { path: path.into() }
    }

    /// Conventional location for a provider's token file.
    pub fn for_provider(provider: &str) -> Self {
        let path = crate::config::vibekit_home()
            .join("tokens")
            .join(format!("{provider}.json"));
        FileStorage { path }
    }

    fn storage_error(&self, e: impl ToString) -> AuthError {
        AuthError::Storage {
            reason: format!("{}: {}", self.path.display(), e.to_string()),
        }
    }
}

impl TokenStorage for FileStorage {
    fn load(&self) -> Result<Option<TokenRecord>, AuthError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.storage_error(e)),
        };
        let record = serde_json::from_str(&content).map_err(|e| AuthError::MalformedToken {
            reason: format!("{}: {}", self.path.display(), e),
        })?;
        Ok(Some(record))
    }

    fn save(&self, record: &TokenRecord) -> Result<(), AuthError> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| self.storage_error("token path has no parent directory"))?;
        std::fs::create_dir_all(dir).map_err(|e| self.storage_error(e))?;

        let content =
            serde_json::to_string_pretty(record).expect("token serialization is infallible");
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &content).map_err(|e| self.storage_error(e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| self.storage_error(e))?;
        }
        std::fs::rename(&tmp, &self.path).map_err(|e| self.storage_error(e))?;
        Ok(())
    }

    fn delete(&self) -> Result<(), AuthError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.storage_error(e)),
        }
    }
}
