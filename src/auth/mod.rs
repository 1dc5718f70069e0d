pub mod oauth;
pub mod pkce;
pub mod storage;
pub mod token;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

pub use oauth::{HttpTokenEndpoint, OAuthConfig, TokenEndpoint};
pub use storage::{FileStorage, MemoryStorage, TokenStorage};
pub use token::TokenRecord;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("not authenticated with {provider} -- run `vibekit auth login {provider}`")]
    NotAuthenticated { provider: String },

    #[error("token refresh failed: {reason}")]
    RefreshFailed { reason: String },

    #[error("authorization state mismatch -- restart the login flow")]
    StateMismatch,

    #[error("malformed token: {reason}")]
    MalformedToken { reason: String },

    #[error("token storage failure: {reason}")]
    Storage { reason: String },

    #[error("no OAuth endpoints known for provider '{provider}'")]
    UnknownProvider { provider: String },
}

/// An authorization-code flow in progress: the URL was presented, the
/// verifier and state wait for the callback code.
#[derive(Debug)]
pub struct AuthFlow {
    pub authorize_url: String,
    state: String,
    verifier: String,
}

/// Source for `auth import`.
pub enum ImportSource {
    Token(String),
    Refresh(String),
    Env,
    File(PathBuf),
}

/// Format for `auth export`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExportFormat {
    Env,
    Json,
    Full,
    Refresh,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "env" => Ok(ExportFormat::Env),
            "json" => Ok(ExportFormat::Json),
            "full" => Ok(ExportFormat::Full),
            "refresh" => Ok(ExportFormat::Refresh),
            other => Err(format!(
                "unknown export format '{}' (expected env, json, full, or refresh)",
                other
            )),
        }
    }
}

/// Per-provider token manager: a storage handle, a token endpoint, and a
/// refresh mutex ensuring at most one in-flight refresh.
pub struct TokenManager {
    provider: String,
    storage: Arc<dyn TokenStorage>,
    endpoint: Arc<dyn TokenEndpoint>,
    authorize_url_for: Box<dyn Fn(&str, &str) -> String + Send + Sync>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl TokenManager {
    pub fn new(
        provider: impl Into<String>,
        storage: Arc<dyn TokenStorage>,
        endpoint: Arc<dyn TokenEndpoint>,
        config: &OAuthConfig,
    ) -> Self {
        let config = config.clone();
        TokenManager {
            provider: provider.into(),
            storage,
            endpoint,
            authorize_url_for: Box::new(move |challenge, state| {
                config.authorization_url(challenge, state)
            }),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Manager with file storage and the real HTTP endpoint for a named
    /// provider.
    pub fn for_provider(provider: &str) -> Result<Self, AuthError> {
        let config = OAuthConfig::for_provider(provider).ok_or_else(|| {
            AuthError::UnknownProvider {
                provider: provider.to_string(),
            }
        })?;
        Ok(TokenManager::new(
            provider,
            Arc::new(FileStorage::for_provider(provider)),
            Arc::new(HttpTokenEndpoint::new(config.clone())),
            &config,
        ))
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Start the authorization-code flow: generate the PKCE pair and state
    /// nonce, return the URL to present.
    pub fn begin_login(&self) -> AuthFlow {
        let pair = pkce::generate_pkce();
        let state = pkce::generate_state();
        AuthFlow {
            authorize_url: (self.authorize_url_for)(&pair.challenge, &state),
            state,
            verifier: pair.verifier,
        }
    }

    /// Complete the flow with the `code#state` string from the callback
    /// page. A state mismatch aborts back to idle.
    pub async fn finish_login(
        &self,
        flow: AuthFlow,
        code_hash_state: &str,
    ) -> Result<TokenRecord, AuthError> {
        let (code, returned_state) =
            code_hash_state
                .split_once('#')
                .ok_or_else(|| AuthError::MalformedToken {
                    reason: "expected 'code#state' from the callback page".to_string(),
                })?;
        if returned_state != flow.state {
            return Err(AuthError::StateMismatch);
        }

        let record = self
            .endpoint
            .exchange_code(code, &flow.state, &flow.verifier)
            .await?;
        self.storage.save(&record)?;
        tracing::info!(provider = %self.provider, "authenticated");
        Ok(record)
    }

    /// Valid access token, refreshing when needed. Concurrent callers wait
    /// on the same refresh and observe the same result.
    pub async fn get_valid_token(&self) -> Result<Option<String>, AuthError> {
        let Some(record) = self.storage.load()? else {
            return Ok(None);
        };
        if !record.is_expired() {
            return Ok(Some(record.access_token));
        }
        if record.refresh_token.is_none() {
            return Ok(None);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while this one waited.
        let current = self.storage.load()?.unwrap_or(record);
        if !current.is_expired() {
            return Ok(Some(current.access_token));
        }
        let Some(refresh_token) = current.refresh_token.clone() else {
            return Ok(None);
        };

        tracing::debug!(provider = %self.provider, "refreshing access token");
        let mut refreshed = self.endpoint.refresh(&refresh_token).await?;
        // Providers that do not rotate refresh tokens omit them in the
        // response; keep the old one.
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = Some(refresh_token);
        }
        self.storage.save(&refreshed)?;
        Ok(Some(refreshed.access_token))
    }

    /// Exchange a bare refresh token for a fresh record and persist it.
    pub async fn refresh_to_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenRecord, AuthError> {
        let mut record = self.endpoint.refresh(refresh_token).await?;
        if record.refresh_token.is_none() {
            record.refresh_token = Some(refresh_token.to_string());
        }
        self.storage.save(&record)?;
        Ok(record)
    }

    pub async fn import(&self, source: ImportSource) -> Result<TokenRecord, AuthError> {
        match source {
            ImportSource::Token(token) => {
                let record = TokenRecord::new(token);
                self.storage.save(&record)?;
                Ok(record)
            }
            ImportSource::Refresh(refresh) => self.refresh_to_access_token(&refresh).await,
            ImportSource::Env => {
                let name = self.env_var_name();
                let token = std::env::var(&name).ok().filter(|t| !t.is_empty()).ok_or(
                    AuthError::NotAuthenticated {
                        provider: self.provider.clone(),
                    },
                )?;
                let record = TokenRecord::new(token);
                self.storage.save(&record)?;
                Ok(record)
            }
            ImportSource::File(path) => {
                let content =
                    std::fs::read_to_string(&path).map_err(|e| AuthError::Storage {
                        reason: format!("{}: {e}", path.display()),
                    })?;
                let record: TokenRecord =
                    serde_json::from_str(&content).map_err(|e| AuthError::MalformedToken {
                        reason: format!("{}: {e}", path.display()),
                    })?;
                self.storage.save(&record)?;
                Ok(record)
            }
        }
    }

    pub fn export(&self, format: ExportFormat) -> Result<String, AuthError> {
        let record = self.storage.load()?.ok_or(AuthError::NotAuthenticated {
            provider: self.provider.clone(),
        })?;

        let output = match format {
            ExportFormat::Env => {
                format!("export {}={}", self.env_var_name(), record.access_token)
            }
            ExportFormat::Json => serde_json::json!({
                "access_token": record.access_token,
                "token_type": record.token_type,
            })
            .to_string(),
            ExportFormat::Full => serde_json::to_string_pretty(&record)
                .expect("token serialization is infallible"),
            ExportFormat::Refresh => {
                record
                    .refresh_token
                    .clone()
                    .ok_or(AuthError::MalformedToken {
                        reason: "record has no refresh token".to_string(),
                    })?
            }
        };
        Ok(output)
    }

    /// Forget the stored record. Idempotent.
    pub fn logout(&self) -> Result<(), AuthError> {
        self.storage.delete()?;
        tracing::info!(provider = %self.provider, "logged out");
        Ok(())
    }

    pub fn status(&self) -> Result<Option<TokenRecord>, AuthError> {
        self.storage.load()
    }

    /// `VIBEKIT_<PROVIDER>_TOKEN`.
    fn env_var_name(&self) -> String {
        format!(
            "VIBEKIT_{}_TOKEN",
            self.provider.to_uppercase().replace('-', "_")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Endpoint double: counts refreshes and hands out sequential tokens.
    struct FakeEndpoint {
        refreshes: AtomicUsize,
        delay: Duration,
    }

    impl FakeEndpoint {
        fn new() -> Self {
            FakeEndpoint {
                refreshes: AtomicUsize::new(0),
                delay: Duration::from_millis(50),
            }
        }
    }

    #[async_trait]
    impl TokenEndpoint for FakeEndpoint {
        async fn exchange_code(
            &self,
            code: &str,
            _state: &str,
            _verifier: &str,
        ) -> Result<TokenRecord, AuthError> {
            let mut record = TokenRecord::new(format!("access-for-{code}"));
            record.refresh_token = Some("refresh-0".to_string());
            record.expires_in = Some(8 * 3600);
            Ok(record)
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<TokenRecord, AuthError> {
            tokio::time::sleep(self.delay).await;
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            let mut record = TokenRecord::new(format!("access-{n}"));
            record.refresh_token = Some(format!("refresh-{n}"));
            record.expires_in = Some(8 * 3600);
            Ok(record)
        }
    }

    fn manager_with(
        storage: Arc<dyn TokenStorage>,
        endpoint: Arc<FakeEndpoint>,
    ) -> Arc<TokenManager> {
        let config = OAuthConfig::for_provider("anthropic").unwrap();
        Arc::new(TokenManager::new("anthropic", storage, endpoint, &config))
    }

    fn expired_record() -> TokenRecord {
        TokenRecord {
            access_token: "stale".to_string(),
            refresh_token: Some("refresh-0".to_string()),
            token_type: "Bearer".to_string(),
            expires_in: Some(8 * 3600),
            scope: None,
            // Issued nine hours ago: past expiry even before the buffer.
            issued_at_ms: Utc::now().timestamp_millis() - 9 * 3600 * 1000,
        }
    }

    #[tokio::test]
    async fn valid_token_is_returned_without_refresh() {
        let endpoint = Arc::new(FakeEndpoint::new());
        let storage = Arc::new(MemoryStorage::with_record(TokenRecord::new("fresh")));
        let manager = manager_with(storage, endpoint.clone());

        let token = manager.get_valid_token().await.unwrap();
        assert_eq!(token.as_deref(), Some("fresh"));
        assert_eq!(endpoint.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_record_yields_none() {
        let manager = manager_with(
            Arc::new(MemoryStorage::default()),
            Arc::new(FakeEndpoint::new()),
        );
        assert_eq!(manager.get_valid_token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_token_without_refresh_yields_none() {
        let mut record = expired_record();
        record.refresh_token = None;
        let manager = manager_with(
            Arc::new(MemoryStorage::with_record(record)),
            Arc::new(FakeEndpoint::new()),
        );
        assert_eq!(manager.get_valid_token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_persisted() {
        let endpoint = Arc::new(FakeEndpoint::new());
        let storage = Arc::new(MemoryStorage::with_record(expired_record()));
        let manager = manager_with(storage.clone(), endpoint.clone());

        let before = expired_record().issued_at_ms;
        let token = manager.get_valid_token().await.unwrap();
        assert_eq!(token.as_deref(), Some("access-1"));
        assert_eq!(endpoint.refreshes.load(Ordering::SeqCst), 1);

        let saved = storage.load().unwrap().unwrap();
        assert!(saved.issued_at_ms > before, "new issued_at_ms is persisted");
        assert_eq!(saved.refresh_token.as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let endpoint = Arc::new(FakeEndpoint::new());
        let storage = Arc::new(MemoryStorage::with_record(expired_record()));
        let manager = manager_with(storage, endpoint.clone());

        let a = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get_valid_token().await })
        };
        let b = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get_valid_token().await })
        };

        let token_a = a.await.unwrap().unwrap().unwrap();
        let token_b = b.await.unwrap().unwrap().unwrap();
        assert_eq!(
            endpoint.refreshes.load(Ordering::SeqCst),
            1,
            "exactly one in-flight refresh"
        );
        assert_eq!(token_a, token_b, "both callers see the refreshed token");
    }

    #[tokio::test]
    async fn finish_login_rejects_state_mismatch() {
        let manager = manager_with(
            Arc::new(MemoryStorage::default()),
            Arc::new(FakeEndpoint::new()),
        );
        let flow = manager.begin_login();
        let err = manager
            .finish_login(flow, "somecode#wrong-state")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::StateMismatch));
    }

    #[tokio::test]
    async fn finish_login_exchanges_and_saves() {
        let storage = Arc::new(MemoryStorage::default());
        let manager = manager_with(storage.clone(), Arc::new(FakeEndpoint::new()));

        let flow = manager.begin_login();
        assert!(flow.authorize_url.contains("code_challenge="));
        let state = flow.state.clone();

        let record = manager
            .finish_login(flow, &format!("thecode#{state}"))
            .await
            .unwrap();
        assert_eq!(record.access_token, "access-for-thecode");
        assert_eq!(storage.load().unwrap().unwrap(), record);
    }

    #[tokio::test]
    async fn malformed_callback_is_rejected() {
        let manager = manager_with(
            Arc::new(MemoryStorage::default()),
            Arc::new(FakeEndpoint::new()),
        );
        let flow = manager.begin_login();
        let err = manager.finish_login(flow, "no-separator").await.unwrap_err();
        assert!(matches!(err, AuthError::MalformedToken { .. }));
    }

    #[tokio::test]
    async fn export_full_import_file_round_trips() {
        let storage = Arc::new(MemoryStorage::default());
        let manager = manager_with(storage.clone(), Arc::new(FakeEndpoint::new()));

        let mut record = TokenRecord::new("tok");
        record.refresh_token = Some("r".to_string());
        record.expires_in = Some(3600);
        storage.save(&record).unwrap();

        let full = manager.export(ExportFormat::Full).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exported.json");
        std::fs::write(&path, &full).unwrap();

        manager.logout().unwrap();
        let imported = manager.import(ImportSource::File(path)).await.unwrap();
        assert_eq!(imported, record, "export(full) → import(file) round-trips");
    }

    #[tokio::test]
    async fn export_refresh_requires_refresh_token() {
        let storage = Arc::new(MemoryStorage::with_record(TokenRecord::new("tok")));
        let manager = manager_with(storage, Arc::new(FakeEndpoint::new()));
        assert!(manager.export(ExportFormat::Refresh).is_err());
        assert!(manager
            .export(ExportFormat::Env)
            .unwrap()
            .starts_with("export VIBEKIT_ANTHROPIC_TOKEN="));
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let manager = manager_with(
            Arc::new(MemoryStorage::with_record(TokenRecord::new("tok"))),
            Arc::new(FakeEndpoint::new()),
        );
        manager.logout().unwrap();
        manager.logout().unwrap();
        assert!(manager.status().unwrap().is_none());
    }

    #[tokio::test]
    async fn import_token_saves_directly() {
        let manager = manager_with(
            Arc::new(MemoryStorage::default()),
            Arc::new(FakeEndpoint::new()),
        );
        let record = manager
            .import(ImportSource::Token("direct".to_string()))
            .await
            .unwrap();
        assert_eq!(record.access_token, "direct");
        assert_eq!(manager.status().unwrap().unwrap().access_token, "direct");
    }
}
