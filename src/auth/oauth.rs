use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use crate::auth::token::TokenRecord;
use crate::auth::AuthError;

/// OAuth endpoints and client identity for one provider.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub provider: String,
    pub client_id: String,
    pub authorize_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

impl OAuthConfig {
    /// Built-in endpoints for known providers, overridable through
    /// `VIBEKIT_OAUTH_*` for anything else.
    pub fn for_provider(provider: &str) -> Option<OAuthConfig> {
        match provider {
            "anthropic" => Some(OAuthConfig {
                provider: provider.to_string(),
                client_id: "9d1c250a-e61b-44d9-88ed-5944d1962f5e".to_string(),
                authorize_url: "https://claude.ai/oauth/authorize".to_string(),
                token_url: "https://console.anthropic.com/v1/oauth/token".to_string(),
                redirect_uri: "https://console.anthropic.com/oauth/code/callback".to_string(),
                scopes: vec![
                    "org:create_api_key".to_string(),
                    "user:profile".to_string(),
                    "user:inference".to_string(),
                ],
            }),
            _ => Self::from_env(provider),
        }
    }

    fn from_env(provider: &str) -> Option<OAuthConfig> {
        let get = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Some(OAuthConfig {
            provider: provider.to_string(),
            client_id: get("VIBEKIT_OAUTH_CLIENT_ID")?,
            authorize_url: get("VIBEKIT_OAUTH_AUTHORIZE_URL")?,
            token_url: get("VIBEKIT_OAUTH_TOKEN_URL")?,
            redirect_uri: get("VIBEKIT_OAUTH_REDIRECT_URI")
                .unwrap_or_else(|| "http://localhost:54545/callback".to_string()),
            scopes: get("VIBEKIT_OAUTH_SCOPES")
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        })
    }

    /// Authorization URL presented to the user, carrying the PKCE
    /// challenge and state nonce.
    pub fn authorization_url(&self, challenge: &str, state: &str) -> String {
        let mut url = format!(
            "{}?code=true&client_id={}&response_type=code&redirect_uri={}&code_challenge={}&code_challenge_method=S256&state={}",
            self.authorize_url,
            self.client_id,
            urlencode(&self.redirect_uri),
            challenge,
            state,
        );
        if !self.scopes.is_empty() {
            url.push_str("&scope=");
            url.push_str(&urlencode(&self.scopes.join(" ")));
        }
        url
    }
}

fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

/// The token endpoint of the provider: code exchange and refresh. Behind a
/// trait so the refresh machinery is testable without the network.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn exchange_code(
        &self,
        code: &str,
        state: &str,
        verifier: &str,
    ) -> Result<TokenRecord, AuthError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenRecord, AuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_record(self) -> TokenRecord {
        TokenRecord {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_in: self.expires_in,
            scope: self.scope,
            issued_at_ms: Utc::now().timestamp_millis(),
        }
    }
}

/// Real HTTP client against the provider's token endpoint.
pub struct HttpTokenEndpoint {
    config: OAuthConfig,
    client: reqwest::Client,
}

impl HttpTokenEndpoint {
    pub fn new(config: OAuthConfig) -> Self {
        HttpTokenEndpoint {
            config,
            client: reqwest::Client::new(),
        }
    }

    async fn post_token(
        &self,
        body: serde_json::Value,
        failure: fn(String) -> AuthError,
    ) -> Result<TokenRecord, AuthError> {
        let response = self
            .client
            .post(&self.config.token_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| failure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(failure(format!("{status}: {}", text.trim())));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::MalformedToken {
                reason: format!("token endpoint response: {e}"),
            })?;
        Ok(parsed.into_record())
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn exchange_code(
        &self,
        code: &str,
        state: &str,
        verifier: &str,
    ) -> Result<TokenRecord, AuthError> {
        let body = serde_json::json!({
            "grant_type": "authorization_code",
            "code": code,
            "state": state,
            "client_id": self.config.client_id,
            "redirect_uri": self.config.redirect_uri,
            "code_verifier": verifier,
        });
        self.post_token(body, |reason| AuthError::RefreshFailed { reason })
            .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenRecord, AuthError> {
        let body = serde_json::json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
            "client_id": self.config.client_id,
        });
        self.post_token(body, |reason| AuthError::RefreshFailed { reason })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_provider_has_builtin_config() {
        let config = OAuthConfig::for_provider("anthropic").unwrap();
        assert!(config.token_url.starts_with("https://"));
        assert!(!config.client_id.is_empty());
    }

    #[test]
    fn unknown_provider_without_env_is_none() {
        // No VIBEKIT_OAUTH_* in the test environment.
        assert!(OAuthConfig::for_provider("does-not-exist").is_none());
    }

    #[test]
    fn authorization_url_carries_pkce_and_state() {
        let config = OAuthConfig::for_provider("anthropic").unwrap();
        let url = config.authorization_url("CHALLENGE123", "STATE456");
        assert!(url.contains("code_challenge=CHALLENGE123"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("state=STATE456"));
        assert!(url.contains("response_type=code"));
    }

    #[test]
    fn urlencode_escapes_reserved_characters() {
        assert_eq!(urlencode("a b/c"), "a%20b%2Fc");
        assert_eq!(urlencode("safe-._~"), "safe-._~");
    }

    #[test]
    fn token_response_defaults_token_type() {
        let parsed: TokenResponse =
            serde_json::from_str(r#"{"access_token": "t", "expires_in": 3600}"#).unwrap();
        let record = parsed.into_record();
        assert_eq!(record.token_type, "Bearer");
        assert_eq!(record.expires_in, Some(3600));
        assert!(record.issued_at_ms > 0);
    }
}
