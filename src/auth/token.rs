use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Tokens are refreshed this long before their nominal expiry.
pub const REFRESH_BUFFER_SECS: u64 = 3600;

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// One provider's access/refresh token pair, persisted as a private JSON
/// file under the vibekit home.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Lifetime in seconds; absent means the token never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub issued_at_ms: i64,
}

impl TokenRecord {
    pub fn new(access_token: impl Into<String>) -> Self {
        TokenRecord {
            access_token: access_token.into(),
            refresh_token: None,
            token_type: default_token_type(),
            expires_in: None,
            scope: None,
            issued_at_ms: Utc::now().timestamp_millis(),
        }
    }

    /// Expired means past `expires_in` minus the refresh buffer, so a
    /// refresh happens before the token actually stops working.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        let Some(expires_in) = self.expires_in else {
            return false;
        };
        let usable_secs = expires_in.saturating_sub(REFRESH_BUFFER_SECS);
        now_ms.saturating_sub(self.issued_at_ms) >= (usable_secs as i64) * 1000
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp_millis())
    }
}
