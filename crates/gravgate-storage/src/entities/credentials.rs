use serde::{Deserialize, Serialize};

/// 5-minute expiry skew: a token is refreshed this long before it would
/// actually lapse upstream.
pub const REFRESH_SKEW_MS: i64 = 300_000;

/// One OAuth2 credential as persisted in `accounts.json`. The refresh token
/// is the identity of the record; it is unique within the pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime in seconds, as reported by the identity provider.
    pub expires_in: i64,
    pub issued_at_ms: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl CredentialRecord {
    pub fn expires_at_ms(&self) -> i64 {
        self.issued_at_ms + self.expires_in * 1000
    }

    /// True when the token is inside the refresh window.
    pub fn needs_refresh(&self, now_ms: i64) -> bool {
        now_ms + REFRESH_SKEW_MS >= self.expires_at_ms()
    }
}
