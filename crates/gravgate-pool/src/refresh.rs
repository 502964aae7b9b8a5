use std::time::Duration;

use serde::Deserialize;

/// Tokens handed back by the identity provider's token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    /// The provider answered with a non-2xx status. 403 is terminal for the
    /// credential; anything else is transient.
    #[error("token endpoint returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("token endpoint unreachable: {0}")]
    Transport(String),
    #[error("token endpoint response malformed: {0}")]
    Decode(String),
}

impl RefreshError {
    pub fn is_forbidden(&self) -> bool {
        matches!(self, RefreshError::Http { status: 403, .. })
    }
}

/// Interface to the identity provider. The pool only ever refreshes; the
/// code exchange exists for the admin OAuth callback collaborator.
#[async_trait::async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, RefreshError>;

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, RefreshError>;
}

pub struct WreqTokenRefresher {
    client: wreq::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl WreqTokenRefresher {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, RefreshError> {
        let client = wreq::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| RefreshError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        })
    }

    async fn post_form(&self, form: &[(&str, &str)]) -> Result<TokenGrant, RefreshError> {
        let response = self
            .client
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(|err| RefreshError::Transport(err.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| RefreshError::Transport(err.to_string()))?;
        if !status.is_success() {
            return Err(RefreshError::Http {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        serde_json::from_slice(&body).map_err(|err| RefreshError::Decode(err.to_string()))
    }
}

#[async_trait::async_trait]
impl TokenRefresher for WreqTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, RefreshError> {
        self.post_form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ])
        .await
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, RefreshError> {
        self.post_form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }
}
