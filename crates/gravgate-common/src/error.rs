use http::StatusCode;

/// Gateway-wide error taxonomy. Every failure a handler can surface to a
/// client maps onto one of these kinds; pool-internal rotation errors stay
/// inside the pool and only `NoCredentials` escapes it.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("no enabled credential could produce a valid token")]
    NoCredentials,
    #[error("credential refresh failed with status {status}: {message}")]
    CredentialRefreshFailed { status: u16, message: String },
    #[error("credential rejected by the identity provider or upstream (403)")]
    CredentialForbidden,
    #[error("upstream returned {status}: {body_snippet}")]
    UpstreamStatus { status: u16, body_snippet: String },
    #[error("upstream stream interrupted: {0}")]
    UpstreamInterrupted(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("missing or invalid API key")]
    Unauthorized,
    #[error("rate limit exceeded, retry in {reset_in_seconds}s")]
    RateLimited { reset_in_seconds: u64 },
    #[error("request body exceeds the configured limit")]
    EntityTooLarge,
    #[error("invalid tool schema: {0}")]
    ToolSchemaInvalid(String),
    #[error("tool call arguments are not valid JSON: {0}")]
    ToolArgsParse(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NoCredentials => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::CredentialRefreshFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::CredentialForbidden => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::UpstreamStatus { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            GatewayError::UpstreamInterrupted(_) => StatusCode::BAD_GATEWAY,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::EntityTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::ToolSchemaInvalid(_) => StatusCode::BAD_REQUEST,
            GatewayError::ToolArgsParse(_) => StatusCode::BAD_REQUEST,
            GatewayError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Transport(_) => StatusCode::BAD_GATEWAY,
        }
    }
}
