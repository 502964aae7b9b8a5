use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use gravgate_common::GatewayError;
use gravgate_core::engine::{self, AuthOutcome, DialectResponse};
use gravgate_core::{GatewayState, models};
use gravgate_protocol::claude::request::MessagesRequest;
use gravgate_protocol::openai::request::ChatCompletionRequest;

#[derive(Clone)]
struct RouterState {
    gateway: Arc<GatewayState>,
}

pub fn gateway_router(gateway: Arc<GatewayState>) -> Router {
    let max_body = gateway.config.security.max_request_size;
    let state = RouterState { gateway };

    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/chat/completions/count_tokens", post(count_tokens_openai))
        .route("/v1/models", get(list_models))
        .route("/anthropic/v1/messages", post(claude_messages))
        .route(
            "/anthropic/v1/messages/count_tokens",
            post(count_tokens_claude),
        )
        .layer(DefaultBodyLimit::max(max_body))
        .with_state(state)
}

async fn chat_completions(
    State(state): State<RouterState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let auth = match engine::authorize(&state.gateway, &headers).await {
        Ok(auth) => auth,
        Err(error) => return error_response(&error),
    };
    let request: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return error_response(&GatewayError::InvalidRequest(format!(
                "malformed request body: {err}"
            )));
        }
    };

    let response = match engine::chat_completions(state.gateway.clone(), &auth, request).await {
        Ok(response) => response,
        Err(error) => {
            warn!(event = "chat.error", error = %error);
            return with_rate_headers(error_response(&error), &auth);
        }
    };
    with_rate_headers(dialect_response(response), &auth)
}

async fn claude_messages(
    State(state): State<RouterState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let auth = match engine::authorize(&state.gateway, &headers).await {
        Ok(auth) => auth,
        Err(error) => return error_response(&error),
    };
    let request: MessagesRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return error_response(&GatewayError::InvalidRequest(format!(
                "malformed request body: {err}"
            )));
        }
    };

    let response = match engine::messages(state.gateway.clone(), &auth, request).await {
        Ok(response) => response,
        Err(error) => {
            warn!(event = "messages.error", error = %error);
            return with_rate_headers(error_response(&error), &auth);
        }
    };
    with_rate_headers(dialect_response(response), &auth)
}

async fn count_tokens_openai(
    State(state): State<RouterState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let auth = match engine::authorize(&state.gateway, &headers).await {
        Ok(auth) => auth,
        Err(error) => return error_response(&error),
    };
    let request: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return error_response(&GatewayError::InvalidRequest(format!(
                "malformed request body: {err}"
            )));
        }
    };
    let counted = engine::count_tokens_openai(&request);
    with_rate_headers(json_response(StatusCode::OK, &counted), &auth)
}

async fn count_tokens_claude(
    State(state): State<RouterState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let auth = match engine::authorize(&state.gateway, &headers).await {
        Ok(auth) => auth,
        Err(error) => return error_response(&error),
    };
    let request: MessagesRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return error_response(&GatewayError::InvalidRequest(format!(
                "malformed request body: {err}"
            )));
        }
    };
    let counted = engine::count_tokens_claude(&request);
    with_rate_headers(json_response(StatusCode::OK, &counted), &auth)
}

async fn list_models(State(state): State<RouterState>, headers: HeaderMap) -> Response {
    let auth = match engine::authorize(&state.gateway, &headers).await {
        Ok(auth) => auth,
        Err(error) => return error_response(&error),
    };
    match models::list_models(&state.gateway).await {
        Ok(list) => with_rate_headers(json_response(StatusCode::OK, &list), &auth),
        Err(error) => {
            warn!(event = "models.error", error = %error);
            with_rate_headers(error_response(&error), &auth)
        }
    }
}

fn dialect_response(response: DialectResponse) -> Response {
    match response {
        DialectResponse::Json(body) => json_response(StatusCode::OK, &body),
        DialectResponse::Sse(rx) => {
            let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/event-stream")
                .header(header::CACHE_CONTROL, "no-cache")
                .header(header::CONNECTION, "keep-alive")
                .body(Body::from_stream(stream))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

fn json_response<T: serde::Serialize>(status: StatusCode, body: &T) -> Response {
    let payload = serde_json::to_vec(body).unwrap_or_default();
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn with_rate_headers(mut response: Response, auth: &AuthOutcome) -> Response {
    let headers = response.headers_mut();
    if let Some(limit) = auth.limit
        && let Ok(value) = HeaderValue::from_str(&limit.to_string())
    {
        headers.insert("X-RateLimit-Limit", value);
    }
    if let Some(remaining) = auth.remaining
        && let Ok(value) = HeaderValue::from_str(&remaining.to_string())
    {
        headers.insert("X-RateLimit-Remaining", value);
    }
    response
}

fn error_response(error: &GatewayError) -> Response {
    let status = error.status();

    if let GatewayError::RateLimited { reset_in_seconds } = error {
        let mut response = json_response(
            status,
            &json!({
                "error": {
                    "message": error.to_string(),
                    "type": "rate_limit_exceeded",
                    "reset_in_seconds": reset_in_seconds,
                }
            }),
        );
        if let Ok(value) = HeaderValue::from_str(&reset_in_seconds.to_string()) {
            response.headers_mut().insert("X-RateLimit-Reset", value);
        }
        return response;
    }

    json_response(
        status,
        &json!({
            "error": {
                "message": error.to_string(),
                "type": error_type(error),
            }
        }),
    )
}

fn error_type(error: &GatewayError) -> &'static str {
    match error {
        GatewayError::NoCredentials => "no_credentials",
        GatewayError::CredentialRefreshFailed { .. } => "credential_refresh_failed",
        GatewayError::CredentialForbidden => "account_disabled",
        GatewayError::UpstreamStatus { .. } => "upstream_error",
        GatewayError::UpstreamInterrupted(_) => "upstream_interrupted",
        GatewayError::InvalidRequest(_) => "invalid_request_error",
        GatewayError::Unauthorized => "unauthorized",
        GatewayError::RateLimited { .. } => "rate_limit_exceeded",
        GatewayError::EntityTooLarge => "entity_too_large",
        GatewayError::ToolSchemaInvalid(_) => "invalid_request_error",
        GatewayError::ToolArgsParse(_) => "invalid_request_error",
        GatewayError::Storage(_) => "api_error",
        GatewayError::Transport(_) => "api_error",
    }
}
