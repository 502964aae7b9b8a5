use std::sync::Arc;

use bytes::Bytes;
use http::HeaderMap;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use gravgate_common::GatewayError;
use gravgate_protocol::claude;
use gravgate_protocol::claude::request::MessagesRequest;
use gravgate_protocol::claude::stream::{ErrorDetail, MessagesStreamEvent};
use gravgate_protocol::claude::types::MessagesUsage;
use gravgate_protocol::openai;
use gravgate_protocol::openai::request::ChatCompletionRequest;
use gravgate_protocol::openai::types::{MessageContent, Usage};
use gravgate_protocol::sse::DataLineParser;
use gravgate_transform::envelope::{self, EnvelopeParts};
use gravgate_transform::event::{StreamEvent, ThinkingPhase};
use gravgate_transform::genconfig::{self, GenerationParams};
use gravgate_transform::generate::{claude2upstream, openai2upstream};
use gravgate_transform::stream::reader::UpstreamReader;
use gravgate_transform::stream::upstream2claude::{self, ClaudeStreamFramer};
use gravgate_transform::stream::upstream2openai::{self, OpenAiStreamFramer};
use gravgate_transform::tools;

use crate::state::GatewayState;
use crate::tokens;
use crate::upstream::{UpstreamBody, UpstreamHttpRequest};

const DEFAULT_MODEL: &str = "gemini-2.5-pro";
/// Single messages shorter than this downgrade to non-streaming when the
/// client left `stream` unset. Upstream health probes depend on it.
const STREAM_DOWNGRADE_MAX_CHARS: usize = 20;
const SSE_DONE: &[u8] = b"data: [DONE]\n\n";
const STREAM_ERROR_PREFIX: &str = "错误: ";
/// Back-pressure bound between the re-framer and the client socket.
const SSE_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub api_key: String,
    pub admin: bool,
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
}

/// What a handler hands back to the HTTP layer.
pub enum DialectResponse {
    Json(serde_json::Value),
    /// Pre-framed SSE bytes; the channel bound provides back-pressure.
    Sse(mpsc::Receiver<Bytes>),
}

pub async fn authorize(
    state: &GatewayState,
    headers: &HeaderMap,
) -> Result<AuthOutcome, GatewayError> {
    let key = crate::auth::extract_api_key(headers).ok_or(GatewayError::Unauthorized)?;

    let admin_key = &state.config.security.api_key;
    if !admin_key.is_empty() && key == *admin_key {
        return Ok(AuthOutcome {
            api_key: key,
            admin: true,
            limit: None,
            remaining: None,
        });
    }

    if !state.keys.validate(&key).await {
        return Err(GatewayError::Unauthorized);
    }
    let decision = state.keys.check_rate_limit(&key).await;
    if !decision.allowed {
        return Err(GatewayError::RateLimited {
            reset_in_seconds: decision.reset_in_s.unwrap_or(0),
        });
    }
    Ok(AuthOutcome {
        api_key: key,
        admin: false,
        limit: decision.limit,
        remaining: decision.remaining,
    })
}

// ---- OpenAI dialect ----

pub async fn chat_completions(
    state: Arc<GatewayState>,
    auth: &AuthOutcome,
    request: ChatCompletionRequest,
) -> Result<DialectResponse, GatewayError> {
    if request.messages.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "messages is required".to_string(),
        ));
    }

    let model = request
        .model
        .clone()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let stream = resolve_streaming(request.stream, single_message_chars_openai(&request));

    let upstream_tools = tools::from_openai(request.tools.as_deref().unwrap_or_default())?;
    let contents = openai2upstream::convert_messages(&request.messages);
    let generation_config = genconfig::build(
        &model,
        &GenerationParams {
            temperature: request.temperature,
            top_p: request.top_p,
            top_k: request.top_k,
            max_tokens: request.max_tokens,
        },
        &state.config.defaults,
    );

    let prompt_tokens = tokens::count_openai_messages(&request.messages)
        + tokens::count_openai_tool_schemas(request.tools.as_deref());

    let (project_id, session_id) = state.identity.get(&auth.api_key).await;
    let envelope = envelope::build(EnvelopeParts {
        wire_model: genconfig::wire_model_name(&model),
        project_id,
        session_id,
        user_agent: state.config.api.user_agent.clone(),
        config_instruction: state.config.system_instruction.clone(),
        system_text: None,
        contents,
        tools: upstream_tools,
        generation_config,
    });

    debug!(event = "chat.request", model = %model, stream, prompt_tokens);
    let upstream_rx = open_stream(&state, &envelope).await?;

    let chat_id = format!("chatcmpl-{}", Uuid::new_v4().simple());
    let created = OffsetDateTime::now_utc().unix_timestamp();

    if stream {
        let framer = OpenAiStreamFramer::new(chat_id, model, created);
        let (tx, rx) = mpsc::channel::<Bytes>(SSE_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            run_openai_stream(upstream_rx, framer, tx, prompt_tokens).await;
        });
        return Ok(DialectResponse::Sse(rx));
    }

    let (events, output_chars) = collect_events(upstream_rx).await?;
    let usage = usage_from(prompt_tokens, output_chars);
    let completion = upstream2openai::build_completion(chat_id, model, created, &events, usage);
    Ok(DialectResponse::Json(to_json(&completion)?))
}

async fn run_openai_stream(
    mut upstream_rx: mpsc::Receiver<Result<Bytes, String>>,
    mut framer: OpenAiStreamFramer,
    tx: mpsc::Sender<Bytes>,
    prompt_tokens: u32,
) {
    let mut parser = DataLineParser::new();
    let mut reader = UpstreamReader::new();
    let mut output_chars: u64 = 0;

    while let Some(item) = upstream_rx.recv().await {
        match item {
            Ok(bytes) => {
                for payload in parser.push_bytes(&bytes) {
                    let events = reader.push_payload(&payload);
                    if !forward_openai(&mut framer, events, &tx, &mut output_chars).await {
                        return;
                    }
                }
            }
            Err(message) => {
                let error_chunks = framer.push_event(StreamEvent::Text {
                    delta: format!("{STREAM_ERROR_PREFIX}{message}"),
                });
                for chunk in error_chunks {
                    if tx.send(sse_json(&chunk)).await.is_err() {
                        return;
                    }
                }
                let _ = tx.send(Bytes::from_static(SSE_DONE)).await;
                return;
            }
        }
    }

    for payload in parser.finish() {
        let events = reader.push_payload(&payload);
        if !forward_openai(&mut framer, events, &tx, &mut output_chars).await {
            return;
        }
    }
    let events = reader.finish();
    if !forward_openai(&mut framer, events, &tx, &mut output_chars).await {
        return;
    }

    let usage = usage_from(prompt_tokens, output_chars);
    for chunk in framer.finish(usage) {
        if tx.send(sse_json(&chunk)).await.is_err() {
            return;
        }
    }
    let _ = tx.send(Bytes::from_static(SSE_DONE)).await;
}

async fn forward_openai(
    framer: &mut OpenAiStreamFramer,
    events: Vec<StreamEvent>,
    tx: &mpsc::Sender<Bytes>,
    output_chars: &mut u64,
) -> bool {
    for event in events {
        track_output_chars(&event, output_chars);
        for chunk in framer.push_event(event) {
            if tx.send(sse_json(&chunk)).await.is_err() {
                return false;
            }
        }
    }
    true
}

// ---- Anthropic dialect ----

pub async fn messages(
    state: Arc<GatewayState>,
    auth: &AuthOutcome,
    request: MessagesRequest,
) -> Result<DialectResponse, GatewayError> {
    if request.messages.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "messages is required".to_string(),
        ));
    }
    let model = request
        .model
        .clone()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| GatewayError::InvalidRequest("model is required".to_string()))?;

    let stream = resolve_streaming(request.stream, single_message_chars_claude(&request));

    let upstream_tools = tools::from_claude(request.tools.as_deref().unwrap_or_default())?;
    let converted = claude2upstream::convert_request(&request);
    let generation_config = genconfig::build(
        &model,
        &GenerationParams {
            temperature: request.temperature,
            top_p: request.top_p,
            top_k: request.top_k,
            max_tokens: request.max_tokens,
        },
        &state.config.defaults,
    );

    let prompt_tokens = tokens::count_claude_request(&request)
        + tokens::count_claude_tool_schemas(request.tools.as_deref());
    let stop_sequences = request.stop_sequences.clone().unwrap_or_default();
    let max_tokens = request.max_tokens;

    let (project_id, session_id) = state.identity.get(&auth.api_key).await;
    let envelope = envelope::build(EnvelopeParts {
        wire_model: genconfig::wire_model_name(&model),
        project_id,
        session_id,
        user_agent: state.config.api.user_agent.clone(),
        config_instruction: state.config.system_instruction.clone(),
        system_text: converted.system_text,
        contents: converted.contents,
        tools: upstream_tools,
        generation_config,
    });

    debug!(event = "messages.request", model = %model, stream, prompt_tokens);
    let upstream_rx = open_stream(&state, &envelope).await?;

    let message_id = format!("msg_{}", Uuid::new_v4().simple());

    if stream {
        let framer = ClaudeStreamFramer::new(
            message_id,
            model,
            stop_sequences,
            max_tokens,
        );
        let (tx, rx) = mpsc::channel::<Bytes>(SSE_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            run_claude_stream(upstream_rx, framer, tx, prompt_tokens).await;
        });
        return Ok(DialectResponse::Sse(rx));
    }

    let (events, output_chars) = collect_events(upstream_rx).await?;
    let output_tokens = tokens_from_chars(output_chars);
    let message = upstream2claude::build_message(
        message_id,
        model,
        &events,
        &stop_sequences,
        max_tokens,
        MessagesUsage {
            input_tokens: prompt_tokens,
            output_tokens: 0,
        },
        output_tokens,
    )?;
    Ok(DialectResponse::Json(to_json(&message)?))
}

async fn run_claude_stream(
    mut upstream_rx: mpsc::Receiver<Result<Bytes, String>>,
    mut framer: ClaudeStreamFramer,
    tx: mpsc::Sender<Bytes>,
    prompt_tokens: u32,
) {
    if tx.send(sse_claude(&framer.start())).await.is_err() {
        return;
    }

    let mut parser = DataLineParser::new();
    let mut reader = UpstreamReader::new();
    let mut output_chars: u64 = 0;

    while let Some(item) = upstream_rx.recv().await {
        match item {
            Ok(bytes) => {
                for payload in parser.push_bytes(&bytes) {
                    let events = reader.push_payload(&payload);
                    match forward_claude(&mut framer, events, &tx, &mut output_chars).await {
                        Forward::Continue => {}
                        Forward::ClientGone => return,
                        Forward::Failed(error) => {
                            terminate_claude_with_error(&tx, &error).await;
                            return;
                        }
                    }
                }
            }
            Err(message) => {
                terminate_claude_with_error(&tx, &GatewayError::UpstreamInterrupted(message))
                    .await;
                return;
            }
        }
    }

    for payload in parser.finish() {
        let events = reader.push_payload(&payload);
        match forward_claude(&mut framer, events, &tx, &mut output_chars).await {
            Forward::Continue => {}
            Forward::ClientGone => return,
            Forward::Failed(error) => {
                terminate_claude_with_error(&tx, &error).await;
                return;
            }
        }
    }
    let events = reader.finish();
    match forward_claude(&mut framer, events, &tx, &mut output_chars).await {
        Forward::Continue => {}
        Forward::ClientGone => return,
        Forward::Failed(error) => {
            terminate_claude_with_error(&tx, &error).await;
            return;
        }
    }

    let output_tokens = tokens_from_chars(output_chars);
    let usage = MessagesUsage {
        input_tokens: prompt_tokens,
        output_tokens: 0,
    };
    for event in framer.finish(usage, output_tokens) {
        if tx.send(sse_claude(&event)).await.is_err() {
            return;
        }
    }
}

enum Forward {
    Continue,
    ClientGone,
    Failed(GatewayError),
}

async fn forward_claude(
    framer: &mut ClaudeStreamFramer,
    events: Vec<StreamEvent>,
    tx: &mpsc::Sender<Bytes>,
    output_chars: &mut u64,
) -> Forward {
    for event in events {
        track_output_chars(&event, output_chars);
        let framed = match framer.push_event(event) {
            Ok(framed) => framed,
            Err(error) => return Forward::Failed(error),
        };
        for frame in framed {
            if tx.send(sse_claude(&frame)).await.is_err() {
                return Forward::ClientGone;
            }
        }
    }
    Forward::Continue
}

/// Error mid-stream: one `event: error`, then the single terminator.
async fn terminate_claude_with_error(tx: &mpsc::Sender<Bytes>, error: &GatewayError) {
    let event = MessagesStreamEvent::Error {
        error: ErrorDetail {
            kind: "api_error".to_string(),
            message: error.to_string(),
        },
    };
    if tx.send(sse_claude(&event)).await.is_err() {
        return;
    }
    let _ = tx.send(sse_claude(&MessagesStreamEvent::MessageStop)).await;
}

// ---- count-tokens endpoints ----

pub fn count_tokens_openai(request: &ChatCompletionRequest) -> openai::response::CountTokensResponse {
    let model = request
        .model
        .clone()
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let prompt_tokens = tokens::count_openai_messages(&request.messages)
        + tokens::count_openai_tool_schemas(request.tools.as_deref());
    openai::response::CountTokensResponse {
        object: "tokens".to_string(),
        model,
        fallback: true,
        prompt_tokens,
        completion_tokens: 0,
        total_tokens: prompt_tokens,
    }
}

pub fn count_tokens_claude(request: &MessagesRequest) -> claude::response::CountTokensResponse {
    let model = request
        .model
        .clone()
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let input_tokens = tokens::count_claude_request(request)
        + tokens::count_claude_tool_schemas(request.tools.as_deref());
    claude::response::CountTokensResponse {
        input_tokens,
        model,
        fallback: true,
    }
}

// ---- shared plumbing ----

/// POST the envelope upstream. A 403 disables the credential and retries
/// once on the next one; anything else non-2xx surfaces verbatim.
async fn open_stream(
    state: &GatewayState,
    envelope: &gravgate_protocol::upstream::request::Envelope,
) -> Result<mpsc::Receiver<Result<Bytes, String>>, GatewayError> {
    let body = Bytes::from(to_vec(envelope)?);
    let mut cred = state.pool.get_token().await?;

    for attempt in 0..2 {
        let response = state
            .upstream
            .send(UpstreamHttpRequest {
                url: state.config.api.url.clone(),
                access_token: cred.access_token.clone(),
                user_agent: state.config.api.user_agent.clone(),
                body: body.clone(),
                want_stream: true,
            })
            .await?;

        match response.status {
            status if (200..300).contains(&status) => {
                return Ok(match response.body {
                    UpstreamBody::Stream(rx) => rx,
                    UpstreamBody::Bytes(bytes) => {
                        let (tx, rx) = mpsc::channel(1);
                        let _ = tx.try_send(Ok(bytes));
                        rx
                    }
                });
            }
            403 if attempt == 0 => {
                state
                    .logs
                    .append("warn", "upstream rejected a credential with 403")
                    .await;
                cred = state
                    .pool
                    .on_upstream_forbidden(&cred)
                    .await
                    .map_err(|_| GatewayError::CredentialForbidden)?;
            }
            status => {
                let snippet = crate::models::snippet(&response.body.into_bytes());
                return Err(GatewayError::UpstreamStatus {
                    status,
                    body_snippet: snippet,
                });
            }
        }
    }

    Err(GatewayError::CredentialForbidden)
}

/// Drain the whole upstream stream for a non-streaming response.
async fn collect_events(
    mut upstream_rx: mpsc::Receiver<Result<Bytes, String>>,
) -> Result<(Vec<StreamEvent>, u64), GatewayError> {
    let mut parser = DataLineParser::new();
    let mut reader = UpstreamReader::new();
    let mut events = Vec::new();
    let mut output_chars: u64 = 0;

    while let Some(item) = upstream_rx.recv().await {
        let bytes = item.map_err(GatewayError::UpstreamInterrupted)?;
        for payload in parser.push_bytes(&bytes) {
            for event in reader.push_payload(&payload) {
                track_output_chars(&event, &mut output_chars);
                events.push(event);
            }
        }
    }
    for payload in parser.finish() {
        for event in reader.push_payload(&payload) {
            track_output_chars(&event, &mut output_chars);
            events.push(event);
        }
    }
    for event in reader.finish() {
        events.push(event);
    }

    Ok((events, output_chars))
}

/// The health-probe quirk: a lone sub-20-char message with `stream` unset
/// answers as plain JSON.
fn resolve_streaming(explicit: Option<bool>, single_message_chars: Option<usize>) -> bool {
    match explicit {
        Some(value) => value,
        None => !single_message_chars.is_some_and(|chars| chars < STREAM_DOWNGRADE_MAX_CHARS),
    }
}

fn single_message_chars_openai(request: &ChatCompletionRequest) -> Option<usize> {
    if request.messages.len() != 1 {
        return None;
    }
    let text = match &request.messages[0] {
        gravgate_protocol::openai::types::ChatMessage::System { content }
        | gravgate_protocol::openai::types::ChatMessage::User { content }
        | gravgate_protocol::openai::types::ChatMessage::Tool { content, .. } => content.text(),
        gravgate_protocol::openai::types::ChatMessage::Assistant { content, .. } => content
            .as_ref()
            .map(MessageContent::text)
            .unwrap_or_default(),
    };
    Some(text.chars().count())
}

fn single_message_chars_claude(request: &MessagesRequest) -> Option<usize> {
    if request.messages.len() != 1 {
        return None;
    }
    let text = match &request.messages[0].content {
        claude::types::MessageContent::Text(text) => text.clone(),
        claude::types::MessageContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|block| match block {
                claude::types::ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect(),
    };
    Some(text.chars().count())
}

fn track_output_chars(event: &StreamEvent, output_chars: &mut u64) {
    match event {
        StreamEvent::Text { delta } => *output_chars += delta.chars().count() as u64,
        StreamEvent::Thinking {
            delta,
            phase: ThinkingPhase::Mid,
        } => *output_chars += delta.chars().count() as u64,
        _ => {}
    }
}

fn usage_from(prompt_tokens: u32, output_chars: u64) -> Usage {
    let completion_tokens = tokens_from_chars(output_chars);
    Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens,
    }
}

fn tokens_from_chars(chars: u64) -> u32 {
    (chars as u32).div_ceil(4)
}

fn sse_json<T: Serialize>(value: &T) -> Bytes {
    let payload = serde_json::to_vec(value).unwrap_or_default();
    let mut frame = Vec::with_capacity(payload.len() + 8);
    frame.extend_from_slice(b"data: ");
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(b"\n\n");
    Bytes::from(frame)
}

fn sse_claude(event: &MessagesStreamEvent) -> Bytes {
    let payload = serde_json::to_vec(event).unwrap_or_default();
    let name = event.name();
    let mut frame = Vec::with_capacity(payload.len() + name.len() + 16);
    frame.extend_from_slice(b"event: ");
    frame.extend_from_slice(name.as_bytes());
    frame.extend_from_slice(b"\ndata: ");
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(b"\n\n");
    Bytes::from(frame)
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, GatewayError> {
    serde_json::to_value(value).map_err(|err| GatewayError::Storage(err.to_string()))
}

fn to_vec<T: Serialize>(value: &T) -> Result<Vec<u8>, GatewayError> {
    serde_json::to_vec(value).map_err(|err| GatewayError::Storage(err.to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::keys::KeyStore;
    use crate::upstream::{UpstreamClient, UpstreamHttpResponse};
    use gravgate_pool::{CredentialPool, IdentityCache, RefreshError, TokenGrant, TokenRefresher};
    use gravgate_storage::entities::CredentialRecord;
    use gravgate_storage::{JsonFile, LogBuffer};

    struct NoRefresh;

    #[async_trait::async_trait]
    impl TokenRefresher for NoRefresh {
        async fn refresh(&self, _: &str) -> Result<TokenGrant, RefreshError> {
            Err(RefreshError::Transport("not scripted".to_string()))
        }
        async fn exchange_code(&self, _: &str, _: &str) -> Result<TokenGrant, RefreshError> {
            Err(RefreshError::Transport("not scripted".to_string()))
        }
    }

    struct MockUpstream {
        responses: Mutex<VecDeque<UpstreamHttpResponse>>,
    }

    impl MockUpstream {
        fn new(responses: Vec<UpstreamHttpResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
            })
        }
    }

    #[async_trait::async_trait]
    impl UpstreamClient for MockUpstream {
        async fn send(
            &self,
            _req: UpstreamHttpRequest,
        ) -> Result<UpstreamHttpResponse, GatewayError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| GatewayError::Transport("no scripted response".to_string()))
        }
    }

    fn sse_frames(lines: &[serde_json::Value]) -> UpstreamHttpResponse {
        let mut body = String::new();
        for line in lines {
            body.push_str("data: ");
            body.push_str(&line.to_string());
            body.push('\n');
        }
        UpstreamHttpResponse {
            status: 200,
            body: UpstreamBody::Bytes(Bytes::from(body)),
        }
    }

    fn status_response(status: u16, body: &str) -> UpstreamHttpResponse {
        UpstreamHttpResponse {
            status,
            body: UpstreamBody::Bytes(Bytes::from(body.to_string())),
        }
    }

    async fn state_with(
        dir: &tempfile::TempDir,
        credentials: Vec<CredentialRecord>,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Arc<GatewayState> {
        let accounts = dir.path().join("accounts.json");
        let file: JsonFile<Vec<CredentialRecord>> = JsonFile::new(&accounts);
        file.write(&credentials).await.unwrap();
        let pool = CredentialPool::load(JsonFile::new(&accounts), Arc::new(NoRefresh))
            .await
            .unwrap();
        let keys = Arc::new(
            KeyStore::load(JsonFile::new(dir.path().join("api_keys.json")))
                .await
                .unwrap(),
        );
        let logs = LogBuffer::new(JsonFile::new(dir.path().join("app_logs.json")));
        let mut config = gravgate_common::GatewayConfig::default();
        config.api.url = "https://upstream.invalid/stream".to_string();
        config.api.models_url = "https://upstream.invalid/models".to_string();
        config.api.user_agent = "gravgate-test/0.1".to_string();
        config.system_instruction = "be helpful".to_string();
        GatewayState::new(config, pool, keys, IdentityCache::new(), upstream, logs)
    }

    fn credential(token: &str) -> CredentialRecord {
        CredentialRecord {
            access_token: format!("at-{token}"),
            refresh_token: token.to_string(),
            expires_in: 3600,
            issued_at_ms: gravgate_pool_now_ms(),
            enabled: true,
            email: None,
            display_name: None,
        }
    }

    fn gravgate_pool_now_ms() -> i64 {
        (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
    }

    fn auth() -> AuthOutcome {
        AuthOutcome {
            api_key: "gg-test".to_string(),
            admin: true,
            limit: None,
            remaining: None,
        }
    }

    fn openai_request(text: &str, stream: Option<bool>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: Some("gemini-2.5-pro".to_string()),
            messages: vec![gravgate_protocol::openai::types::ChatMessage::User {
                content: MessageContent::Text(text.to_string()),
            }],
            stream,
            tools: None,
            temperature: None,
            top_p: None,
            top_k: None,
            max_tokens: None,
            stop: None,
        }
    }

    async fn drain(mut rx: mpsc::Receiver<Bytes>) -> String {
        let mut out = String::new();
        while let Some(frame) = rx.recv().await {
            out.push_str(&String::from_utf8_lossy(&frame));
        }
        out
    }

    #[tokio::test]
    async fn streamed_tool_call_turn_arrives_in_protocol_order() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = MockUpstream::new(vec![sse_frames(&[
            serde_json::json!({"response": {"candidates": [{"content": {"parts": [{"text": "hi"}]}}]}}),
            serde_json::json!({"response": {"candidates": [{"content": {"parts": [
                {"functionCall": {"id": "t1", "name": "lookup", "args": {"q": "x"}}}
            ]}}]}}),
            serde_json::json!({"response": {"candidates": [{"content": {"parts": []}, "finishReason": "STOP"}]}}),
        ])]);
        let state = state_with(&dir, vec![credential("A")], upstream).await;

        let response = chat_completions(
            state,
            &auth(),
            openai_request("please call the tool", Some(true)),
        )
        .await
        .unwrap();
        let DialectResponse::Sse(rx) = response else {
            panic!("expected an SSE response");
        };
        let body = drain(rx).await;

        let content_at = body.find(r#""content":"hi""#).unwrap();
        let calls_at = body.find(r#""tool_calls""#).unwrap();
        let finish_at = body.find(r#""finish_reason":"tool_calls""#).unwrap();
        let usage_at = body.find(r#""total_tokens""#).unwrap();
        let done_at = body.find("data: [DONE]").unwrap();
        assert!(content_at < calls_at);
        assert!(calls_at < finish_at);
        assert!(finish_at < usage_at);
        assert!(usage_at < done_at);
        assert_eq!(body.matches("data: [DONE]").count(), 1);
    }

    #[tokio::test]
    async fn short_single_message_downgrades_to_json() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = MockUpstream::new(vec![sse_frames(&[serde_json::json!(
            {"response": {"candidates": [{"content": {"parts": [{"text": "ok"}]},
            "finishReason": "STOP"}]}}
        )])]);
        let state = state_with(&dir, vec![credential("A")], upstream).await;

        // Under 20 chars, stream unset: the health-probe quirk kicks in.
        let response = chat_completions(state, &auth(), openai_request("ping", None))
            .await
            .unwrap();
        let DialectResponse::Json(body) = response else {
            panic!("expected a JSON response");
        };
        assert_eq!(body["choices"][0]["message"]["content"], "ok");
        assert_eq!(body["choices"][0]["finish_reason"], "stop");
    }

    #[tokio::test]
    async fn explicit_stream_true_overrides_the_quirk() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = MockUpstream::new(vec![sse_frames(&[serde_json::json!(
            {"response": {"candidates": [{"content": {"parts": [{"text": "ok"}]}}]}}
        )])]);
        let state = state_with(&dir, vec![credential("A")], upstream).await;
        let response = chat_completions(state, &auth(), openai_request("ping", Some(true)))
            .await
            .unwrap();
        assert!(matches!(response, DialectResponse::Sse(_)));
    }

    #[tokio::test]
    async fn upstream_forbidden_retries_once_on_the_next_credential() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = MockUpstream::new(vec![
            status_response(403, "account disabled"),
            sse_frames(&[serde_json::json!(
                {"response": {"candidates": [{"content": {"parts": [{"text": "recovered"}]},
                "finishReason": "STOP"}]}}
            )]),
        ]);
        let state = state_with(&dir, vec![credential("A"), credential("B")], upstream).await;

        let response = chat_completions(
            state.clone(),
            &auth(),
            openai_request("long enough to stream by default", None),
        )
        .await
        .unwrap();
        let DialectResponse::Sse(rx) = response else {
            panic!("expected an SSE response");
        };
        let body = drain(rx).await;
        assert!(body.contains("recovered"));

        let remaining = state.pool.list().await;
        assert!(!remaining[0].enabled);
        assert!(remaining[1].enabled);
    }

    #[tokio::test]
    async fn other_upstream_errors_surface_with_status_and_snippet() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = MockUpstream::new(vec![status_response(500, "backend exploded")]);
        let state = state_with(&dir, vec![credential("A")], upstream).await;
        let error = chat_completions(state, &auth(), openai_request("hello there friend", None))
            .await
            .unwrap_err();
        let GatewayError::UpstreamStatus {
            status,
            body_snippet,
        } = error
        else {
            panic!("expected UpstreamStatus, got {error}");
        };
        assert_eq!(status, 500);
        assert!(body_snippet.contains("backend exploded"));
    }

    #[tokio::test]
    async fn claude_stream_ends_with_exactly_one_message_stop() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = MockUpstream::new(vec![sse_frames(&[
            serde_json::json!({"response": {"candidates": [{"content": {"parts": [{"text": "hello"}]}}]}}),
            serde_json::json!({"response": {"candidates": [{"content": {"parts": []}, "finishReason": "STOP"}]}}),
        ])]);
        let state = state_with(&dir, vec![credential("A")], upstream).await;

        let request = MessagesRequest {
            model: Some("gemini-2.5-pro".to_string()),
            messages: vec![claude::types::Message {
                role: claude::types::MessageRole::User,
                content: claude::types::MessageContent::Text(
                    "say hello to the nice user".to_string(),
                ),
            }],
            system: None,
            stream: Some(true),
            max_tokens: Some(1024),
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            tools: None,
        };
        let response = messages(state, &auth(), request).await.unwrap();
        let DialectResponse::Sse(rx) = response else {
            panic!("expected an SSE response");
        };
        let body = drain(rx).await;

        assert!(body.starts_with("event: message_start\n"));
        assert_eq!(body.matches("event: message_stop").count(), 1);
        assert!(body.contains("event: content_block_delta"));
        let delta_at = body.find("event: message_delta").unwrap();
        let stop_at = body.find("event: message_stop").unwrap();
        assert!(delta_at < stop_at);
        assert!(body.contains(r#""stop_reason":"end_turn""#));
    }

    #[tokio::test]
    async fn claude_requires_a_model() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = MockUpstream::new(Vec::new());
        let state = state_with(&dir, vec![credential("A")], upstream).await;
        let request = MessagesRequest {
            model: None,
            messages: vec![claude::types::Message {
                role: claude::types::MessageRole::User,
                content: claude::types::MessageContent::Text("hi".to_string()),
            }],
            system: None,
            stream: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            tools: None,
        };
        assert!(matches!(
            messages(state, &auth(), request).await,
            Err(GatewayError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn count_tokens_shapes_match_both_dialects() {
        let openai_body = count_tokens_openai(&openai_request("hello world", None));
        assert_eq!(openai_body.object, "tokens");
        assert!(openai_body.fallback);
        assert_eq!(openai_body.completion_tokens, 0);
        assert_eq!(openai_body.total_tokens, openai_body.prompt_tokens);

        let request = MessagesRequest {
            model: Some("gemini-2.5-pro".to_string()),
            messages: vec![claude::types::Message {
                role: claude::types::MessageRole::User,
                content: claude::types::MessageContent::Text("hello world".to_string()),
            }],
            system: None,
            stream: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            tools: None,
        };
        let claude_body = count_tokens_claude(&request);
        assert!(claude_body.input_tokens > 0);
        assert!(claude_body.fallback);
    }
}
