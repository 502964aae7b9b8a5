use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use gravgate_common::GatewayError;

/// One POST to the upstream (or its models endpoint).
#[derive(Debug, Clone)]
pub struct UpstreamHttpRequest {
    pub url: String,
    pub access_token: String,
    pub user_agent: String,
    pub body: Bytes,
    pub want_stream: bool,
}

#[derive(Debug)]
pub struct UpstreamHttpResponse {
    pub status: u16,
    pub body: UpstreamBody,
}

#[derive(Debug)]
pub enum UpstreamBody {
    Bytes(Bytes),
    /// Chunked body; an `Err` item carries the mid-stream failure message.
    Stream(mpsc::Receiver<Result<Bytes, String>>),
}

impl UpstreamBody {
    pub fn into_bytes(self) -> Bytes {
        match self {
            UpstreamBody::Bytes(bytes) => bytes,
            UpstreamBody::Stream(_) => Bytes::new(),
        }
    }
}

#[async_trait::async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn send(&self, req: UpstreamHttpRequest) -> Result<UpstreamHttpResponse, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub stream_idle_timeout: Duration,
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(86400),
            stream_idle_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct WreqUpstreamClient {
    client: wreq::Client,
    stream_idle_timeout: Duration,
}

impl WreqUpstreamClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, GatewayError> {
        let client = wreq::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            stream_idle_timeout: config.stream_idle_timeout,
        })
    }
}

#[async_trait::async_trait]
impl UpstreamClient for WreqUpstreamClient {
    async fn send(&self, req: UpstreamHttpRequest) -> Result<UpstreamHttpResponse, GatewayError> {
        let response = self
            .client
            .post(&req.url)
            .header("Authorization", format!("Bearer {}", req.access_token))
            .header("Content-Type", "application/json")
            .header("User-Agent", req.user_agent.as_str())
            .header("Accept-Encoding", "gzip")
            .body(req.body)
            .send()
            .await
            .map_err(|err| GatewayError::Transport(err.to_string()))?;

        let status = response.status().as_u16();
        let is_success = (200..300).contains(&status);
        if !is_success || !req.want_stream {
            let body = response
                .bytes()
                .await
                .map_err(|err| GatewayError::Transport(err.to_string()))?;
            return Ok(UpstreamHttpResponse {
                status,
                body: UpstreamBody::Bytes(body),
            });
        }

        let idle_timeout = self.stream_idle_timeout;
        let (tx, rx) = mpsc::channel::<Result<Bytes, String>>(16);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            loop {
                let next = tokio::time::timeout(idle_timeout, stream.next()).await;
                let item = match next {
                    Ok(item) => item,
                    Err(_) => {
                        let _ = tx.send(Err("upstream read idle timeout".to_string())).await;
                        break;
                    }
                };
                let Some(item) = item else {
                    break;
                };
                match item {
                    Ok(chunk) => {
                        if tx.send(Ok(chunk)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(err.to_string())).await;
                        break;
                    }
                }
            }
        });

        Ok(UpstreamHttpResponse {
            status,
            body: UpstreamBody::Stream(rx),
        })
    }
}
