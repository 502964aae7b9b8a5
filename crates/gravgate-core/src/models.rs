use bytes::Bytes;
use time::OffsetDateTime;

use gravgate_common::GatewayError;
use gravgate_protocol::openai::response::{ModelEntry, ModelList, ModelListObject};
use gravgate_protocol::upstream::response::ModelsResponse;

use crate::state::GatewayState;
use crate::upstream::{UpstreamBody, UpstreamHttpRequest};

const MODEL_OWNER: &str = "google";

/// Fetch the upstream model map and shape it as an OpenAI model listing.
pub async fn list_models(state: &GatewayState) -> Result<ModelList, GatewayError> {
    let mut cred = state.pool.get_token().await?;

    for attempt in 0..2 {
        let response = state
            .upstream
            .send(UpstreamHttpRequest {
                url: state.config.api.models_url.clone(),
                access_token: cred.access_token.clone(),
                user_agent: state.config.api.user_agent.clone(),
                body: Bytes::from_static(b"{}"),
                want_stream: false,
            })
            .await?;

        match response.status {
            status if (200..300).contains(&status) => {
                let body = response.body.into_bytes();
                let parsed: ModelsResponse = serde_json::from_slice(&body)
                    .map_err(|err| GatewayError::UpstreamStatus {
                        status,
                        body_snippet: format!("unparseable models response: {err}"),
                    })?;
                let created = OffsetDateTime::now_utc().unix_timestamp();
                return Ok(ModelList {
                    object: ModelListObject::List,
                    data: parsed
                        .models
                        .into_keys()
                        .map(|id| ModelEntry {
                            id,
                            object: "model".to_string(),
                            created,
                            owned_by: MODEL_OWNER.to_string(),
                        })
                        .collect(),
                });
            }
            403 if attempt == 0 => {
                cred = state.pool.on_upstream_forbidden(&cred).await?;
            }
            status => {
                let body = response.body.into_bytes();
                return Err(GatewayError::UpstreamStatus {
                    status,
                    body_snippet: snippet(&body),
                });
            }
        }
    }

    Err(GatewayError::CredentialForbidden)
}

pub(crate) fn snippet(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let mut out: String = text.chars().take(300).collect();
    if text.chars().count() > 300 {
        out.push('…');
    }
    out
}
