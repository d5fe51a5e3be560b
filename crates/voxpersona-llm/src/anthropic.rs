use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::backend::{BackendError, ChatBackend};
use crate::pool::Credential;
use crate::types::{ChatOutcome, ChatRequest};

const API_VERSION: &str = "2023-06-01";

/// Anthropic messages API backend. The credential's secret is the API key;
/// which key is used per call is decided upstream by the pool.
pub struct AnthropicBackend {
    client: reqwest::Client,
    base_url: String,
}

impl AnthropicBackend {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
        }
    }
}

#[async_trait]
impl ChatBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn send(
        &self,
        req: &ChatRequest,
        credential: &Credential,
    ) -> Result<ChatOutcome, BackendError> {
        let body = build_request_body(req);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %req.model, credential = credential.id, "sending request");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &credential.secret)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        match status {
            429 => {
                let retry = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(|secs| secs * 1000)
                    .unwrap_or(5000);
                return Err(BackendError::RateLimited {
                    retry_after_ms: retry,
                });
            }
            529 => return Err(BackendError::Overloaded),
            401 | 403 => {
                warn!(status, credential = credential.id, "credential rejected");
                return Err(BackendError::CredentialRejected { status });
            }
            _ => {}
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "API error");
            if status >= 500 {
                return Err(BackendError::Server {
                    status,
                    message: text,
                });
            }
            return Err(BackendError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp))
    }
}

fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = req
        .messages
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": m.role,
                "content": m.content,
            })
        })
        .collect();

    let mut body = serde_json::json!({
        "model": req.model,
        "max_tokens": req.max_tokens,
        "messages": messages,
        "stream": false,
    });
    if let Some(ref system) = req.system {
        body["system"] = serde_json::Value::String(system.clone());
    }
    body
}

fn parse_response(resp: ApiResponse) -> ChatOutcome {
    let text: String = resp
        .content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Unknown => None,
        })
        .collect();

    ChatOutcome {
        content: text,
        tokens_in: resp.usage.input_tokens,
        tokens_out: resp.usage.output_tokens,
    }
}

// Anthropic API response types (private — only used for deserialization)

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}
