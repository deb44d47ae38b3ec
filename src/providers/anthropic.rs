use super::traits::{Completion, ProviderAdapter};
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::Deserialize;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Adapter for the Anthropic messages API (`POST {base_url}/v1/messages`).
pub struct AnthropicAdapter {
    id: String,
    model: String,
    base_url: String,
    api_key: Option<String>,
    max_output_tokens: u32,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new(
        id: impl Into<String>,
        model: impl Into<String>,
        base_url: Option<&str>,
        api_key: Option<String>,
        max_output_tokens: u32,
    ) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            max_output_tokens,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(&self, prompt: &str) -> Result<Completion, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured(format!("{} (missing API key)", self.id)))?;

        let payload = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_output_tokens,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&body) {
                if status.is_server_error() {
                    return Err(ProviderError::Upstream(envelope.error.message));
                }
            }
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let usage = body
            .usage
            .ok_or_else(|| ProviderError::InvalidResponse("missing usage".into()))?;

        let text = body
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(Completion {
            output_units: usage.input_tokens + usage.output_tokens,
            payload: text,
        })
    }
}
