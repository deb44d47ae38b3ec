use super::registry::HealthStatus;
use super::traits::{Completion, ProviderAdapter};
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::Deserialize;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Adapter for OpenAI-compatible chat completion APIs
/// (`POST {base_url}/chat/completions`).
pub struct OpenAiCompatibleAdapter {
    id: String,
    model: String,
    base_url: String,
    api_key: Option<String>,
    max_output_tokens: u32,
    client: reqwest::Client,
}

impl OpenAiCompatibleAdapter {
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

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(&self, prompt: &str) -> Result<Completion, ProviderError> {
        let payload = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": self.max_output_tokens,
        });

        let resp = self
            .authorize(self.client.post(format!("{}/chat/completions", self.base_url)))
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        let body: ChatResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        if let Some(err) = body.error {
            return Err(ProviderError::Upstream(err.message));
        }
        let usage = body
            .usage
            .ok_or_else(|| ProviderError::InvalidResponse("missing usage".into()))?;
        let payload = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("no choices returned".into()))?;

        Ok(Completion {
            output_units: usage.total_tokens,
            payload,
        })
    }

    async fn health_check(&self) -> Option<HealthStatus> {
        let request = self.authorize(self.client.get(format!("{}/models", self.base_url)));
        let status = match request.send().await {
            Ok(resp) if resp.status().is_success() => HealthStatus::Healthy,
            Ok(resp) if resp.status().is_server_error() => HealthStatus::Unavailable,
            Ok(_) => HealthStatus::Degraded,
            Err(e) => {
                tracing::debug!(provider_id = %self.id, "Health probe failed: {e}");
                HealthStatus::Unavailable
            }
        };
        Some(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> OpenAiCompatibleAdapter {
        OpenAiCompatibleAdapter::new(
            "openai",
            "gpt-4o-mini",
            Some(&format!("{}/v1/", server.uri())),
            Some("sk-test".into()),
            64,
        )
    }

    #[tokio::test]
    async fn invoke_parses_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "max_tokens": 64
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "role": "assistant", "content": "hello there" } }],
                "usage": { "prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7 }
            })))
            .mount(&server)
            .await;

        let completion = adapter(&server).invoke("hi").await.unwrap();
        assert_eq!(completion.output_units, 7);
        assert_eq!(completion.payload, "hello there");
    }

    #[tokio::test]
    async fn invoke_maps_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = adapter(&server).invoke("hi").await.unwrap_err();
        match err {
            ProviderError::Status { status, body } => {
                assert_eq!(status, 429);
                assert_eq!(body, "slow down");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn invoke_rejects_missing_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "content": "x" } }]
            })))
            .mount(&server)
            .await;

        assert!(matches!(
            adapter(&server).invoke("hi").await,
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn invoke_surfaces_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": { "message": "model overloaded" }
            })))
            .mount(&server)
            .await;

        match adapter(&server).invoke("hi").await {
            Err(ProviderError::Upstream(msg)) => assert_eq!(msg, "model overloaded"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn health_check_maps_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        assert_eq!(
            adapter(&server).health_check().await,
            Some(HealthStatus::Unavailable)
        );

        let healthy = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .mount(&healthy)
            .await;
        assert_eq!(
            adapter(&healthy).health_check().await,
            Some(HealthStatus::Healthy)
        );
    }
}
