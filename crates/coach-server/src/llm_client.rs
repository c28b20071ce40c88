//! Concrete `LlmProvider` implementation. Provider SDKs are explicitly out
//! of scope (§1); this is the lightweight OpenAI-compatible chat
//! completions client every race arm and the reply generator are built
//! against, following the teacher's `agent-llm::openai::OpenAIProvider`
//! shape (reqwest client, bearer auth, `{base_url}/chat/completions`) but
//! non-streaming — the pipeline only needs one finished string per call.

use async_trait::async_trait;
use base64::Engine;
use coach_core::CoachError;
use coach_llm::LlmRequest;
use coach_pipeline::LlmProvider;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    name: String,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            name: name.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn build_body(&self, request: &LlmRequest) -> serde_json::Value {
        let mut content = vec![serde_json::json!({"type": "text", "text": request.prompt})];

        if let Some(image) = &request.image {
            let mime = sniff_mime(&image.bytes);
            let encoded = base64::engine::general_purpose::STANDARD.encode(&image.bytes);
            content.push(serde_json::json!({
                "type": "image_url",
                "image_url": {"url": format!("data:{mime};base64,{encoded}")},
            }));
        }

        serde_json::json!({
            "model": self.model,
            "stream": false,
            "messages": [{"role": "user", "content": content}],
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

fn sniff_mime(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Png) => "image/png",
        Ok(image::ImageFormat::Jpeg) => "image/jpeg",
        Ok(image::ImageFormat::WebP) => "image/webp",
        Ok(image::ImageFormat::Gif) => "image/gif",
        Ok(image::ImageFormat::Bmp) => "image/bmp",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &LlmRequest, cancel: CancellationToken) -> Result<String, CoachError> {
        let body = self.build_body(request);
        let send = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();

        let response = tokio::select! {
            result = send => result.map_err(|error| {
                CoachError::LlmProviderAuth(format!("{} request failed: {error}", self.name))
            })?,
            _ = cancel.cancelled() => {
                return Err(CoachError::Timeout(format!("{} cancelled after losing the race", self.name)));
            }
        };

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(CoachError::LlmProviderAuth(format!(
                "{} returned {}",
                self.name,
                response.status()
            )));
        }
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CoachError::LlmProviderThrottled(format!("{} throttled", self.name)));
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CoachError::LlmProviderAuth(format!(
                "{} returned {status}: {text}",
                self.name
            )));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|error| CoachError::LlmProviderAuth(format!("{} returned unparseable body: {error}", self.name)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| CoachError::LlmProviderAuth(format!("{} returned no choices", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn complete_extracts_first_choice_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "{\"a\":1}"}}]
            })))
            .mount(&server)
            .await;

        let provider = OpenAiCompatProvider::new("multimodal", server.uri(), "sk-test", "gpt-5");
        let raw = provider
            .complete(&LlmRequest::text("hello"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(raw, "{\"a\":1}");
    }

    #[tokio::test]
    async fn complete_maps_401_to_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let provider = OpenAiCompatProvider::new("premium", server.uri(), "sk-test", "gpt-5");
        let error = provider
            .complete(&LlmRequest::text("hello"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(error, CoachError::LlmProviderAuth(_)));
    }

    #[tokio::test]
    async fn complete_maps_429_to_throttled_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let provider = OpenAiCompatProvider::new("reply", server.uri(), "sk-test", "gpt-5");
        let error = provider
            .complete(&LlmRequest::text("hello"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(error, CoachError::LlmProviderThrottled(_)));
    }
}
