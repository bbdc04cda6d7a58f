//! OpenAI-compatible chat-completions generator.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use kindred_core::error::{KindredError, KindredResult};
use kindred_core::traits::{GenerationRequest, ResponseGenerator};

use crate::config::GeneratorConfig;
use crate::prompt::{build_messages, ChatMessage};

/// Generator backed by `{base_url}/chat/completions`.
///
/// Every failure (transport, non-success status, empty completion) comes
/// back as a retryable generation error.
pub struct OpenAiGenerator {
    client: Client,
    config: GeneratorConfig,
    endpoint: Url,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl OpenAiGenerator {
    /// Create a generator. Fails if no API key is configured or the base
    /// URL does not parse.
    pub fn new(config: GeneratorConfig) -> KindredResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok().map(SecretString::new))
            .ok_or_else(|| {
                KindredError::configuration(
                    "OpenAI API key not found. Set OPENAI_API_KEY environment variable or provide api_key in config.",
                )
            })?;

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {}", api_key.expose_secret())
                .parse()
                .map_err(|_| KindredError::configuration("Invalid API key format"))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| {
                KindredError::configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        let endpoint = Self::endpoint(&config.base_url)?;

        Ok(Self {
            client,
            config,
            endpoint,
        })
    }

    fn endpoint(base_url: &str) -> KindredResult<Url> {
        let mut base = Url::parse(base_url).map_err(|e| invalid_base_url(base_url, e))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join("chat/completions").map_err(|e| invalid_base_url(base_url, e))
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

fn invalid_base_url(base_url: &str, e: url::ParseError) -> KindredError {
    KindredError::configuration(format!("Invalid base URL '{}': {}", base_url, e))
}

#[async_trait]
impl ResponseGenerator for OpenAiGenerator {
    async fn generate(&self, request: &GenerationRequest) -> KindredResult<String> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: build_messages(request),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        tracing::debug!(
            model = %self.config.model,
            persona_id = %request.persona.id,
            kind = %request.response_kind,
            "Requesting completion"
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| KindredError::generation(format!("OpenAI request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(KindredError::generation(format!(
                "OpenAI API error ({}): {}",
                status, message
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| KindredError::generation(format!("Malformed OpenAI response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| KindredError::generation("No completion content returned"))
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use kindred_core::types::{Persona, ResponseKind};
    use serde_json::{json, Value};

    fn request() -> GenerationRequest {
        GenerationRequest {
            user_id: "u1".to_string(),
            entry_id: "e1".to_string(),
            entry_content: "Slept badly again".to_string(),
            persona: Persona::new("pulse", "Pulse"),
            response_kind: ResponseKind::Reply,
        }
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/v1", addr)
    }

    fn generator(base_url: &str) -> OpenAiGenerator {
        OpenAiGenerator::new(
            GeneratorConfig::default()
                .with_base_url(base_url)
                .with_api_key("sk-test"),
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint_join() {
        assert_eq!(
            OpenAiGenerator::endpoint("https://api.openai.com/v1").unwrap().as_str(),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            OpenAiGenerator::endpoint("http://localhost:8080/v1/").unwrap().as_str(),
            "http://localhost:8080/v1/chat/completions"
        );
        assert!(OpenAiGenerator::endpoint("not a url").is_err());
    }

    #[tokio::test]
    async fn test_generate_success() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(
                    headers.get("authorization").and_then(|v| v.to_str().ok()),
                    Some("Bearer sk-test")
                );
                assert_eq!(body["messages"][0]["role"], "system");
                assert!(body["messages"][1]["content"]
                    .as_str()
                    .unwrap_or_default()
                    .contains("Slept badly again"));
                Json(json!({
                    "choices": [{
                        "message": {
                            "role": "assistant",
                            "content": "  Rough night. Be gentle with yourself today.  "
                        }
                    }]
                }))
            }),
        );
        let base = serve(app).await;

        let text = generator(&base).generate(&request()).await.unwrap();
        assert_eq!(text, "Rough night. Be gentle with yourself today.");
    }

    #[tokio::test]
    async fn test_error_status_is_retryable() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({ "error": { "message": "Rate limit reached" } })),
                )
            }),
        );
        let base = serve(app).await;

        let err = generator(&base).generate(&request()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("Rate limit reached"));
    }

    #[tokio::test]
    async fn test_empty_completion_is_error() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { Json(json!({ "choices": [{ "message": { "content": "   " } }] })) }),
        );
        let base = serve(app).await;

        let err = generator(&base).generate(&request()).await.unwrap_err();
        assert!(matches!(err, KindredError::Generation { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let err = generator("http://127.0.0.1:9/v1")
            .generate(&request())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
