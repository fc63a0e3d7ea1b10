//! Gemini provider implementation.
//!
//! Calls `generateContent` either on Vertex AI (project/region scoped, bearer
//! token) or on the Gemini Developer API (API key).

use super::{
    FinishReason, GenerationParams, ModelClientFactory, PromptPart, ProviderError,
    ProviderResponse, TextProvider,
};
use crate::config::{GoogleConfig, ModelConfig};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Gemini Developer API base URL.
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Access token endpoint of the GCE/Cloud Run metadata server.
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Base URLs the factory talks to. Overridable so tests can point at a local server.
#[derive(Debug, Clone)]
pub struct GeminiUrls {
    pub developer_api_base: String,
    /// Replaces `https://{location}-aiplatform.googleapis.com` when set.
    pub vertex_base: Option<String>,
    pub metadata_token_url: String,
}

impl Default for GeminiUrls {
    fn default() -> Self {
        Self {
            developer_api_base: GEMINI_API_BASE.to_string(),
            vertex_base: None,
            metadata_token_url: METADATA_TOKEN_URL.to_string(),
        }
    }
}

/// Where and how a Gemini request is sent.
#[derive(Debug, Clone, PartialEq)]
pub enum GeminiEndpoint {
    DeveloperApi {
        base_url: String,
        api_key: String,
    },
    VertexAi {
        base_url: String,
        project_id: String,
        location: String,
        access_token: String,
    },
}

impl GeminiEndpoint {
    fn generate_url(&self, model: &str) -> String {
        match self {
            GeminiEndpoint::DeveloperApi { base_url, api_key } => format!(
                "{}/models/{}:generateContent?key={}",
                base_url, model, api_key
            ),
            GeminiEndpoint::VertexAi {
                base_url,
                project_id,
                location,
                ..
            } => format!(
                "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
                base_url, project_id, location, model
            ),
        }
    }
}

/// Gemini text provider bound to one endpoint and model.
pub struct GeminiTextProvider {
    client: Client,
    model: String,
    endpoint: GeminiEndpoint,
}

impl GeminiTextProvider {
    pub fn new(client: Client, model: impl Into<String>, endpoint: GeminiEndpoint) -> Self {
        Self {
            client,
            model: model.into(),
            endpoint,
        }
    }
}

#[async_trait]
impl TextProvider for GeminiTextProvider {
    async fn generate(
        &self,
        parts: &[PromptPart],
        params: &GenerationParams,
    ) -> Result<ProviderResponse, ProviderError> {
        let request = GenerateContentRequest::new(parts, params);
        let url = self.endpoint.generate_url(&self.model);

        tracing::debug!(
            model = %self.model,
            part_count = parts.len(),
            "Sending request to Gemini API"
        );

        let mut builder = self.client.post(&url).json(&request);
        if let GeminiEndpoint::VertexAi { access_token, .. } = &self.endpoint {
            builder = builder.bearer_auth(access_token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                return Err(ProviderError::RateLimited);
            }
            if status.is_server_error() {
                return Err(ProviderError::Unavailable(format!(
                    "Gemini API error {}: {}",
                    status, error_text
                )));
            }

            return Err(ProviderError::ApiError(format!(
                "Gemini API error {}: {}",
                status, error_text
            )));
        }

        let api_response: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ApiError(format!("Failed to parse response: {}", e)))?;

        api_response.into_provider_response()
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Builds a [`GeminiTextProvider`] per request from the startup configuration.
///
/// The HTTP client (and its connection pool) is shared; endpoint selection and
/// credential lookup happen on every [`ModelClientFactory::init`] call.
pub struct GeminiModelFactory {
    client: Client,
    google: GoogleConfig,
    model: String,
    urls: GeminiUrls,
}

impl GeminiModelFactory {
    pub fn new(google: GoogleConfig, models: &ModelConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(models.request_timeout_secs))
            .build()
            .map_err(|e| {
                ProviderError::NotConfigured(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            google,
            model: models.text_model.clone(),
            urls: GeminiUrls::default(),
        })
    }

    pub fn with_urls(mut self, urls: GeminiUrls) -> Self {
        self.urls = urls;
        self
    }

    async fn resolve_endpoint(&self) -> Result<GeminiEndpoint, ProviderError> {
        if let Some(api_key) = &self.google.api_key {
            return Ok(GeminiEndpoint::DeveloperApi {
                base_url: self.urls.developer_api_base.clone(),
                api_key: api_key.clone(),
            });
        }

        let project_id = self.google.project_id.clone().ok_or_else(|| {
            ProviderError::NotConfigured("GOOGLE_CLOUD_PROJECT is not set".to_string())
        })?;

        let access_token = match &self.google.access_token {
            Some(token) => token.clone(),
            None => self.fetch_metadata_token().await?,
        };

        let location = self.google.location.clone();
        let base_url = self
            .urls
            .vertex_base
            .clone()
            .unwrap_or_else(|| format!("https://{}-aiplatform.googleapis.com", location));

        Ok(GeminiEndpoint::VertexAi {
            base_url,
            project_id,
            location,
            access_token,
        })
    }

    async fn fetch_metadata_token(&self) -> Result<String, ProviderError> {
        let response = self
            .client
            .get(&self.urls.metadata_token_url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| {
                ProviderError::AuthError(format!("Metadata server unreachable: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(ProviderError::AuthError(format!(
                "Metadata server returned {}",
                response.status()
            )));
        }

        let token: MetadataToken = response
            .json()
            .await
            .map_err(|e| ProviderError::AuthError(format!("Invalid token response: {}", e)))?;

        Ok(token.access_token)
    }
}

#[async_trait]
impl ModelClientFactory for GeminiModelFactory {
    async fn init(&self) -> Result<Arc<dyn TextProvider>, ProviderError> {
        let endpoint = self.resolve_endpoint().await?;
        Ok(Arc::new(GeminiTextProvider::new(
            self.client.clone(),
            self.model.clone(),
            endpoint,
        )))
    }
}

// ============================================================================
// Gemini API Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

impl GenerateContentRequest {
    fn new(parts: &[PromptPart], params: &GenerationParams) -> Self {
        let parts = parts
            .iter()
            .map(|part| match part {
                PromptPart::Text(text) => ContentPart::Text { text: text.clone() },
                PromptPart::InlineData { mime_type, data } => ContentPart::InlineData {
                    inline_data: InlineData {
                        mime_type: mime_type.clone(),
                        data: data.clone(),
                    },
                },
            })
            .collect();

        let generation_config = if params.temperature.is_some() || params.max_tokens.is_some() {
            Some(GenerationConfig {
                temperature: params.temperature,
                max_output_tokens: params.max_tokens,
            })
        } else {
            None
        };

        Self {
            contents: vec![Content {
                role: "user".to_string(),
                parts,
            }],
            generation_config,
        }
    }
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ContentPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

impl GenerateContentResponse {
    /// Concatenate the text parts of the first candidate.
    fn into_provider_response(self) -> Result<ProviderResponse, ProviderError> {
        let usage = self.usage_metadata.unwrap_or_default();

        let Some(candidate) = self.candidates.into_iter().next() else {
            let blocked = self
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .is_some();
            return Err(if blocked {
                ProviderError::ContentFiltered
            } else {
                ProviderError::EmptyResponse
            });
        };

        let finish_reason = FinishReason::from_api(candidate.finish_reason.as_deref());
        if finish_reason == FinishReason::ContentFilter {
            return Err(ProviderError::ContentFiltered);
        }

        let text: String = candidate
            .content
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| p.text)
            .collect();

        if text.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }

        Ok(ProviderResponse {
            text,
            input_tokens: usage.prompt_token_count.unwrap_or(0),
            output_tokens: usage.candidates_token_count.unwrap_or(0),
            finish_reason,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<i32>,
    candidates_token_count: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VERTEX_PATH: &str = concat!(
        "/v1/projects/shop-prod/locations/asia-northeast1",
        "/publishers/google/models/gemini-pro:generateContent"
    );

    fn google(api_key: Option<&str>, project_id: Option<&str>) -> GoogleConfig {
        GoogleConfig {
            project_id: project_id.map(str::to_string),
            location: "asia-northeast1".to_string(),
            access_token: Some("token-123".to_string()),
            api_key: api_key.map(str::to_string),
        }
    }

    fn models() -> ModelConfig {
        ModelConfig {
            text_model: "gemini-pro".to_string(),
            temperature: None,
            max_output_tokens: None,
            request_timeout_secs: 5,
        }
    }

    fn vertex_provider(server: &MockServer) -> GeminiTextProvider {
        GeminiTextProvider::new(
            Client::new(),
            "gemini-pro",
            GeminiEndpoint::VertexAi {
                base_url: server.uri(),
                project_id: "shop-prod".to_string(),
                location: "asia-northeast1".to_string(),
                access_token: "token-123".to_string(),
            },
        )
    }

    fn text_reply(text: &str) -> serde_json::Value {
        json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": text}]},
                "finishReason": "STOP"
            }]
        })
    }

    async fn vertex_error(status: u16) -> ProviderError {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(VERTEX_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_string("upstream says no"))
            .mount(&server)
            .await;

        let prompt = [PromptPart::Text("describe".into())];
        vertex_provider(&server)
            .generate(&prompt, &GenerationParams::default())
            .await
            .unwrap_err()
    }

    #[test]
    fn vertex_url_is_scoped_to_project_and_region() {
        let endpoint = GeminiEndpoint::VertexAi {
            base_url: "https://asia-northeast1-aiplatform.googleapis.com".to_string(),
            project_id: "shop-prod".to_string(),
            location: "asia-northeast1".to_string(),
            access_token: "t".to_string(),
        };
        assert_eq!(
            endpoint.generate_url("gemini-pro"),
            format!("https://asia-northeast1-aiplatform.googleapis.com{}", VERTEX_PATH)
        );
    }

    #[test]
    fn developer_api_url_carries_key() {
        let endpoint = GeminiEndpoint::DeveloperApi {
            base_url: GEMINI_API_BASE.to_string(),
            api_key: "k".to_string(),
        };
        assert_eq!(
            endpoint.generate_url("gemini-pro"),
            format!("{}/models/gemini-pro:generateContent?key=k", GEMINI_API_BASE)
        );
    }

    #[test]
    fn request_serializes_text_and_inline_image() {
        let parts = vec![
            PromptPart::Text("describe".to_string()),
            PromptPart::InlineData {
                mime_type: "image/png".to_string(),
                data: "AQID".to_string(),
            },
        ];
        let request = GenerateContentRequest::new(&parts, &GenerationParams::default());

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        {"text": "describe"},
                        {"inlineData": {"mimeType": "image/png", "data": "AQID"}}
                    ]
                }]
            })
        );
    }

    #[test]
    fn request_includes_generation_config_when_set() {
        let params = GenerationParams {
            temperature: Some(0.5),
            max_tokens: Some(256),
        };
        let request = GenerateContentRequest::new(&[PromptPart::Text("hi".into())], &params);
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["generationConfig"]["temperature"], json!(0.5));
        assert_eq!(value["generationConfig"]["maxOutputTokens"], json!(256));
    }

    #[test]
    fn response_text_concatenates_parts() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "hello "}, {"text": "world"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {
                "promptTokenCount": 12,
                "candidatesTokenCount": 3,
                "totalTokenCount": 15
            }
        }))
        .unwrap();

        let result = response.into_provider_response().unwrap();
        assert_eq!(result.text, "hello world");
        assert_eq!(result.input_tokens, 12);
        assert_eq!(result.output_tokens, 3);
        assert_eq!(result.finish_reason, FinishReason::Complete);
    }

    #[test]
    fn blocked_prompt_is_content_filtered() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();

        assert!(matches!(
            response.into_provider_response(),
            Err(ProviderError::ContentFiltered)
        ));
    }

    #[test]
    fn candidate_without_text_is_empty_response() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"finishReason": "OTHER"}]
        }))
        .unwrap();

        assert!(matches!(
            response.into_provider_response(),
            Err(ProviderError::EmptyResponse)
        ));
    }

    #[tokio::test]
    async fn vertex_call_sends_bearer_token_and_returns_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(VERTEX_PATH))
            .and(header("authorization", "Bearer token-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_reply("hello world")))
            .expect(1)
            .mount(&server)
            .await;

        let prompt = [PromptPart::Text("describe".into())];
        let response = vertex_provider(&server)
            .generate(&prompt, &GenerationParams::default())
            .await
            .unwrap();

        assert_eq!(response.text, "hello world");
    }

    #[tokio::test]
    async fn developer_api_call_passes_key_in_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-pro:generateContent"))
            .and(query_param("key", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_reply("ok")))
            .expect(1)
            .mount(&server)
            .await;

        let factory = GeminiModelFactory::new(google(Some("k"), None), &models())
            .unwrap()
            .with_urls(GeminiUrls {
                developer_api_base: server.uri(),
                ..Default::default()
            });
        let provider = factory.init().await.unwrap();
        let prompt = [PromptPart::Text("describe".into())];
        let response = provider
            .generate(&prompt, &GenerationParams::default())
            .await
            .unwrap();

        assert_eq!(response.text, "ok");
    }

    #[tokio::test]
    async fn too_many_requests_is_rate_limited() {
        let err = vertex_error(429).await;
        assert!(matches!(err, ProviderError::RateLimited));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let err = vertex_error(503).await;
        assert!(
            matches!(err, ProviderError::Unavailable(ref msg) if msg.contains("upstream says no"))
        );
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn client_error_is_api_error() {
        let err = vertex_error(400).await;
        assert!(matches!(err, ProviderError::ApiError(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn api_key_selects_developer_api() {
        let factory = GeminiModelFactory::new(google(Some("k"), None), &models()).unwrap();
        let endpoint = factory.resolve_endpoint().await.unwrap();
        assert_eq!(
            endpoint,
            GeminiEndpoint::DeveloperApi {
                base_url: GEMINI_API_BASE.to_string(),
                api_key: "k".to_string()
            }
        );
    }

    #[tokio::test]
    async fn vertex_uses_configured_token() {
        let factory = GeminiModelFactory::new(google(None, Some("shop-prod")), &models()).unwrap();
        let endpoint = factory.resolve_endpoint().await.unwrap();
        assert_eq!(
            endpoint,
            GeminiEndpoint::VertexAi {
                base_url: "https://asia-northeast1-aiplatform.googleapis.com".to_string(),
                project_id: "shop-prod".to_string(),
                location: "asia-northeast1".to_string(),
                access_token: "token-123".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn vertex_fetches_token_from_metadata_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .and(header("metadata-flavor", "Google"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "from-metadata",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = google(None, Some("shop-prod"));
        config.access_token = None;
        let factory = GeminiModelFactory::new(config, &models())
            .unwrap()
            .with_urls(GeminiUrls {
                metadata_token_url: format!("{}/token", server.uri()),
                ..Default::default()
            });

        match factory.resolve_endpoint().await.unwrap() {
            GeminiEndpoint::VertexAi { access_token, .. } => {
                assert_eq!(access_token, "from-metadata")
            }
            other => panic!("expected Vertex AI endpoint, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn metadata_failure_fails_initialization() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut config = google(None, Some("shop-prod"));
        config.access_token = None;
        let factory = GeminiModelFactory::new(config, &models())
            .unwrap()
            .with_urls(GeminiUrls {
                metadata_token_url: format!("{}/token", server.uri()),
                ..Default::default()
            });

        assert!(matches!(
            factory.init().await,
            Err(ProviderError::AuthError(_))
        ));
    }

    #[tokio::test]
    async fn missing_project_fails_initialization() {
        let factory = GeminiModelFactory::new(google(None, None), &models()).unwrap();
        assert!(matches!(
            factory.init().await,
            Err(ProviderError::NotConfigured(_))
        ));
    }
}
