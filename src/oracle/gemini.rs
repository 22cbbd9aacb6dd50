//! Gemini `generateContent` client.
//!
//! Talks to either the Gemini API (API key) or Vertex AI (project +
//! bearer token), requesting JSON output constrained by the request's
//! schema. Generation settings mirror what a repair prompt needs:
//! deterministic sampling, a large output budget for whole-file
//! replacements, and safety filters disabled so stack traces mentioning
//! `kill` or `exploit` are not blocked.

use super::{Oracle, OracleConfig, OracleError, OracleRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::debug;

/// Default Gemini API base URL.
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Harm categories whose filters are switched off.
const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_HARASSMENT",
];

// =============================================================================
// API Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig<'a>,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    temperature: f32,
    top_p: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
    response_schema: &'a serde_json::Value,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
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

// =============================================================================
// Gemini Client
// =============================================================================

/// How the client authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Credential {
    ApiKey(String),
    Bearer(String),
}

/// Production oracle backed by Gemini.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    config: OracleConfig,
    http: reqwest::Client,
    explicit_credential: Option<String>,
}

impl GeminiClient {
    /// Create a client from configuration.
    #[must_use]
    pub fn new(config: OracleConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            explicit_credential: None,
        }
    }

    /// Use `credential` instead of reading it from the environment.
    ///
    /// It is sent as an API key, or as a bearer token when a project is
    /// configured.
    #[must_use]
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.explicit_credential = Some(credential.into());
        self
    }

    /// The client configuration.
    #[must_use]
    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    /// Full `generateContent` URL for the configured model.
    #[must_use]
    pub fn endpoint(&self) -> String {
        let model = &self.config.model;
        match (&self.config.project, &self.config.api_base) {
            (Some(project), base) => {
                let location = &self.config.location;
                let base = base.clone().unwrap_or_else(|| {
                    format!("https://{location}-aiplatform.googleapis.com/v1")
                });
                format!(
                    "{}/projects/{project}/locations/{location}/publishers/google/models/{model}:generateContent",
                    base.trim_end_matches('/')
                )
            }
            (None, base) => {
                let base = base.as_deref().unwrap_or(GEMINI_API_BASE);
                format!(
                    "{}/models/{model}:generateContent",
                    base.trim_end_matches('/')
                )
            }
        }
    }

    fn credential(&self) -> Result<Credential, OracleError> {
        let (env_var, vertex) = if self.config.uses_vertex() {
            (&self.config.access_token_env, true)
        } else {
            (&self.config.api_key_env, false)
        };

        let secret = match &self.explicit_credential {
            Some(secret) => secret.clone(),
            None => env::var(env_var)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| OracleError::CredentialsNotFound {
                    env_var: env_var.clone(),
                })?,
        };

        Ok(if vertex {
            Credential::Bearer(secret)
        } else {
            Credential::ApiKey(secret)
        })
    }

    fn build_body<'a>(&self, request: &'a OracleRequest) -> GenerateContentRequest<'a> {
        GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart {
                    text: &request.prompt,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                max_output_tokens: self.config.max_output_tokens,
                response_mime_type: "application/json",
                response_schema: &request.schema,
            },
            safety_settings: SAFETY_CATEGORIES
                .into_iter()
                .map(|category| SafetySetting {
                    category,
                    threshold: "OFF",
                })
                .collect(),
        }
    }
}

/// Pull the response text out of a `generateContent` body.
fn extract_text(body: &str) -> Result<String, OracleError> {
    let parsed: GenerateContentResponse =
        serde_json::from_str(body).map_err(|e| OracleError::InvalidResponse {
            message: format!("unparseable generateContent body: {e}"),
        })?;

    if let Some(reason) = parsed.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(OracleError::InvalidResponse {
            message: format!("prompt blocked: {reason}"),
        });
    }

    let candidate = parsed
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| OracleError::InvalidResponse {
            message: "response has no candidates".to_string(),
        })?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        return Err(OracleError::InvalidResponse {
            message: format!(
                "candidate has no text (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            ),
        });
    }

    Ok(text)
}

#[async_trait]
impl Oracle for GeminiClient {
    async fn generate(&self, request: &OracleRequest) -> Result<String, OracleError> {
        let credential = self.credential()?;
        let url = self.endpoint();
        let body = self.build_body(request);

        debug!(
            "Sending {} request to {} ({} chars prompt)",
            request.purpose,
            self.config.model,
            request.prompt.len()
        );

        let builder = self.http.post(&url).json(&body);
        let builder = match credential {
            Credential::ApiKey(key) => builder.header("x-goog-api-key", key),
            Credential::Bearer(token) => builder.bearer_auth(token),
        };

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                OracleError::Timeout { timeout_secs: 0 }
            } else {
                OracleError::ConnectionError {
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| OracleError::ConnectionError {
                message: format!("failed to read response body: {e}"),
            })?;

        if !status.is_success() {
            return Err(OracleError::from_response(status.as_u16(), &text));
        }

        let content = extract_text(&text)?;
        debug!(
            "Received {} response ({} chars)",
            request.purpose,
            content.len()
        );
        Ok(content)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{bearer_token, body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEXT_RESPONSE: &str =
        r#"{"candidates":[{"content":{"parts":[{"text":"[]"}]},"finishReason":"STOP"}]}"#;

    fn request() -> OracleRequest {
        OracleRequest::new(
            "classify",
            "What broke?",
            serde_json::json!({"type": "ARRAY", "items": {"type": "STRING"}}),
        )
    }

    /// Client pointed at the mock server.
    fn client_for(server: &MockServer, project: Option<&str>) -> GeminiClient {
        let config = OracleConfig {
            api_base: Some(server.uri()),
            project: project.map(str::to_string),
            ..OracleConfig::default()
        };
        GeminiClient::new(config).with_credential("test-secret")
    }

    #[test]
    fn test_endpoint_gemini_api() {
        let client = GeminiClient::new(OracleConfig::default());
        assert_eq!(
            client.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash-001:generateContent"
        );
    }

    #[test]
    fn test_endpoint_vertex() {
        let config = OracleConfig {
            project: Some("demo-project".into()),
            location: "europe-west4".into(),
            ..OracleConfig::default()
        };
        let client = GeminiClient::new(config);
        assert_eq!(
            client.endpoint(),
            "https://europe-west4-aiplatform.googleapis.com/v1/projects/demo-project/locations/europe-west4/publishers/google/models/gemini-2.0-flash-001:generateContent"
        );
    }

    #[test]
    fn test_endpoint_custom_base() {
        let config = OracleConfig {
            api_base: Some("http://localhost:9000/".into()),
            model: "m".into(),
            ..OracleConfig::default()
        };
        let client = GeminiClient::new(config);
        assert_eq!(
            client.endpoint(),
            "http://localhost:9000/models/m:generateContent"
        );
    }

    #[test]
    fn test_build_body_shape() {
        let client = GeminiClient::new(OracleConfig::default());
        let req = request();
        let body = serde_json::to_value(client.build_body(&req)).unwrap();

        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "What broke?");
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 8192);
        assert_eq!(body["generationConfig"]["responseSchema"]["type"], "ARRAY");
        assert_eq!(body["safetySettings"].as_array().unwrap().len(), 4);
        assert_eq!(body["safetySettings"][0]["threshold"], "OFF");
    }

    #[test]
    fn test_credential_missing() {
        let config = OracleConfig {
            api_key_env: "MENDER_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..OracleConfig::default()
        };
        let client = GeminiClient::new(config);
        assert_eq!(
            client.credential(),
            Err(OracleError::CredentialsNotFound {
                env_var: "MENDER_TEST_KEY_THAT_IS_NEVER_SET".into()
            })
        );
    }

    #[test]
    fn test_credential_kind_follows_project() {
        let client = GeminiClient::new(OracleConfig::default()).with_credential("k");
        assert_eq!(client.credential(), Ok(Credential::ApiKey("k".into())));

        let config = OracleConfig {
            project: Some("p".into()),
            ..OracleConfig::default()
        };
        let client = GeminiClient::new(config).with_credential("t");
        assert_eq!(client.credential(), Ok(Credential::Bearer("t".into())));
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"[{\"a\":"},{"text":"1}]"}]},"finishReason":"STOP"}]}"#;
        assert_eq!(extract_text(body).unwrap(), r#"[{"a":1}]"#);
    }

    #[test]
    fn test_extract_text_blocked_prompt() {
        let body = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        let err = extract_text(body).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_extract_text_no_candidates() {
        assert!(matches!(
            extract_text(r#"{"candidates":[]}"#),
            Err(OracleError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_extract_text_empty_candidate() {
        let body = r#"{"candidates":[{"finishReason":"MAX_TOKENS"}]}"#;
        let err = extract_text(body).unwrap_err();
        assert!(err.to_string().contains("MAX_TOKENS"));
    }

    #[tokio::test]
    async fn test_generate_with_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.0-flash-001:generateContent"))
            .and(header("x-goog-api-key", "test-secret"))
            .and(body_partial_json(json!({
                "contents": [{"role": "user", "parts": [{"text": "What broke?"}]}],
                "generationConfig": {
                    "responseMimeType": "application/json",
                    "responseSchema": {"type": "ARRAY", "items": {"type": "STRING"}}
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(TEXT_RESPONSE))
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server, None).generate(&request()).await.unwrap();
        assert_eq!(text, "[]");
    }

    #[tokio::test]
    async fn test_generate_on_vertex_uses_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(
                "/projects/demo-project/locations/us-central1/publishers/google/models/gemini-2.0-flash-001:generateContent",
            ))
            .and(bearer_token("test-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string(TEXT_RESPONSE))
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server, Some("demo-project"))
            .generate(&request())
            .await
            .unwrap();
        assert_eq!(text, "[]");
    }

    #[tokio::test]
    async fn test_generate_maps_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string(
                r#"{"error":{"code":429,"message":"Resource exhausted","details":[{"retryDelay":"3s"}]}}"#,
            ))
            .mount(&server)
            .await;

        let err = client_for(&server, None)
            .generate(&request())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn test_generate_maps_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_string(r#"{"error":{"code":403,"message":"API key not valid"}}"#),
            )
            .mount(&server)
            .await;

        let err = client_for(&server, None)
            .generate(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::AuthenticationFailed { .. }));
        assert!(!err.is_retryable());
    }
}
