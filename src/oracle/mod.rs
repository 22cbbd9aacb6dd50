//! Oracle abstraction over an external reasoning service.
//!
//! The repair loop asks the oracle two questions per failed iteration:
//! which files are implicated by a failure, and what the corrected target
//! should look like. Both are expressed as an [`OracleRequest`]: a prompt
//! plus a JSON schema the response must conform to. The oracle returns raw
//! text, which callers turn into typed values with [`decode()`].
//!
//! # Architecture
//!
//! ```text
//! FailureClassifier ─┐                       ┌─> GeminiClient (HTTP)
//!                    ├─> RetryingOracle<O> ──┤
//! FixSynthesizer ────┘                       └─> MockOracle (tests)
//! ```
//!
//! The [`Oracle`] trait is object-safe and `Send + Sync`, so the loop holds
//! it as `Arc<dyn Oracle>` and tests swap in a scripted mock.

pub mod decode;
pub mod gemini;
pub mod retry;

pub use decode::{
    decode, decode_object, decode_value, object_from_value, strip_code_fence, DecodeError,
};
pub use gemini::GeminiClient;
pub use retry::{calculate_backoff, RetryPolicy, RetryingOracle};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A single structured request to the oracle.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleRequest {
    /// Short name used in logs ("classify", "synthesize").
    pub purpose: &'static str,
    /// Full prompt text.
    pub prompt: String,
    /// JSON schema (OpenAPI subset, as accepted by `responseSchema`).
    pub schema: serde_json::Value,
}

impl OracleRequest {
    /// Create a new request.
    pub fn new(purpose: &'static str, prompt: impl Into<String>, schema: serde_json::Value) -> Self {
        Self {
            purpose,
            prompt: prompt.into(),
            schema,
        }
    }
}

/// Abstraction for the external reasoning service.
///
/// Implementations return the raw response text; schema validation is the
/// caller's job so that a malformed response can degrade gracefully at the
/// component that asked the question.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Send a request and return the raw response text.
    ///
    /// # Errors
    ///
    /// Returns an [`OracleError`] when the service is unreachable, rejects
    /// the request, or returns a body without any text.
    async fn generate(&self, request: &OracleRequest) -> Result<String, OracleError>;

    /// Model identifier used for display.
    fn model_name(&self) -> &str;
}

// =============================================================================
// Oracle Errors
// =============================================================================

/// Errors returned by oracle implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// Rate limit exceeded - should retry with backoff.
    #[error("Rate limit exceeded: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },

    /// Authentication failed - check credentials.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Credentials not found in environment.
    #[error("Credentials not found in environment variable '{env_var}'")]
    CredentialsNotFound { env_var: String },

    /// Invalid request - check prompt/schema.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Server error - may be transient.
    #[error("Server error: {message}")]
    ServerError { message: String },

    /// Network/connection error.
    #[error("Connection error: {message}")]
    ConnectionError { message: String },

    /// Timeout waiting for response.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Response body could not be interpreted.
    #[error("Invalid oracle response: {message}")]
    InvalidResponse { message: String },
}

impl OracleError {
    /// Check if this error indicates the request should be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ServerError { .. }
                | Self::Timeout { .. }
                | Self::ConnectionError { .. }
        )
    }

    /// Server-provided retry delay, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited {
                retry_after_secs: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }

    /// Map an HTTP status code and body to an error.
    pub fn from_response(status_code: u16, body: &str) -> Self {
        match status_code {
            429 => Self::RateLimited {
                message: body.to_string(),
                retry_after_secs: extract_retry_after(body),
            },
            401 | 403 => Self::AuthenticationFailed {
                message: body.to_string(),
            },
            400 | 404 => Self::InvalidRequest {
                message: body.to_string(),
            },
            500..=599 => Self::ServerError {
                message: body.to_string(),
            },
            _ => Self::InvalidResponse {
                message: format!("HTTP {}: {}", status_code, body),
            },
        }
    }
}

/// Extract a retry delay in seconds from an error body.
///
/// Google APIs report `"retryDelay": "17s"` inside `RetryInfo`; free text
/// like "retry after 30 seconds" is accepted too.
fn extract_retry_after(body: &str) -> Option<u64> {
    let patterns = [
        r#""retrydelay"\s*:\s*"(\d+)(?:\.\d+)?s""#,
        r"retry.?after[:\s]+(\d+)",
    ];

    let lower = body.to_lowercase();
    for pattern in patterns {
        if let Ok(re) = regex::Regex::new(pattern) {
            if let Some(secs) = re
                .captures(&lower)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<u64>().ok())
            {
                return Some(secs);
            }
        }
    }
    None
}

// =============================================================================
// Oracle Configuration
// =============================================================================

/// Configuration for the production oracle.
///
/// Loaded from the `[oracle]` table of `mender.toml` and overridable from
/// the command line or environment.
///
/// ```toml
/// [oracle]
/// model = "gemini-2.0-flash-001"
/// project = "my-gcp-project"
/// location = "us-central1"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// Google Cloud project. When set, requests go to Vertex AI.
    #[serde(default)]
    pub project: Option<String>,

    /// Vertex AI region.
    #[serde(default = "default_location")]
    pub location: String,

    /// Environment variable holding the Gemini API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Environment variable holding a Vertex AI bearer token.
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,

    /// Sampling temperature.
    #[serde(default)]
    pub temperature: f32,

    /// Nucleus sampling cutoff.
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Maximum tokens in a response.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Override for the API base URL (proxies, tests).
    #[serde(default)]
    pub api_base: Option<String>,
}

fn default_model() -> String {
    "gemini-2.0-flash-001".to_string()
}

fn default_location() -> String {
    "us-central1".to_string()
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_access_token_env() -> String {
    "GOOGLE_CLOUD_ACCESS_TOKEN".to_string()
}

fn default_top_p() -> f32 {
    0.95
}

fn default_max_output_tokens() -> u32 {
    8192
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            project: None,
            location: default_location(),
            api_key_env: default_api_key_env(),
            access_token_env: default_access_token_env(),
            temperature: 0.0,
            top_p: default_top_p(),
            max_output_tokens: default_max_output_tokens(),
            api_base: None,
        }
    }
}

impl OracleConfig {
    /// Validate the oracle configuration.
    ///
    /// # Errors
    ///
    /// Returns the offending field and reason.
    pub fn validate(&self) -> std::result::Result<(), (String, String)> {
        if self.model.trim().is_empty() {
            return Err(("oracle.model".into(), "must not be empty".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err((
                "oracle.temperature".into(),
                format!("{} is outside 0.0..=2.0", self.temperature),
            ));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err((
                "oracle.top_p".into(),
                format!("{} is outside 0.0..=1.0", self.top_p),
            ));
        }
        if self.max_output_tokens == 0 {
            return Err((
                "oracle.max_output_tokens".into(),
                "must be greater than 0".into(),
            ));
        }
        if matches!(self.project.as_deref(), Some(p) if p.trim().is_empty()) {
            return Err(("oracle.project".into(), "must not be blank".into()));
        }
        Ok(())
    }

    /// Whether requests are routed to Vertex AI.
    #[must_use]
    pub fn uses_vertex(&self) -> bool {
        self.project.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oracle_config_defaults() {
        let config = OracleConfig::default();
        assert_eq!(config.model, "gemini-2.0-flash-001");
        assert_eq!(config.location, "us-central1");
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.max_output_tokens, 8192);
        assert!(!config.uses_vertex());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_oracle_config_deserialize_partial() {
        let config: OracleConfig = toml::from_str(r#"project = "demo""#).unwrap();
        assert_eq!(config.project.as_deref(), Some("demo"));
        assert_eq!(config.model, "gemini-2.0-flash-001");
        assert!(config.uses_vertex());
    }

    #[test]
    fn test_oracle_config_validate_rejects_bad_values() {
        let config = OracleConfig {
            model: "  ".into(),
            ..OracleConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().0, "oracle.model");

        let config = OracleConfig {
            temperature: 3.5,
            ..OracleConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().0, "oracle.temperature");

        let config = OracleConfig {
            project: Some(String::new()),
            ..OracleConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().0, "oracle.project");
    }

    #[test]
    fn test_oracle_error_retryable() {
        assert!(OracleError::from_response(429, "slow down").is_retryable());
        assert!(OracleError::from_response(503, "unavailable").is_retryable());
        assert!(OracleError::Timeout { timeout_secs: 5 }.is_retryable());
        assert!(!OracleError::from_response(401, "bad key").is_retryable());
        assert!(!OracleError::from_response(400, "bad schema").is_retryable());
        assert!(!OracleError::InvalidResponse {
            message: "x".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_oracle_error_from_response_mapping() {
        assert!(matches!(
            OracleError::from_response(403, "denied"),
            OracleError::AuthenticationFailed { .. }
        ));
        assert!(matches!(
            OracleError::from_response(404, "no such model"),
            OracleError::InvalidRequest { .. }
        ));
        assert!(matches!(
            OracleError::from_response(302, "moved"),
            OracleError::InvalidResponse { .. }
        ));
    }

    #[test]
    fn test_retry_after_from_google_retry_info() {
        let body = r#"{"error":{"code":429,"details":[{"@type":"type.googleapis.com/google.rpc.RetryInfo","retryDelay":"17s"}]}}"#;
        let err = OracleError::from_response(429, body);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(17)));
    }

    #[test]
    fn test_retry_after_from_free_text() {
        let err = OracleError::from_response(429, "Please retry after 30 seconds");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));

        let err = OracleError::from_response(429, "quota exhausted");
        assert_eq!(err.retry_after(), None);
    }
}
