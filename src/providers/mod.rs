//! Provider clients
//!
//! One subdirectory per upstream provider, each with:
//! - `client.rs`: the HTTP client implementation
//! - `config.rs`: provider-specific configuration and model defaults
//! - `types.rs`: provider wire types (DeepSeek reuses the OpenAI wire format)

pub mod anthropic;
pub mod deepseek;
pub mod openai;

use async_trait::async_trait;

use crate::contracts::{
    ChunkStream, CompletionRequest, CompletionResponse, ExtendedCompletionRequest,
    ExtendedCompletionResponse,
};
use crate::error::{GatewayError, GatewayResult};
use crate::registry::Provider;

pub use anthropic::AnthropicClient;
pub use deepseek::DeepSeekClient;
pub use openai::OpenAiClient;

/// One provider endpoint the adapter can call
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Blocking chat completion
    async fn complete(&self, request: &CompletionRequest) -> GatewayResult<CompletionResponse>;

    /// Streaming chat completion; chunks arrive in provider order
    async fn stream_complete(&self, request: &CompletionRequest) -> GatewayResult<ChunkStream>;

    /// Completion with tool definitions and multi-modal messages
    async fn complete_with_tools(
        &self,
        request: &ExtendedCompletionRequest,
    ) -> GatewayResult<ExtendedCompletionResponse>;

    fn provider(&self) -> Provider;

    fn supported_models(&self) -> Vec<String>;

    fn supports_model(&self, model: &str) -> bool {
        self.supported_models().iter().any(|m| m == model)
    }
}

/// Shape of error bodies on OpenAI-compatible APIs
#[derive(Debug, serde::Deserialize)]
pub(crate) struct WireErrorBody {
    pub error: WireErrorDetails,
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct WireErrorDetails {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub code: Option<String>,
    pub param: Option<String>,
}

/// Translate an HTTP error status into the gateway taxonomy. Providers share
/// status semantics closely enough that one table covers them; the error body
/// refines 400s into context-length and content-filter kinds.
pub(crate) fn map_status_error(
    provider: Provider,
    model: &str,
    status: u16,
    body: &str,
) -> GatewayError {
    let details = serde_json::from_str::<WireErrorBody>(body)
        .map(|parsed| parsed.error)
        .ok();
    let message = details
        .as_ref()
        .map(|d| d.message.clone())
        .unwrap_or_else(|| body.to_string());
    let marker = details
        .as_ref()
        .and_then(|d| d.code.clone().or_else(|| d.error_type.clone()))
        .unwrap_or_default();

    match status {
        401 | 403 => GatewayError::Authentication {
            provider: provider.to_string(),
            message,
        },
        404 => GatewayError::ModelNotAvailable {
            model: model.to_string(),
            message,
        },
        429 => GatewayError::RateLimit { message },
        400 | 413 | 422 => {
            if marker.contains("context_length") || message.contains("context length") {
                // Providers rarely report the figures; zeros mean unknown
                GatewayError::ContextLength {
                    model: model.to_string(),
                    tokens: 0,
                    max_tokens: 0,
                }
            } else if marker.contains("content_policy")
                || marker.contains("content_filter")
                || message.contains("content policy")
            {
                GatewayError::ContentFilter {
                    model: model.to_string(),
                    reason: message,
                }
            } else {
                GatewayError::InvalidRequest {
                    message,
                    param: details.and_then(|d| d.param),
                }
            }
        }
        500 | 502 | 503 | 529 => GatewayError::ServiceUnavailable { message },
        _ => GatewayError::Provider {
            message: format!("HTTP {}: {}", status, message),
        },
    }
}

/// Translate a transport-level failure (no HTTP status available)
pub(crate) fn map_transport_error(
    model: &str,
    timeout_secs: u64,
    error: reqwest::Error,
) -> GatewayError {
    if error.is_timeout() {
        GatewayError::Timeout {
            model: model.to_string(),
            timeout_secs,
        }
    } else {
        GatewayError::Provider {
            message: format!("request failed: {}", error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping_table() {
        let err = map_status_error(Provider::OpenAI, "gpt-4", 401, "{}");
        assert!(matches!(err, GatewayError::Authentication { .. }));

        let err = map_status_error(Provider::OpenAI, "gpt-4", 429, "{}");
        assert!(matches!(err, GatewayError::RateLimit { .. }));
        assert!(err.retryable());

        let err = map_status_error(Provider::OpenAI, "gpt-4", 503, "{}");
        assert!(matches!(err, GatewayError::ServiceUnavailable { .. }));
        assert!(err.retryable());

        let err = map_status_error(Provider::OpenAI, "gpt-9", 404, "{}");
        assert!(matches!(err, GatewayError::ModelNotAvailable { .. }));
    }

    #[test]
    fn test_context_length_refinement() {
        let body = r#"{"error":{"message":"This model's maximum context length is 8192 tokens","type":"invalid_request_error","code":"context_length_exceeded","param":null}}"#;
        let err = map_status_error(Provider::OpenAI, "gpt-4", 400, body);
        assert!(matches!(err, GatewayError::ContextLength { .. }));
    }

    #[test]
    fn test_content_filter_refinement() {
        let body = r#"{"error":{"message":"flagged","type":"content_policy_violation","code":null,"param":null}}"#;
        let err = map_status_error(Provider::OpenAI, "gpt-4", 400, body);
        assert!(matches!(err, GatewayError::ContentFilter { .. }));
    }

    #[test]
    fn test_plain_bad_request_keeps_param() {
        let body = r#"{"error":{"message":"bad temperature","type":"invalid_request_error","code":null,"param":"temperature"}}"#;
        let err = map_status_error(Provider::OpenAI, "gpt-4", 400, body);
        match err {
            GatewayError::InvalidRequest { param, .. } => {
                assert_eq!(param.as_deref(), Some("temperature"))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_non_json_error_body_preserved() {
        let err = map_status_error(Provider::Anthropic, "claude-3-opus", 500, "upstream exploded");
        match err {
            GatewayError::ServiceUnavailable { message } => {
                assert_eq!(message, "upstream exploded")
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
