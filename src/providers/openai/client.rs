//! OpenAI provider client

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use tracing::debug;

use crate::contracts::{
    ChunkStream, CompletionRequest, CompletionResponse, ExtendedCompletionRequest,
    ExtendedCompletionResponse, FinishReason, ToolCallResponse, UsageInfo,
};
use crate::error::{GatewayError, GatewayResult};
use crate::providers::{map_status_error, map_transport_error, ProviderClient};
use crate::registry::Provider;
use crate::sse;

use super::config::{default_models, OpenAiConfig};
use super::types::{OpenAiRequest, OpenAiResponse};

/// Client for the OpenAI chat completions API
pub struct OpenAiClient {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self::new(OpenAiConfig::with_api_key(api_key))
    }

    fn headers(&self) -> GatewayResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.config.api_key)).map_err(|e| {
                GatewayError::Authentication {
                    provider: Provider::OpenAI.to_string(),
                    message: format!("malformed api key: {}", e),
                }
            })?,
        );
        if let Some(org) = &self.config.organization {
            headers.insert(
                "OpenAI-Organization",
                HeaderValue::from_str(org).map_err(|e| GatewayError::InvalidRequest {
                    message: format!("malformed organization header: {}", e),
                    param: Some("organization".to_string()),
                })?,
            );
        }
        Ok(headers)
    }

    async fn post_completion(
        &self,
        model: &str,
        wire_request: &OpenAiRequest,
    ) -> GatewayResult<reqwest::Response> {
        let url = format!("{}/chat/completions", self.config.base_url);
        debug!(url = %url, model, "openai request");

        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(wire_request)
            .timeout(Duration::from_secs(self.config.timeout_seconds))
            .send()
            .await
            .map_err(|e| map_transport_error(model, self.config.timeout_seconds, e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(map_status_error(Provider::OpenAI, model, status, &body));
        }
        Ok(response)
    }

    fn parse_response(
        response: OpenAiResponse,
        latency_ms: f64,
    ) -> GatewayResult<CompletionResponse> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Provider {
                message: "response carried no choices".to_string(),
            })?;

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            model: response.model,
            usage: response.usage.map(UsageInfo::from).unwrap_or_default(),
            finish_reason: choice
                .finish_reason
                .as_deref()
                .map(FinishReason::from_provider)
                .unwrap_or(FinishReason::Stop),
            latency_ms,
            cost_usd: 0.0,
        })
    }
}

#[async_trait]
impl ProviderClient for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> GatewayResult<CompletionResponse> {
        let started = Instant::now();
        let wire_request = OpenAiRequest::from_request(request);
        let response = self.post_completion(&request.model, &wire_request).await?;

        let parsed: OpenAiResponse = response.json().await.map_err(|e| GatewayError::Provider {
            message: format!("undeserializable response: {}", e),
        })?;

        Self::parse_response(parsed, started.elapsed().as_secs_f64() * 1000.0)
    }

    async fn stream_complete(&self, request: &CompletionRequest) -> GatewayResult<ChunkStream> {
        let wire_request = OpenAiRequest::from_request(request).streaming();
        let response = self.post_completion(&request.model, &wire_request).await?;

        let stream = sse::response_to_sse_stream(response)
            .map(|event_result| {
                event_result.and_then(|event| sse::openai::chunk_from_event(&event))
            })
            .filter_map(|result| async move {
                match result {
                    Ok(Some(chunk)) => Some(Ok(chunk)),
                    Ok(None) => None,
                    Err(e) => Some(Err(e)),
                }
            });
        Ok(Box::pin(stream))
    }

    async fn complete_with_tools(
        &self,
        request: &ExtendedCompletionRequest,
    ) -> GatewayResult<ExtendedCompletionResponse> {
        let started = Instant::now();
        let wire_request = OpenAiRequest::from_extended(request);
        let response = self.post_completion(&request.model, &wire_request).await?;

        let parsed: OpenAiResponse = response.json().await.map_err(|e| GatewayError::Provider {
            message: format!("undeserializable response: {}", e),
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Provider {
                message: "response carried no choices".to_string(),
            })?;

        let tool_calls = choice
            .message
            .tool_calls
            .map(|calls| calls.iter().map(ToolCallResponse::from).collect());

        Ok(ExtendedCompletionResponse {
            content: choice.message.content,
            model: parsed.model,
            usage: parsed.usage.map(UsageInfo::from).unwrap_or_default(),
            finish_reason: choice
                .finish_reason
                .as_deref()
                .map(FinishReason::from_provider)
                .unwrap_or(FinishReason::Stop),
            tool_calls,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
            cost_usd: 0.0,
        })
    }

    fn provider(&self) -> Provider {
        Provider::OpenAI
    }

    fn supported_models(&self) -> Vec<String> {
        default_models()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_identity() {
        let client = OpenAiClient::with_api_key("test-key");
        assert_eq!(client.provider(), Provider::OpenAI);
        assert!(client.supports_model("gpt-4"));
        assert!(!client.supports_model("claude-3-opus"));
    }

    #[test]
    fn test_parse_response_fills_defaults() {
        let wire: OpenAiResponse = serde_json::from_str(
            r#"{"model":"gpt-4-0613","choices":[{"index":0,"message":{"role":"assistant","content":"Hi"},"finish_reason":"stop"}],"usage":{"prompt_tokens":10,"completion_tokens":20,"total_tokens":30}}"#,
        )
        .unwrap();
        let response = OpenAiClient::parse_response(wire, 12.5).unwrap();
        assert_eq!(response.content, "Hi");
        assert_eq!(response.model, "gpt-4-0613");
        assert_eq!(response.usage.total_tokens, 30);
        assert_eq!(response.finish_reason, FinishReason::Stop);
    }

    #[test]
    fn test_parse_response_computes_missing_total() {
        let wire: OpenAiResponse = serde_json::from_str(
            r#"{"model":"gpt-4","choices":[{"index":0,"message":{"role":"assistant","content":"Hi"},"finish_reason":null}],"usage":{"prompt_tokens":7,"completion_tokens":3}}"#,
        )
        .unwrap();
        let response = OpenAiClient::parse_response(wire, 0.0).unwrap();
        assert_eq!(response.usage.total_tokens, 10);
    }

    #[test]
    fn test_parse_response_rejects_empty_choices() {
        let wire: OpenAiResponse =
            serde_json::from_str(r#"{"model":"gpt-4","choices":[],"usage":null}"#).unwrap();
        assert!(OpenAiClient::parse_response(wire, 0.0).is_err());
    }
}
