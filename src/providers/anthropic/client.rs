//! Anthropic provider client

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use tracing::debug;

use crate::contracts::{
    ChunkStream, CompletionRequest, CompletionResponse, ExtendedCompletionRequest,
    ExtendedCompletionResponse, UsageInfo,
};
use crate::error::{GatewayError, GatewayResult};
use crate::providers::{map_status_error, map_transport_error, ProviderClient};
use crate::registry::Provider;
use crate::sse;

use super::config::{default_models, AnthropicConfig, ANTHROPIC_VERSION};
use super::types::{AnthropicRequest, AnthropicResponse};

/// Client for the Anthropic messages API
pub struct AnthropicClient {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicClient {
    pub fn new(config: AnthropicConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self::new(AnthropicConfig::with_api_key(api_key))
    }

    fn headers(&self) -> GatewayResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.config.api_key).map_err(|e| {
                GatewayError::Authentication {
                    provider: Provider::Anthropic.to_string(),
                    message: format!("malformed api key: {}", e),
                }
            })?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        Ok(headers)
    }

    async fn post_messages(
        &self,
        model: &str,
        wire_request: &AnthropicRequest,
    ) -> GatewayResult<reqwest::Response> {
        let url = format!("{}/v1/messages", self.config.base_url);
        debug!(url = %url, model, "anthropic request");

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
            return Err(map_status_error(Provider::Anthropic, model, status, &body));
        }
        Ok(response)
    }

    async fn read_response(
        response: reqwest::Response,
    ) -> GatewayResult<AnthropicResponse> {
        response.json().await.map_err(|e| GatewayError::Provider {
            message: format!("undeserializable response: {}", e),
        })
    }
}

#[async_trait]
impl ProviderClient for AnthropicClient {
    async fn complete(&self, request: &CompletionRequest) -> GatewayResult<CompletionResponse> {
        let started = Instant::now();
        let wire_request = AnthropicRequest::from_request(request);
        let response = self.post_messages(&request.model, &wire_request).await?;
        let parsed = Self::read_response(response).await?;
        let finish_reason = parsed.finish_reason();

        Ok(CompletionResponse {
            content: parsed.text(),
            model: parsed.model.clone(),
            usage: UsageInfo::from(parsed.usage),
            finish_reason,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
            cost_usd: 0.0,
        })
    }

    async fn stream_complete(&self, request: &CompletionRequest) -> GatewayResult<ChunkStream> {
        let wire_request = AnthropicRequest::from_request(request).streaming();
        let response = self.post_messages(&request.model, &wire_request).await?;

        // message_start carries the prompt token count; the decoder threads it
        // through so the terminal chunk reports full usage
        let mut prompt_tokens = 0u32;
        let stream = sse::response_to_sse_stream(response)
            .map(move |event_result| {
                event_result
                    .and_then(|event| sse::anthropic::chunk_from_event(&event, &mut prompt_tokens))
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
        let wire_request = AnthropicRequest::from_extended(request);
        let response = self.post_messages(&request.model, &wire_request).await?;
        let parsed = Self::read_response(response).await?;

        let text = parsed.text();
        let finish_reason = parsed.finish_reason();
        let tool_calls = parsed.tool_calls();
        Ok(ExtendedCompletionResponse {
            content: if text.is_empty() { None } else { Some(text) },
            model: parsed.model.clone(),
            usage: UsageInfo::from(parsed.usage),
            finish_reason,
            tool_calls,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
            cost_usd: 0.0,
        })
    }

    fn provider(&self) -> Provider {
        Provider::Anthropic
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
        let client = AnthropicClient::with_api_key("test-key");
        assert_eq!(client.provider(), Provider::Anthropic);
        assert!(client.supports_model("claude-3-opus"));
        assert!(!client.supports_model("gpt-4"));
    }
}
