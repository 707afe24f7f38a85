//! Provider-agnostic single-call engine
//!
//! The adapter owns one client per configured provider, translates requests
//! through them, retries transient failures with exponential backoff and
//! fills in gateway-side accounting (cost, normalized usage). Only rate
//! limits and provider outages are retried; everything else surfaces to the
//! caller (the router may still fall back).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::GatewaySettings;
use crate::contracts::{
    ChunkStream, CompletionRequest, CompletionResponse, ExtendedCompletionRequest,
    ExtendedCompletionResponse, Message,
};
use crate::error::{GatewayError, GatewayResult};
use crate::providers::{anthropic, deepseek, openai, ProviderClient};
use crate::registry::{ModelRegistry, Provider};

/// Flat fallback prices for models missing from the registry, per token
const FALLBACK_INPUT_COST: f64 = 0.000_01;
const FALLBACK_OUTPUT_COST: f64 = 0.000_03;

/// Timeout for health probes, much shorter than completion calls
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry behavior for one provider call
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_wait: f64,
    pub max_wait: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_wait: 1.0,
            max_wait: 60.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self {
            max_attempts: settings.max_retries.max(1),
            initial_wait: settings.retry_min_wait,
            max_wait: settings.retry_max_wait,
        }
    }
}

/// Run `call`, retrying with exponential backoff while the error is
/// retryable. The final error is re-raised unchanged.
pub(crate) async fn execute_with_retry<T, F, Fut>(
    policy: RetryPolicy,
    mut call: F,
) -> GatewayResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = GatewayResult<T>>,
{
    let mut wait = policy.initial_wait.max(0.0);
    let mut attempt = 1u32;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(error) if error.retryable() && attempt < policy.max_attempts => {
                warn!(
                    attempt,
                    wait_seconds = wait,
                    error = %error,
                    "retryable provider failure, backing off"
                );
                tokio::time::sleep(Duration::from_secs_f64(wait)).await;
                wait = (wait * 2.0).min(policy.max_wait);
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

/// The provider-agnostic engine
pub struct Adapter {
    clients: HashMap<Provider, Arc<dyn ProviderClient>>,
    registry: Arc<ModelRegistry>,
    retry_policy: RetryPolicy,
    default_model: String,
}

impl Adapter {
    /// Build clients for every provider with configured credentials
    pub fn from_settings(settings: &GatewaySettings, registry: Arc<ModelRegistry>) -> Self {
        let mut clients: HashMap<Provider, Arc<dyn ProviderClient>> = HashMap::new();

        if !settings.openai_api_key.is_empty() {
            let mut config = openai::OpenAiConfig::with_api_key(settings.openai_api_key.clone());
            if !settings.openai_api_base.is_empty() {
                config.base_url = settings.openai_api_base.clone();
            }
            config.timeout_seconds = settings.timeout_seconds;
            clients.insert(
                Provider::OpenAI,
                Arc::new(openai::OpenAiClient::new(config)),
            );
            debug!("openai provider initialized");
        }

        if !settings.anthropic_api_key.is_empty() {
            let mut config =
                anthropic::AnthropicConfig::with_api_key(settings.anthropic_api_key.clone());
            config.timeout_seconds = settings.timeout_seconds;
            clients.insert(
                Provider::Anthropic,
                Arc::new(anthropic::AnthropicClient::new(config)),
            );
            debug!("anthropic provider initialized");
        }

        if !settings.deepseek_api_key.is_empty() {
            let mut config =
                deepseek::DeepSeekConfig::with_api_key(settings.deepseek_api_key.clone());
            config.base_url = settings.deepseek_api_base.clone();
            config.timeout_seconds = settings.timeout_seconds;
            clients.insert(
                Provider::DeepSeek,
                Arc::new(deepseek::DeepSeekClient::new(config)),
            );
            debug!("deepseek provider initialized");
        }

        if clients.is_empty() {
            warn!("no provider credentials configured, adapter cannot place calls");
        }

        Self {
            clients,
            registry,
            retry_policy: RetryPolicy::from_settings(settings),
            default_model: settings.default_model.clone(),
        }
    }

    /// Adapter over explicit clients, used by tests and by router deployments
    pub fn with_clients(
        clients: HashMap<Provider, Arc<dyn ProviderClient>>,
        registry: Arc<ModelRegistry>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            clients,
            registry,
            retry_policy,
            default_model: "gpt-4".to_string(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// Which provider serves a model, by id convention then client claims
    pub fn provider_for_model(&self, model: &str) -> GatewayResult<Provider> {
        let by_prefix = if model.starts_with("gpt-") || model.starts_with("o1-") {
            Some(Provider::OpenAI)
        } else if model.starts_with("claude-") {
            Some(Provider::Anthropic)
        } else if model.starts_with("deepseek") {
            Some(Provider::DeepSeek)
        } else {
            self.registry.get(model).map(|info| info.provider)
        };

        if let Some(provider) = by_prefix {
            if self.clients.contains_key(&provider) {
                return Ok(provider);
            }
        }

        self.clients
            .iter()
            .find(|(_, client)| client.supports_model(model))
            .map(|(provider, _)| *provider)
            .ok_or_else(|| GatewayError::ModelNotAvailable {
                model: model.to_string(),
                message: "no configured provider serves this model".to_string(),
            })
    }

    fn client_for_model(&self, model: &str) -> GatewayResult<Arc<dyn ProviderClient>> {
        let provider = self.provider_for_model(model)?;
        self.clients
            .get(&provider)
            .cloned()
            .ok_or_else(|| GatewayError::ModelNotAvailable {
                model: model.to_string(),
                message: format!("provider {} not configured", provider),
            })
    }

    /// Blocking completion against whichever provider serves `request.model`
    pub async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> GatewayResult<CompletionResponse> {
        let client = self.client_for_model(&request.model)?;
        self.complete_on(client.as_ref(), request).await
    }

    /// Blocking completion against a specific client (router deployments)
    pub async fn complete_on(
        &self,
        client: &dyn ProviderClient,
        request: &CompletionRequest,
    ) -> GatewayResult<CompletionResponse> {
        let response =
            execute_with_retry(self.retry_policy, || client.complete(request)).await?;
        Ok(self.settle(response))
    }

    /// Streaming completion. Retries apply only to establishing the stream;
    /// once the first chunk exists, failures abort the sequence.
    pub async fn stream_complete(&self, request: &CompletionRequest) -> GatewayResult<ChunkStream> {
        let client = self.client_for_model(&request.model)?;
        execute_with_retry(self.retry_policy, || client.stream_complete(request)).await
    }

    pub async fn stream_complete_on(
        &self,
        client: &dyn ProviderClient,
        request: &CompletionRequest,
    ) -> GatewayResult<ChunkStream> {
        execute_with_retry(self.retry_policy, || client.stream_complete(request)).await
    }

    /// Tool-calling completion
    pub async fn complete_with_tools(
        &self,
        request: &ExtendedCompletionRequest,
    ) -> GatewayResult<ExtendedCompletionResponse> {
        let client = self.client_for_model(&request.model)?;
        let mut response =
            execute_with_retry(self.retry_policy, || client.complete_with_tools(request))
                .await?;
        response.usage = response.usage.normalized();
        if response.cost_usd == 0.0 {
            response.cost_usd = self.estimate_cost(
                &response.model,
                response.usage.prompt_tokens,
                response.usage.completion_tokens,
            );
        }
        Ok(response)
    }

    /// Minimal one-token probe with a short timeout. Unlike `complete`, the
    /// probe is never retried here; the health checker spaces its own retries.
    pub async fn probe_model(&self, model: &str) -> GatewayResult<()> {
        let request = CompletionRequest::new(model, vec![Message::user("ping")])?
            .with_max_tokens(1)?;
        let client = self.client_for_model(model)?;

        match tokio::time::timeout(HEALTH_PROBE_TIMEOUT, client.complete(&request)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(GatewayError::Timeout {
                model: model.to_string(),
                timeout_secs: HEALTH_PROBE_TIMEOUT.as_secs(),
            }),
        }
    }

    /// Convenience wrapper over `probe_model`
    pub async fn health_check(&self, model: Option<&str>) -> bool {
        let model = model.unwrap_or(&self.default_model).to_string();
        match self.probe_model(&model).await {
            Ok(()) => true,
            Err(error) => {
                warn!(model = %model, error = %error, "health probe failed");
                false
            }
        }
    }

    /// Upper-bound token estimate: roughly four characters per token
    pub fn estimate_tokens(&self, messages: &[Message]) -> u32 {
        let total_chars: usize = messages.iter().map(|m| m.content.len()).sum();
        (total_chars / 4) as u32 + messages.len() as u32
    }

    /// Cost for a call, from registry prices with a flat fallback for
    /// unknown models
    pub fn estimate_cost(&self, model: &str, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        self.registry
            .estimate_cost(model, prompt_tokens, completion_tokens)
            .unwrap_or_else(|| {
                prompt_tokens as f64 * FALLBACK_INPUT_COST
                    + completion_tokens as f64 * FALLBACK_OUTPUT_COST
            })
    }

    /// Immutable snapshot of every model the configured clients serve
    pub fn get_supported_models(&self) -> Vec<String> {
        let mut models: Vec<String> = self
            .clients
            .values()
            .flat_map(|client| client.supported_models())
            .collect();
        models.sort();
        models.dedup();
        models
    }

    pub fn available_providers(&self) -> Vec<Provider> {
        self.clients.keys().copied().collect()
    }

    /// Enforce response invariants and fill gateway-side cost
    fn settle(&self, mut response: CompletionResponse) -> CompletionResponse {
        response.usage = response.usage.normalized();
        if response.cost_usd == 0.0 {
            response.cost_usd = self.estimate_cost(
                &response.model,
                response.usage.prompt_tokens,
                response.usage.completion_tokens,
            );
        }
        response
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Scripted provider client used across the crate's tests

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::contracts::{FinishReason, UsageInfo};

    pub struct ScriptedClient {
        provider: Provider,
        models: Vec<String>,
        outcomes: Mutex<Vec<GatewayResult<CompletionResponse>>>,
        pub calls: AtomicUsize,
    }

    impl ScriptedClient {
        pub fn new(
            provider: Provider,
            models: &[&str],
            outcomes: Vec<GatewayResult<CompletionResponse>>,
        ) -> Self {
            Self {
                provider,
                models: models.iter().map(|m| m.to_string()).collect(),
                outcomes: Mutex::new(outcomes),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    pub fn ok_response(model: &str, content: &str) -> CompletionResponse {
        CompletionResponse {
            content: content.to_string(),
            model: model.to_string(),
            usage: UsageInfo::new(10, 20),
            finish_reason: FinishReason::Stop,
            latency_ms: 1.0,
            cost_usd: 0.0,
        }
    }

    #[async_trait]
    impl ProviderClient for ScriptedClient {
        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> GatewayResult<CompletionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().expect("outcomes lock poisoned");
            if outcomes.is_empty() {
                Ok(ok_response(&request.model, "scripted"))
            } else {
                outcomes.remove(0)
            }
        }

        async fn stream_complete(
            &self,
            request: &CompletionRequest,
        ) -> GatewayResult<ChunkStream> {
            let response = self.complete(request).await?;
            let chunks = vec![
                Ok(crate::contracts::StreamChunk {
                    content: response.content,
                    ..Default::default()
                }),
                Ok(crate::contracts::StreamChunk {
                    finish_reason: Some(FinishReason::Stop),
                    usage: Some(response.usage),
                    ..Default::default()
                }),
            ];
            Ok(Box::pin(futures::stream::iter(chunks)))
        }

        async fn complete_with_tools(
            &self,
            request: &ExtendedCompletionRequest,
        ) -> GatewayResult<ExtendedCompletionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ExtendedCompletionResponse {
                content: None,
                model: request.model.clone(),
                usage: UsageInfo::new(10, 5),
                finish_reason: FinishReason::ToolCalls,
                tool_calls: Some(vec![crate::contracts::ToolCallResponse {
                    id: "call_1".to_string(),
                    function_name: "get_weather".to_string(),
                    arguments: "{\"location\":\"Tokyo\"}".to_string(),
                }]),
                latency_ms: 1.0,
                cost_usd: 0.0,
            })
        }

        fn provider(&self) -> Provider {
            self.provider
        }

        fn supported_models(&self) -> Vec<String> {
            self.models.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{ok_response, ScriptedClient};
    use super::*;
    use futures::StreamExt;

    fn adapter_with(client: Arc<ScriptedClient>) -> Adapter {
        let mut clients: HashMap<Provider, Arc<dyn ProviderClient>> = HashMap::new();
        clients.insert(client.provider(), client);
        Adapter::with_clients(clients, Arc::new(ModelRegistry::new()), RetryPolicy::default())
    }

    fn request(model: &str) -> CompletionRequest {
        CompletionRequest::new(model, vec![Message::user("Hello")]).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_retried() {
        let client = Arc::new(ScriptedClient::new(
            Provider::OpenAI,
            &["gpt-4"],
            vec![
                Err(GatewayError::RateLimit {
                    message: "slow down".into(),
                }),
                Ok(ok_response("gpt-4", "after retry")),
            ],
        ));
        let adapter = adapter_with(client.clone());

        let response = adapter.complete(&request("gpt-4")).await.unwrap();
        assert_eq!(response.content, "after retry");
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn test_context_length_is_not_retried() {
        let client = Arc::new(ScriptedClient::new(
            Provider::OpenAI,
            &["gpt-4"],
            vec![Err(GatewayError::ContextLength {
                model: "gpt-4".into(),
                tokens: 0,
                max_tokens: 0,
            })],
        ));
        let adapter = adapter_with(client.clone());

        let error = adapter.complete(&request("gpt-4")).await.unwrap_err();
        assert!(matches!(error, GatewayError::ContextLength { .. }));
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_cap_and_reraise_last_error() {
        let client = Arc::new(ScriptedClient::new(
            Provider::OpenAI,
            &["gpt-4"],
            vec![
                Err(GatewayError::ServiceUnavailable { message: "1".into() }),
                Err(GatewayError::ServiceUnavailable { message: "2".into() }),
                Err(GatewayError::ServiceUnavailable { message: "3".into() }),
            ],
        ));
        let adapter = adapter_with(client.clone());

        let error = adapter.complete(&request("gpt-4")).await.unwrap_err();
        match error {
            GatewayError::ServiceUnavailable { message } => assert_eq!(message, "3"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn test_cost_filled_from_registry() {
        let client = Arc::new(ScriptedClient::new(Provider::OpenAI, &["gpt-4"], vec![]));
        let adapter = adapter_with(client);

        let response = adapter.complete(&request("gpt-4")).await.unwrap();
        // usage 10/20 against gpt-4 prices 0.03/0.06 per 1k
        let expected = (10.0 * 0.03 + 20.0 * 0.06) / 1000.0;
        assert!((response.cost_usd - expected).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_unknown_model_is_rejected() {
        let client = Arc::new(ScriptedClient::new(Provider::OpenAI, &["gpt-4"], vec![]));
        let adapter = adapter_with(client);

        let error = adapter.complete(&request("mystery-model")).await.unwrap_err();
        assert!(matches!(error, GatewayError::ModelNotAvailable { .. }));
    }

    #[tokio::test]
    async fn test_stream_yields_chunks_in_order() {
        let client = Arc::new(ScriptedClient::new(Provider::OpenAI, &["gpt-4"], vec![]));
        let adapter = adapter_with(client);

        let mut stream = adapter.stream_complete(&request("gpt-4")).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.content, "scripted");
        let last = stream.next().await.unwrap().unwrap();
        assert!(last.usage.is_some());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_tool_round_trip() {
        let client = Arc::new(ScriptedClient::new(Provider::OpenAI, &["gpt-4"], vec![]));
        let adapter = adapter_with(client);

        let request = ExtendedCompletionRequest::new(
            "gpt-4",
            vec![crate::contracts::ExtendedMessage::text(
                crate::contracts::Role::User,
                "What's the weather in Tokyo?",
            )],
        )
        .unwrap();

        let response = adapter.complete_with_tools(&request).await.unwrap();
        assert_eq!(response.finish_reason, crate::contracts::FinishReason::ToolCalls);
        let calls = response.tool_calls.unwrap();
        assert_eq!(calls[0].function_name, "get_weather");
        assert_eq!(calls[0].arguments, "{\"location\":\"Tokyo\"}");
        assert!(response.content.is_none());
    }

    #[test]
    fn test_token_estimation_is_an_upper_bound_heuristic() {
        let client = Arc::new(ScriptedClient::new(Provider::OpenAI, &["gpt-4"], vec![]));
        let adapter = adapter_with(client);

        let messages = vec![Message::user("abcdefgh"), Message::system("ijkl")];
        // 12 chars / 4 + 2 messages
        assert_eq!(adapter.estimate_tokens(&messages), 5);
    }

    #[test]
    fn test_cost_estimate_fallback_for_unknown_model() {
        let client = Arc::new(ScriptedClient::new(Provider::OpenAI, &["gpt-4"], vec![]));
        let adapter = adapter_with(client);

        let cost = adapter.estimate_cost("mystery-model", 100, 100);
        assert!((cost - (100.0 * 0.00001 + 100.0 * 0.00003)).abs() < 1e-12);
    }

    #[test]
    fn test_supported_models_snapshot() {
        let client = Arc::new(ScriptedClient::new(
            Provider::OpenAI,
            &["gpt-4", "gpt-3.5-turbo"],
            vec![],
        ));
        let adapter = adapter_with(client);
        let models = adapter.get_supported_models();
        assert_eq!(models, vec!["gpt-3.5-turbo", "gpt-4"]);
    }
}
