//! The gateway call pipeline
//!
//! A blocking call flows: rate-limit admission → cache lookup → span open →
//! routed provider call → cost record → rate-limit settlement → cache write
//! → span close. Streaming follows the same path except the cache is
//! bypassed and chunks flow through as they arrive. Failures of the cache,
//! rate limiter, cost tracker and tracer never fail a user call.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::adapter::Adapter;
use crate::cache::{MemoryCache, ResponseCache};
use crate::config::GatewaySettings;
use crate::contracts::{
    ChunkStream, CompletionRequest, CompletionResponse, ExtendedCompletionRequest,
    ExtendedCompletionResponse, Message, StreamChunk, UsageInfo,
};
use crate::cost::CostTracker;
use crate::error::{GatewayError, GatewayResult};
use crate::health::HealthChecker;
use crate::rate_limit::{MemoryRateLimiter, RateLimitSpec, RateLimiter};
use crate::registry::ModelRegistry;
use crate::router::{DeploymentConfig, Router, RouterConfig};
use crate::telemetry::LlmTracer;

/// In-process cache capacity when no distributed backend is injected
const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Per-call options beyond the request itself
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Task this call is accounted against
    pub task_id: String,
    pub step_id: Option<String>,
    /// Whether the response cache participates in this call
    pub cache: bool,
    /// Per-call TTL override for the cache write
    pub cache_ttl: Option<u64>,
    /// Cooperative cancellation for the in-flight call
    pub cancel: Option<CancellationToken>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            task_id: "adhoc".to_string(),
            step_id: None,
            cache: true,
            cache_ttl: None,
            cancel: None,
        }
    }
}

impl CallOptions {
    pub fn for_task(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            ..Self::default()
        }
    }

    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache = false;
        self
    }
}

/// Front door for completion calls
pub struct Gateway {
    settings: GatewaySettings,
    registry: Arc<ModelRegistry>,
    adapter: Arc<Adapter>,
    router: Option<Arc<Router>>,
    cache: Option<Arc<dyn ResponseCache>>,
    limiter: Option<Arc<dyn RateLimiter>>,
    cost_tracker: Arc<CostTracker>,
    tracer: LlmTracer,
}

impl Gateway {
    /// Wire the gateway from settings with in-process cache and rate-limit
    /// backends. Distributed backends are injected via `with_components`.
    pub fn new(settings: GatewaySettings) -> Self {
        let registry = Arc::new(ModelRegistry::new());
        let adapter = Arc::new(Adapter::from_settings(&settings, registry.clone()));

        let router = if settings.router_enabled {
            let router = Router::new(
                adapter.clone(),
                registry.clone(),
                RouterConfig::from_settings(&settings),
            );
            Self::seed_deployments(&settings, &registry, &router);
            Some(Arc::new(router))
        } else {
            None
        };

        let cache: Option<Arc<dyn ResponseCache>> = if settings.cache_enabled {
            Some(Arc::new(MemoryCache::new(DEFAULT_CACHE_CAPACITY)))
        } else {
            None
        };

        let limiter: Option<Arc<dyn RateLimiter>> = if settings.rate_limit_enabled {
            Some(Arc::new(MemoryRateLimiter::new(RateLimitSpec {
                rpm: settings.default_rpm,
                tpm: settings.default_tpm,
            })))
        } else {
            None
        };

        let cost_tracker = Arc::new(CostTracker::new(settings.budget_usd));
        let tracer = LlmTracer::from_settings(&settings);

        Self {
            settings,
            registry,
            adapter,
            router,
            cache,
            limiter,
            cost_tracker,
            tracer,
        }
    }

    /// Fully injected construction, used by tests and by deployments that
    /// bring distributed cache or rate-limit backends
    #[allow(clippy::too_many_arguments)]
    pub fn with_components(
        settings: GatewaySettings,
        registry: Arc<ModelRegistry>,
        adapter: Arc<Adapter>,
        router: Option<Arc<Router>>,
        cache: Option<Arc<dyn ResponseCache>>,
        limiter: Option<Arc<dyn RateLimiter>>,
        cost_tracker: Arc<CostTracker>,
    ) -> Self {
        let tracer = LlmTracer::from_settings(&settings);
        Self {
            settings,
            registry,
            adapter,
            router,
            cache,
            limiter,
            cost_tracker,
            tracer,
        }
    }

    /// One deployment per registry model of each credentialed provider
    fn seed_deployments(settings: &GatewaySettings, registry: &ModelRegistry, router: &Router) {
        use crate::registry::Provider;

        let credentials = [
            (Provider::OpenAI, &settings.openai_api_key),
            (Provider::Anthropic, &settings.anthropic_api_key),
            (Provider::DeepSeek, &settings.deepseek_api_key),
        ];

        for (provider, api_key) in credentials {
            if api_key.is_empty() {
                continue;
            }
            for model in registry.list_by_provider(provider) {
                let mut config =
                    DeploymentConfig::new(model.model_id.clone(), provider, api_key.clone());
                config.rpm_cap = Some(settings.default_rpm);
                config.tpm_cap = Some(settings.default_tpm);
                if provider == Provider::OpenAI && !settings.openai_api_base.is_empty() {
                    config.base_url = Some(settings.openai_api_base.clone());
                }
                if provider == Provider::DeepSeek {
                    config.base_url = Some(settings.deepseek_api_base.clone());
                }
                // Client construction only fails for providers without a
                // deployment client, which the credential table excludes
                let _ = router.add_deployment(config);
            }
        }
    }

    /// Build a request against the configured call defaults
    pub fn new_request(&self, messages: Vec<Message>) -> GatewayResult<CompletionRequest> {
        CompletionRequest::new(self.settings.default_model.clone(), messages)?
            .with_temperature(self.settings.default_temperature)?
            .with_max_tokens(self.settings.default_max_tokens)
    }

    pub fn registry(&self) -> Arc<ModelRegistry> {
        self.registry.clone()
    }

    pub fn adapter(&self) -> Arc<Adapter> {
        self.adapter.clone()
    }

    pub fn cost_tracker(&self) -> Arc<CostTracker> {
        self.cost_tracker.clone()
    }

    /// A health checker probing through this gateway's adapter
    pub fn health_checker(&self) -> HealthChecker {
        HealthChecker::new(self.adapter.clone(), self.adapter.get_supported_models())
    }

    fn budget_guard(&self) -> GatewayResult<()> {
        if self.settings.cost_tracking_enabled && self.cost_tracker.is_budget_exceeded() {
            let spent = self.cost_tracker.total_cost();
            let budget = self.settings.budget_usd.unwrap_or(0.0);
            return Err(GatewayError::BudgetExceeded {
                spent_usd: spent,
                budget_usd: budget,
            });
        }
        Ok(())
    }

    async fn admit(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> GatewayResult<u32> {
        let estimated =
            self.adapter.estimate_tokens(&request.messages) + request.max_tokens;
        if let Some(limiter) = &self.limiter {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                _ = limiter.wait_if_needed(&request.model, estimated) => {}
            }
        }
        Ok(estimated)
    }

    async fn settle_failure(&self, request: &CompletionRequest, estimated: u32) {
        // The admitted slot still consumes budget on failure so retry storms
        // cannot outrun the window. Prompt tokens were sent; completion never
        // arrived.
        if let Some(limiter) = &self.limiter {
            let prompt_estimate = estimated.saturating_sub(request.max_tokens);
            limiter.record(&request.model, prompt_estimate).await;
        }
    }

    /// Blocking completion
    pub async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> GatewayResult<CompletionResponse> {
        self.complete_with_options(request, CallOptions::default())
            .await
    }

    pub async fn complete_with_options(
        &self,
        request: &CompletionRequest,
        options: CallOptions,
    ) -> GatewayResult<CompletionResponse> {
        request.validate()?;
        self.budget_guard()?;
        let cancel = options.cancel.clone().unwrap_or_default();

        let estimated = self.admit(request, &cancel).await?;

        let use_cache = options.cache && !request.stream;
        if use_cache {
            if let Some(cache) = &self.cache {
                if let Some(cached) = cache.get(request).await {
                    let span = self.tracer.completion_span(request);
                    self.tracer.record_response(&span, &cached, true);
                    return Ok(cached);
                }
            }
        }

        let span = self.tracer.completion_span(request);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GatewayError::Cancelled),
            result = self.dispatch(request) => result,
        };

        match result {
            Ok(response) => {
                if self.settings.cost_tracking_enabled {
                    self.cost_tracker.record(
                        response.model.clone(),
                        options.task_id.clone(),
                        response.usage.prompt_tokens,
                        response.usage.completion_tokens,
                        response.cost_usd,
                        options.step_id.clone(),
                    );
                }
                if let Some(limiter) = &self.limiter {
                    limiter
                        .record(&request.model, response.usage.total_tokens)
                        .await;
                }
                if use_cache && !cancel.is_cancelled() {
                    if let Some(cache) = &self.cache {
                        cache.set(request, &response, options.cache_ttl).await;
                    }
                }
                self.tracer.record_response(&span, &response, false);
                Ok(response)
            }
            Err(error) => {
                // A cancelled call releases its slot entirely
                if !matches!(error, GatewayError::Cancelled) {
                    self.settle_failure(request, estimated).await;
                }
                self.tracer.record_error(&span, &error);
                Err(error)
            }
        }
    }

    async fn dispatch(&self, request: &CompletionRequest) -> GatewayResult<CompletionResponse> {
        match &self.router {
            Some(router) => router.complete(request).await,
            None => self.adapter.complete(request).await,
        }
    }

    /// Streaming completion: cache bypassed, chunks yielded as they arrive.
    /// The span stays open for the whole stream and closes when the chunk
    /// sequence finishes or errors.
    pub async fn stream_complete(
        &self,
        request: &CompletionRequest,
        options: CallOptions,
    ) -> GatewayResult<ChunkStream> {
        request.validate()?;
        self.budget_guard()?;
        let cancel = options.cancel.clone().unwrap_or_default();

        let estimated = self.admit(request, &cancel).await?;
        let span = self.tracer.stream_span(request);

        let stream_result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GatewayError::Cancelled),
            result = async {
                match &self.router {
                    Some(router) => router.stream_complete(request).await,
                    None => self.adapter.stream_complete(request).await,
                }
            } => result,
        };

        let inner = match stream_result {
            Ok(stream) => stream,
            Err(error) => {
                if !matches!(error, GatewayError::Cancelled) {
                    self.settle_failure(request, estimated).await;
                }
                self.tracer.record_error(&span, &error);
                return Err(error);
            }
        };

        Ok(Box::pin(GatewayStream {
            inner,
            cancel,
            span,
            tracer: self.tracer.clone(),
            limiter: self.limiter.clone(),
            cost_tracker: self.settings.cost_tracking_enabled.then(|| self.cost_tracker.clone()),
            task_id: options.task_id,
            step_id: options.step_id,
            adapter: self.adapter.clone(),
            model: request.model.clone(),
            prompt_estimate: estimated.saturating_sub(request.max_tokens),
            started: Instant::now(),
            content: String::new(),
            usage: None,
            finished: false,
        }))
    }

    /// Tool-calling completion. The cache holds only plain completions, so
    /// tool calls always reach the provider.
    pub async fn complete_with_tools(
        &self,
        request: &ExtendedCompletionRequest,
        options: CallOptions,
    ) -> GatewayResult<ExtendedCompletionResponse> {
        request.validate()?;
        self.budget_guard()?;
        let cancel = options.cancel.clone().unwrap_or_default();

        // Flatten to the base shape for admission and the span
        let flattened = CompletionRequest {
            model: request.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| Message {
                    role: m.role,
                    content: m.content.as_ref().map(|c| c.as_text()).unwrap_or_default(),
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stop: request.stop.clone(),
            stream: false,
            metadata: request.metadata.clone(),
        };
        let estimated = self.admit(&flattened, &cancel).await?;
        let span = self.tracer.completion_span(&flattened);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GatewayError::Cancelled),
            result = self.adapter.complete_with_tools(request) => result,
        };

        match result {
            Ok(response) => {
                if self.settings.cost_tracking_enabled {
                    self.cost_tracker.record(
                        response.model.clone(),
                        options.task_id.clone(),
                        response.usage.prompt_tokens,
                        response.usage.completion_tokens,
                        response.cost_usd,
                        options.step_id.clone(),
                    );
                }
                if let Some(limiter) = &self.limiter {
                    limiter
                        .record(&request.model, response.usage.total_tokens)
                        .await;
                }
                let as_completion = CompletionResponse {
                    content: response.content.clone().unwrap_or_default(),
                    model: response.model.clone(),
                    usage: response.usage,
                    finish_reason: response.finish_reason,
                    latency_ms: response.latency_ms,
                    cost_usd: response.cost_usd,
                };
                self.tracer.record_response(&span, &as_completion, false);
                Ok(response)
            }
            Err(error) => {
                if !matches!(error, GatewayError::Cancelled) {
                    self.settle_failure(&flattened, estimated).await;
                }
                self.tracer.record_error(&span, &error);
                Err(error)
            }
        }
    }
}

/// Stream wrapper that keeps the span open, accumulates content and settles
/// rate-limit and cost accounting when the provider terminates the sequence
struct GatewayStream {
    inner: ChunkStream,
    cancel: CancellationToken,
    span: Span,
    tracer: LlmTracer,
    limiter: Option<Arc<dyn RateLimiter>>,
    cost_tracker: Option<Arc<CostTracker>>,
    task_id: String,
    step_id: Option<String>,
    adapter: Arc<Adapter>,
    model: String,
    prompt_estimate: u32,
    started: Instant,
    content: String,
    usage: Option<UsageInfo>,
    finished: bool,
}

impl GatewayStream {
    fn settle_tokens(&self, tokens: u32) {
        if let Some(limiter) = &self.limiter {
            let limiter = limiter.clone();
            let model = self.model.clone();
            tokio::spawn(async move {
                limiter.record(&model, tokens).await;
            });
        }
    }

    fn finish_ok(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let latency_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        self.tracer.record_stream_complete(
            &self.span,
            &self.content,
            &self.model,
            latency_ms,
            self.usage,
        );

        // Final usage replaces the running estimate when the provider sent it
        let usage = self.usage.unwrap_or_else(|| {
            UsageInfo::new(self.prompt_estimate, (self.content.len() / 4) as u32)
        });
        self.settle_tokens(usage.total_tokens);

        if let Some(tracker) = &self.cost_tracker {
            let cost = self.adapter.estimate_cost(
                &self.model,
                usage.prompt_tokens,
                usage.completion_tokens,
            );
            tracker.record(
                self.model.clone(),
                self.task_id.clone(),
                usage.prompt_tokens,
                usage.completion_tokens,
                cost,
                self.step_id.clone(),
            );
        }
    }

    fn finish_error(&mut self, error: &GatewayError) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.tracer.record_error(&self.span, error);
        self.settle_tokens(self.prompt_estimate);
    }
}

impl Stream for GatewayStream {
    type Item = GatewayResult<StreamChunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.cancel.is_cancelled() {
            if !this.finished {
                this.finished = true;
                this.tracer.record_error(&this.span, &GatewayError::Cancelled);
            }
            return Poll::Ready(None);
        }

        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.content.push_str(&chunk.content);
                if let Some(usage) = chunk.usage {
                    this.usage = Some(usage);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(error))) => {
                this.finish_error(&error);
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                this.finish_ok();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for GatewayStream {
    fn drop(&mut self) {
        // A stream dropped before completion counts as a cancelled call
        if !self.finished {
            self.finished = true;
            self.tracer.record_error(&self.span, &GatewayError::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::test_support::ScriptedClient;
    use crate::adapter::RetryPolicy;
    use crate::registry::Provider;
    use futures::StreamExt;
    use std::collections::HashMap;

    struct Fixture {
        gateway: Gateway,
        client: Arc<ScriptedClient>,
        cache: Arc<MemoryCache>,
        limiter: Arc<MemoryRateLimiter>,
    }

    fn fixture_with(
        settings: GatewaySettings,
        outcomes: Vec<GatewayResult<CompletionResponse>>,
    ) -> Fixture {
        let registry = Arc::new(ModelRegistry::new());
        let client = Arc::new(ScriptedClient::new(Provider::OpenAI, &["gpt-4"], outcomes));

        let mut clients: HashMap<Provider, Arc<dyn crate::providers::ProviderClient>> =
            HashMap::new();
        clients.insert(Provider::OpenAI, client.clone());
        let adapter = Arc::new(Adapter::with_clients(
            clients,
            registry.clone(),
            RetryPolicy {
                max_attempts: 1,
                initial_wait: 0.0,
                max_wait: 0.0,
            },
        ));

        let cache = Arc::new(MemoryCache::new(16));
        let limiter = Arc::new(MemoryRateLimiter::new(RateLimitSpec {
            rpm: settings.default_rpm,
            tpm: settings.default_tpm,
        }));
        let cost_tracker = Arc::new(CostTracker::new(settings.budget_usd));

        let gateway = Gateway::with_components(
            settings,
            registry,
            adapter,
            None,
            Some(cache.clone()),
            Some(limiter.clone()),
            cost_tracker,
        );

        Fixture {
            gateway,
            client,
            cache,
            limiter,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(GatewaySettings::default(), vec![])
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new("gpt-4", vec![Message::user("Hello!")])
            .unwrap()
            .with_temperature(0.7)
            .unwrap()
            .with_max_tokens(100)
            .unwrap()
    }

    #[tokio::test]
    async fn test_cache_hit_short_circuits_provider() {
        let fixture = fixture();
        let req = request();
        let cached = CompletionResponse {
            content: "Hi".into(),
            model: "gpt-4".into(),
            usage: UsageInfo::new(10, 20),
            finish_reason: crate::contracts::FinishReason::Stop,
            latency_ms: 0.0,
            cost_usd: 0.0,
        };
        fixture.cache.set(&req, &cached, None).await;

        let response = fixture.gateway.complete(&req).await.unwrap();
        assert_eq!(response.content, "Hi");
        assert_eq!(fixture.client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_miss_calls_provider_then_caches() {
        let fixture = fixture();
        let req = request();

        let response = fixture.gateway.complete(&req).await.unwrap();
        assert_eq!(response.content, "scripted");
        assert_eq!(fixture.client.call_count(), 1);

        // Second call served from cache
        let response = fixture.gateway.complete(&req).await.unwrap();
        assert_eq!(response.content, "scripted");
        assert_eq!(fixture.client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cost_and_rate_usage_recorded() {
        let fixture = fixture();
        let req = request();

        fixture
            .gateway
            .complete_with_options(&req, CallOptions::for_task("task-9"))
            .await
            .unwrap();

        let tracker = fixture.gateway.cost_tracker();
        assert_eq!(tracker.record_count(), 1);
        assert!(tracker.get_task_cost("task-9") > 0.0);

        let usage = fixture.limiter.get_usage("gpt-4").await;
        assert_eq!(usage.rpm_used, 1);
        assert_eq!(usage.tpm_used, 30);
    }

    #[tokio::test]
    async fn test_failed_call_still_consumes_rate_budget() {
        let fixture = fixture_with(
            GatewaySettings::default(),
            vec![Err(GatewayError::Provider {
                message: "boom".into(),
            })],
        );
        let req = request();

        assert!(fixture.gateway.complete(&req).await.is_err());
        let usage = fixture.limiter.get_usage("gpt-4").await;
        assert_eq!(usage.rpm_used, 1);
        // No cost recorded for a failed call
        assert_eq!(fixture.gateway.cost_tracker().record_count(), 0);
        // Failures are not cached
        assert!(fixture.cache.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_call_leaves_no_trace() {
        let fixture = fixture();
        let req = request();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = fixture
            .gateway
            .complete_with_options(&req, CallOptions::default().with_cancel(cancel))
            .await
            .unwrap_err();
        assert!(matches!(error, GatewayError::Cancelled));

        assert!(fixture.cache.is_empty());
        assert_eq!(fixture.gateway.cost_tracker().record_count(), 0);
        let usage = fixture.limiter.get_usage("gpt-4").await;
        assert_eq!(usage.rpm_used, 0);
        assert_eq!(fixture.client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_budget_exceeded_raised_before_call() {
        let settings = GatewaySettings {
            budget_usd: Some(0.000_000_1),
            ..GatewaySettings::default()
        };
        let fixture = fixture_with(settings, vec![]);
        let req = request();

        // First call records cost past the budget
        fixture.gateway.complete(&req).await.unwrap();
        // Cached responses would mask the guard; use a different prompt
        let other = CompletionRequest::new("gpt-4", vec![Message::user("Again")]).unwrap();
        let error = fixture.gateway.complete(&other).await.unwrap_err();
        assert!(matches!(error, GatewayError::BudgetExceeded { .. }));
        assert_eq!(fixture.client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_bypasses_cache_and_settles_usage() {
        let fixture = fixture();
        let req = request().with_stream(true);

        let mut stream = fixture
            .gateway
            .stream_complete(&req, CallOptions::for_task("stream-task"))
            .await
            .unwrap();

        let mut content = String::new();
        while let Some(chunk) = stream.next().await {
            content.push_str(&chunk.unwrap().content);
        }
        assert_eq!(content, "scripted");
        drop(stream);

        // Nothing cached for streams
        assert!(fixture.cache.is_empty());

        // Final usage from the terminal chunk reached the tracker
        let tracker = fixture.gateway.cost_tracker();
        assert_eq!(tracker.record_count(), 1);
        let summary = tracker.get_summary();
        assert_eq!(summary.total_tokens, 30);

        // Spawned rate-limit settlement lands after a yield
        tokio::task::yield_now().await;
        let usage = fixture.limiter.get_usage("gpt-4").await;
        assert_eq!(usage.rpm_used, 1);
    }

    #[tokio::test]
    async fn test_tool_call_round_trip_records_cost() {
        let fixture = fixture();
        let req = ExtendedCompletionRequest::new(
            "gpt-4",
            vec![crate::contracts::ExtendedMessage::text(
                crate::contracts::Role::User,
                "What's the weather in Tokyo?",
            )],
        )
        .unwrap();

        let response = fixture
            .gateway
            .complete_with_tools(&req, CallOptions::for_task("tools"))
            .await
            .unwrap();
        let calls = response.tool_calls.unwrap();
        assert_eq!(calls[0].function_name, "get_weather");
        assert_eq!(fixture.gateway.cost_tracker().record_count(), 1);
    }

    #[tokio::test]
    async fn test_routed_fallback_travels_through_gateway() {
        let registry = Arc::new(ModelRegistry::new());
        let adapter = Arc::new(Adapter::with_clients(
            HashMap::new(),
            registry.clone(),
            RetryPolicy {
                max_attempts: 1,
                initial_wait: 0.0,
                max_wait: 0.0,
            },
        ));

        let mut router_config = RouterConfig::default();
        router_config
            .fallbacks
            .insert("gpt-4".to_string(), vec!["gpt-3.5-turbo".to_string()]);
        let router = Router::new(adapter.clone(), registry.clone(), router_config);

        let failing = Arc::new(ScriptedClient::new(
            Provider::OpenAI,
            &["gpt-4"],
            vec![Err(GatewayError::ServiceUnavailable {
                message: "outage".into(),
            })],
        ));
        let fallback = Arc::new(ScriptedClient::new(
            Provider::OpenAI,
            &["gpt-3.5-turbo"],
            vec![],
        ));
        router.add_deployment_with_client(
            DeploymentConfig::new("gpt-4", Provider::OpenAI, "k1"),
            failing,
        );
        router.add_deployment_with_client(
            DeploymentConfig::new("gpt-3.5-turbo", Provider::OpenAI, "k2"),
            fallback,
        );

        let gateway = Gateway::with_components(
            GatewaySettings::default(),
            registry,
            adapter,
            Some(Arc::new(router)),
            None,
            None,
            Arc::new(CostTracker::new(None)),
        );

        let response = gateway.complete(&request()).await.unwrap();
        assert_eq!(response.model, "gpt-3.5-turbo");
        assert_eq!(gateway.cost_tracker().record_count(), 1);
    }

    #[tokio::test]
    async fn test_new_request_uses_settings_defaults() {
        let settings = GatewaySettings {
            default_model: "gpt-4".to_string(),
            default_temperature: 0.2,
            default_max_tokens: 256,
            ..GatewaySettings::default()
        };
        let fixture = fixture_with(settings, vec![]);

        let req = fixture
            .gateway
            .new_request(vec![Message::user("Hello")])
            .unwrap();
        assert_eq!(req.model, "gpt-4");
        assert_eq!(req.temperature, 0.2);
        assert_eq!(req.max_tokens, 256);
    }

    #[tokio::test]
    async fn test_cache_opt_out_per_call() {
        let fixture = fixture();
        let req = request();

        fixture
            .gateway
            .complete_with_options(&req, CallOptions::default().without_cache())
            .await
            .unwrap();
        assert!(fixture.cache.is_empty());

        fixture
            .gateway
            .complete_with_options(&req, CallOptions::default().without_cache())
            .await
            .unwrap();
        assert_eq!(fixture.client.call_count(), 2);
    }
}
