//! Tracing spans around completion calls
//!
//! Spans carry the `gen_ai.*` attribute convention plus the gateway's
//! `llm.*` extensions. Request and response content are recorded only when
//! the corresponding settings flags are on, truncated to bound span size.

use tracing::field::Empty;
use tracing::Span;

use crate::config::GatewaySettings;
use crate::contracts::{CompletionRequest, CompletionResponse, UsageInfo};
use crate::error::GatewayError;

/// Recorded content is clipped to this many characters
const CONTENT_LIMIT: usize = 1000;

/// Install a global subscriber honoring `RUST_LOG`, for binaries and tests.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Map a model id to its `gen_ai.system` value
pub fn detect_system(model: &str) -> &'static str {
    let model = model.to_ascii_lowercase();
    if model.starts_with("gpt-") || model.starts_with("o1-") || model.contains("openai") {
        "openai"
    } else if model.starts_with("claude") || model.contains("anthropic") {
        "anthropic"
    } else if model.contains("deepseek") {
        "deepseek"
    } else if model.contains("gemini") {
        "google"
    } else {
        "unknown"
    }
}

fn clip(content: &str) -> String {
    content.chars().take(CONTENT_LIMIT).collect()
}

/// Span factory for gateway calls
#[derive(Clone)]
pub struct LlmTracer {
    enabled: bool,
    log_requests: bool,
    log_responses: bool,
}

impl LlmTracer {
    pub fn new(enabled: bool, log_requests: bool, log_responses: bool) -> Self {
        Self {
            enabled,
            log_requests,
            log_responses,
        }
    }

    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self::new(
            settings.tracing_enabled,
            settings.log_requests,
            settings.log_responses,
        )
    }

    fn open_span(&self, request: &CompletionRequest, stream: bool) -> Span {
        if !self.enabled {
            return Span::none();
        }

        let span = tracing::info_span!(
            "llm.completion",
            otel.kind = "client",
            otel.status_code = Empty,
            otel.status_description = Empty,
            gen_ai.system = detect_system(&request.model),
            gen_ai.request.model = %request.model,
            gen_ai.request.temperature = request.temperature as f64,
            gen_ai.request.max_tokens = request.max_tokens,
            gen_ai.response.model = Empty,
            gen_ai.response.finish_reasons = Empty,
            gen_ai.usage.input_tokens = Empty,
            gen_ai.usage.output_tokens = Empty,
            gen_ai.usage.total_tokens = Empty,
            llm.request.message_count = request.messages.len() as u64,
            llm.request.content = Empty,
            llm.response.content = Empty,
            llm.latency_ms = Empty,
            llm.cost_usd = Empty,
            llm.cache_hit = Empty,
            llm.stream = stream,
        );

        if self.log_requests {
            if let Some(last) = request.messages.last() {
                span.record("llm.request.content", clip(&last.content).as_str());
            }
        }
        span
    }

    /// Span for a blocking completion, kind `client`
    pub fn completion_span(&self, request: &CompletionRequest) -> Span {
        self.open_span(request, false)
    }

    /// Span for a streaming completion; stays open for the whole stream
    pub fn stream_span(&self, request: &CompletionRequest) -> Span {
        self.open_span(request, true)
    }

    /// Record a successful response onto the span
    pub fn record_response(&self, span: &Span, response: &CompletionResponse, cache_hit: bool) {
        span.record("gen_ai.response.model", response.model.as_str());
        span.record(
            "gen_ai.response.finish_reasons",
            response.finish_reason.as_str(),
        );
        span.record("gen_ai.usage.input_tokens", response.usage.prompt_tokens);
        span.record("gen_ai.usage.output_tokens", response.usage.completion_tokens);
        span.record("gen_ai.usage.total_tokens", response.usage.total_tokens);
        span.record("llm.latency_ms", response.latency_ms);
        span.record("llm.cost_usd", response.cost_usd);
        span.record("llm.cache_hit", cache_hit);
        span.record("otel.status_code", "OK");

        if self.log_responses {
            span.record("llm.response.content", clip(&response.content).as_str());
        }
    }

    /// Record stream completion: concatenated content and final usage when
    /// the provider emitted it
    pub fn record_stream_complete(
        &self,
        span: &Span,
        content: &str,
        model: &str,
        latency_ms: f64,
        usage: Option<UsageInfo>,
    ) {
        span.record("gen_ai.response.model", model);
        span.record("llm.latency_ms", latency_ms);
        if let Some(usage) = usage {
            span.record("gen_ai.usage.input_tokens", usage.prompt_tokens);
            span.record("gen_ai.usage.output_tokens", usage.completion_tokens);
            span.record("gen_ai.usage.total_tokens", usage.total_tokens);
        }
        span.record("otel.status_code", "OK");

        if self.log_responses {
            span.record("llm.response.content", clip(content).as_str());
        }
    }

    /// Record a failure; the span closes with error status
    pub fn record_error(&self, span: &Span, error: &GatewayError) {
        span.record("otel.status_code", "ERROR");
        span.record("otel.status_description", error.to_string().as_str());
    }
}
