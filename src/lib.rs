//! # LLM Gateway
//!
//! A multi-provider LLM invocation core that front-ends upstream model
//! providers (OpenAI-, Anthropic- and DeepSeek-style HTTP APIs) behind one
//! typed request/response contract, and enforces the correctness, cost and
//! liveness properties naive direct calls lack:
//!
//! - blocking, streaming and tool-calling completion modes
//! - a sliding-window rate limiter with dual RPM and TPM budgets
//! - a deterministic response cache keyed on canonicalized request content
//! - a router that balances across deployments of the same logical model
//!   and falls back to alternate models on failure
//! - per-task/per-model cost tracking with budget signalling
//! - TTL-cached health checking with concurrency-bounded probes
//! - tracing spans carrying the `gen_ai.*` attribute schema
//!
//! The [`Gateway`] ties the pipeline together; every component is also
//! usable on its own and injectable for tests.
//!
//! ```no_run
//! use llm_gateway::{CompletionRequest, Gateway, GatewaySettings, Message};
//!
//! # async fn example() -> Result<(), llm_gateway::GatewayError> {
//! let gateway = Gateway::new(GatewaySettings::load().unwrap_or_default());
//! let request = CompletionRequest::new("gpt-4", vec![Message::user("Hello!")])?;
//! let response = gateway.complete(&request).await?;
//! println!("{}", response.content);
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod cache;
pub mod config;
pub mod contracts;
pub mod cost;
pub mod error;
pub mod gateway;
pub mod health;
pub mod policy;
pub mod providers;
pub mod rate_limit;
pub mod registry;
pub mod router;
pub mod sse;
pub mod telemetry;

// Flat API: the common path needs no module navigation
pub use adapter::{Adapter, RetryPolicy};
pub use cache::{cache_key, MemoryCache, RedisCache, ResponseCache};
pub use config::{GatewaySettings, RoutingStrategy};
pub use contracts::{
    ChunkStream, CompletionRequest, CompletionResponse, ContentPart, ExtendedCompletionRequest,
    ExtendedCompletionResponse, ExtendedMessage, FinishReason, ImageDetail, ImageUrl, Message,
    MessageContent, Role, StreamChunk, Tool, ToolCallResponse, ToolChoice, ToolFunction,
    UsageInfo,
};
pub use cost::{CostRecord, CostSummary, CostTracker};
pub use error::{GatewayError, GatewayResult};
pub use gateway::{CallOptions, Gateway};
pub use health::{HealthChecker, HealthProbe, HealthRecord, HealthReport, HealthStatus};
pub use policy::{
    CostOptimizedPolicy, ModelSelection, PolicyEngine, QualityOptimizedPolicy, SelectionPolicy,
    TaskComplexity,
};
pub use providers::ProviderClient;
pub use rate_limit::{
    LimitKind, MemoryRateLimiter, RateLimitDecision, RateLimitSpec, RateLimitUsage, RateLimiter,
    RedisRateLimiter,
};
pub use registry::{ModelInfo, ModelRegistry, Provider};
pub use router::{Deployment, DeploymentConfig, Router, RouterConfig};
pub use telemetry::{init_tracing, LlmTracer};
