//! Gateway configuration
//!
//! Settings are loaded once at startup from an optional `gateway.toml` file
//! overlaid with `LLM_`-prefixed environment variables (a `.env` file is
//! honored). The loaded value is immutable; tests inject literal settings
//! into constructors instead of mutating globals.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Strategy used by the router to pick among deployments of one model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingStrategy {
    /// Uniform random choice
    SimpleShuffle,
    /// Lowest EMA latency over recent successful calls
    LatencyBased,
    /// Lowest input cost, ties broken by latency
    CostBased,
}

impl Default for RoutingStrategy {
    fn default() -> Self {
        RoutingStrategy::SimpleShuffle
    }
}

/// All recognized gateway options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    // Call defaults
    pub default_model: String,
    pub default_temperature: f32,
    pub default_max_tokens: u32,
    pub timeout_seconds: u64,

    // Provider credentials, surfaced to deployments
    pub openai_api_key: String,
    pub openai_api_base: String,
    pub anthropic_api_key: String,
    pub deepseek_api_key: String,
    pub deepseek_api_base: String,

    // Adapter retry policy
    pub max_retries: u32,
    pub retry_min_wait: f64,
    pub retry_max_wait: f64,

    // Rate limiting
    pub rate_limit_enabled: bool,
    pub default_rpm: u32,
    pub default_tpm: u32,

    // Cache
    pub cache_enabled: bool,
    pub cache_ttl_seconds: u64,

    // Router
    pub router_enabled: bool,
    pub routing_strategy: RoutingStrategy,
    pub fallback_models: Vec<String>,

    // Tracing
    pub tracing_enabled: bool,
    pub log_requests: bool,
    pub log_responses: bool,

    // Cost tracking
    pub budget_usd: Option<f64>,
    pub cost_tracking_enabled: bool,

    // Distributed backend for cache and rate limiting
    pub redis_url: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            default_model: "gpt-4".to_string(),
            default_temperature: 0.7,
            default_max_tokens: 4096,
            timeout_seconds: 60,
            openai_api_key: String::new(),
            openai_api_base: String::new(),
            anthropic_api_key: String::new(),
            deepseek_api_key: String::new(),
            deepseek_api_base: "https://api.deepseek.com".to_string(),
            max_retries: 3,
            retry_min_wait: 1.0,
            retry_max_wait: 60.0,
            rate_limit_enabled: true,
            default_rpm: 60,
            default_tpm: 100_000,
            cache_enabled: true,
            cache_ttl_seconds: 3600,
            router_enabled: true,
            routing_strategy: RoutingStrategy::SimpleShuffle,
            fallback_models: vec![
                "gpt-3.5-turbo".to_string(),
                "claude-3-haiku".to_string(),
            ],
            tracing_enabled: true,
            log_requests: false,
            log_responses: false,
            budget_usd: None,
            cost_tracking_enabled: true,
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

impl GatewaySettings {
    /// Load settings from `gateway.toml` (if present) and `LLM_*` environment
    /// variables; environment wins.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        Config::builder()
            .add_source(File::with_name("gateway").required(false))
            .add_source(
                Environment::with_prefix("LLM")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("fallback_models"),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = GatewaySettings::default();
        assert_eq!(settings.default_model, "gpt-4");
        assert_eq!(settings.default_rpm, 60);
        assert_eq!(settings.default_tpm, 100_000);
        assert_eq!(settings.routing_strategy, RoutingStrategy::SimpleShuffle);
        assert!(settings.cache_enabled);
        assert!(settings.budget_usd.is_none());
    }

    #[test]
    fn test_routing_strategy_kebab_case() {
        let parsed: RoutingStrategy = serde_json::from_str("\"latency-based\"").unwrap();
        assert_eq!(parsed, RoutingStrategy::LatencyBased);
        let parsed: RoutingStrategy = serde_json::from_str("\"cost-based\"").unwrap();
        assert_eq!(parsed, RoutingStrategy::CostBased);
    }

    #[test]
    fn test_file_overlay() {
        let config = Config::builder()
            .add_source(File::from_str(
                "default_model = \"deepseek-chat\"\ndefault_rpm = 10",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let settings: GatewaySettings = config.try_deserialize().unwrap();
        assert_eq!(settings.default_model, "deepseek-chat");
        assert_eq!(settings.default_rpm, 10);
        // Untouched fields keep their defaults
        assert_eq!(settings.default_tpm, 100_000);
    }
}
