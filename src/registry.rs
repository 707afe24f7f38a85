//! Model registry: static catalog of known models with cost and context metadata
//!
//! Seeded with a built-in table of public models; `register` may override an
//! entry. Reads are lock-free and O(1); writes happen at startup.

use dashmap::DashMap;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

/// Upstream providers the gateway can speak to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Anthropic,
    DeepSeek,
    Google,
    Local,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::OpenAI => write!(f, "openai"),
            Provider::Anthropic => write!(f, "anthropic"),
            Provider::DeepSeek => write!(f, "deepseek"),
            Provider::Google => write!(f, "google"),
            Provider::Local => write!(f, "local"),
        }
    }
}

/// Immutable description of one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_id: String,
    pub provider: Provider,
    pub display_name: String,
    /// Maximum output tokens per completion
    pub max_tokens: u32,
    /// USD per 1000 prompt tokens
    pub input_cost_per_1k: f64,
    /// USD per 1000 completion tokens
    pub output_cost_per_1k: f64,
    pub supports_vision: bool,
    pub supports_function_calling: bool,
    pub supports_streaming: bool,
    pub context_window: u32,
    pub tags: Vec<String>,
}

impl ModelInfo {
    fn builtin(
        model_id: &str,
        provider: Provider,
        display_name: &str,
        max_tokens: u32,
        input_cost_per_1k: f64,
        output_cost_per_1k: f64,
        supports_vision: bool,
        supports_function_calling: bool,
        context_window: u32,
        tags: &[&str],
    ) -> Self {
        Self {
            model_id: model_id.to_string(),
            provider,
            display_name: display_name.to_string(),
            max_tokens,
            input_cost_per_1k,
            output_cost_per_1k,
            supports_vision,
            supports_function_calling,
            supports_streaming: true,
            context_window,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }
}

lazy_static! {
    /// Built-in catalog of known public models and their list prices
    static ref BUILTIN_MODELS: Vec<ModelInfo> = vec![
        ModelInfo::builtin(
            "gpt-4", Provider::OpenAI, "GPT-4",
            8192, 0.03, 0.06, false, true, 8192,
            &["reasoning", "coding"],
        ),
        ModelInfo::builtin(
            "gpt-4-turbo", Provider::OpenAI, "GPT-4 Turbo",
            4096, 0.01, 0.03, true, true, 128_000,
            &["reasoning", "coding", "vision"],
        ),
        ModelInfo::builtin(
            "gpt-4o", Provider::OpenAI, "GPT-4o",
            16_384, 0.005, 0.015, true, true, 128_000,
            &["reasoning", "vision"],
        ),
        ModelInfo::builtin(
            "gpt-3.5-turbo", Provider::OpenAI, "GPT-3.5 Turbo",
            4096, 0.0005, 0.0015, false, true, 16_385,
            &["fast", "cheap"],
        ),
        ModelInfo::builtin(
            "claude-3-opus", Provider::Anthropic, "Claude 3 Opus",
            4096, 0.015, 0.075, true, true, 200_000,
            &["reasoning", "long-context"],
        ),
        ModelInfo::builtin(
            "claude-3-sonnet", Provider::Anthropic, "Claude 3 Sonnet",
            4096, 0.003, 0.015, true, true, 200_000,
            &["balanced"],
        ),
        ModelInfo::builtin(
            "claude-3-haiku", Provider::Anthropic, "Claude 3 Haiku",
            4096, 0.00025, 0.00125, true, true, 200_000,
            &["fast", "cheap"],
        ),
        ModelInfo::builtin(
            "deepseek-chat", Provider::DeepSeek, "DeepSeek Chat",
            4096, 0.0001, 0.0002, false, false, 32_000,
            &["cheap", "coding"],
        ),
        ModelInfo::builtin(
            "deepseek-coder", Provider::DeepSeek, "DeepSeek Coder",
            4096, 0.0001, 0.0002, false, false, 32_000,
            &["cheap", "coding"],
        ),
    ];
}

/// Catalog of models known to this process
pub struct ModelRegistry {
    models: DashMap<String, ModelInfo>,
}

impl ModelRegistry {
    /// Registry seeded with the built-in model table
    pub fn new() -> Self {
        let registry = Self::empty();
        for model in BUILTIN_MODELS.iter() {
            registry.register(model.clone());
        }
        registry
    }

    /// Registry with no entries, for tests and custom catalogs
    pub fn empty() -> Self {
        Self {
            models: DashMap::new(),
        }
    }

    /// Register a model, overriding any existing entry with the same id
    pub fn register(&self, model: ModelInfo) {
        self.models.insert(model.model_id.clone(), model);
    }

    pub fn get(&self, model_id: &str) -> Option<ModelInfo> {
        self.models.get(model_id).map(|entry| entry.clone())
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.models.contains_key(model_id)
    }

    pub fn list_all(&self) -> Vec<ModelInfo> {
        self.models.iter().map(|entry| entry.clone()).collect()
    }

    pub fn list_by_provider(&self, provider: Provider) -> Vec<ModelInfo> {
        self.models
            .iter()
            .filter(|entry| entry.provider == provider)
            .map(|entry| entry.clone())
            .collect()
    }

    pub fn list_by_tag(&self, tag: &str) -> Vec<ModelInfo> {
        self.models
            .iter()
            .filter(|entry| entry.tags.iter().any(|t| t == tag))
            .map(|entry| entry.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// List-price cost for a call, when the model is known
    pub fn estimate_cost(
        &self,
        model_id: &str,
        prompt_tokens: u32,
        completion_tokens: u32,
    ) -> Option<f64> {
        self.get(model_id).map(|model| {
            (prompt_tokens as f64 * model.input_cost_per_1k
                + completion_tokens as f64 * model.output_cost_per_1k)
                / 1000.0
        })
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
