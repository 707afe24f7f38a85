//! DeepSeek provider configuration

use serde::{Deserialize, Serialize};

/// Connection settings for the DeepSeek API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepSeekConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout_seconds: u64,
}

impl Default for DeepSeekConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.deepseek.com".to_string(),
            timeout_seconds: 60,
        }
    }
}

impl DeepSeekConfig {
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }
}

/// Models served through this client
pub fn default_models() -> Vec<String> {
    ["deepseek-chat", "deepseek-coder"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}
