//! OpenAI provider configuration

use serde::{Deserialize, Serialize};

/// Connection settings for the OpenAI API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    /// Organization header, when the key belongs to several orgs
    pub organization: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            organization: None,
            timeout_seconds: 60,
        }
    }
}

impl OpenAiConfig {
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }
}

/// Models served through this client
pub fn default_models() -> Vec<String> {
    [
        "gpt-4",
        "gpt-4-turbo",
        "gpt-4o",
        "gpt-4o-mini",
        "gpt-3.5-turbo",
    ]
    .iter()
    .map(|m| m.to_string())
    .collect()
}
