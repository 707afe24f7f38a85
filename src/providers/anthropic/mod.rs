//! Anthropic provider

pub mod client;
pub mod config;
pub mod types;

pub use client::AnthropicClient;
pub use config::AnthropicConfig;

/// Create an Anthropic client from a key and optional base URL override
pub fn create_client(api_key: String, base_url: Option<String>) -> AnthropicClient {
    let mut config = AnthropicConfig::with_api_key(api_key);
    if let Some(base_url) = base_url {
        config.base_url = base_url;
    }
    AnthropicClient::new(config)
}
