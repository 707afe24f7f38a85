//! DeepSeek provider

pub mod client;
pub mod config;

pub use client::DeepSeekClient;
pub use config::DeepSeekConfig;

/// Create a DeepSeek client from a key and optional base URL override
pub fn create_client(api_key: String, base_url: Option<String>) -> DeepSeekClient {
    let mut config = DeepSeekConfig::with_api_key(api_key);
    if let Some(base_url) = base_url {
        config.base_url = base_url;
    }
    DeepSeekClient::new(config)
}
