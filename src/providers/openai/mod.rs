//! OpenAI provider

pub mod client;
pub mod config;
pub mod types;

pub use client::OpenAiClient;
pub use config::OpenAiConfig;

/// Create an OpenAI client from a key and optional base URL override
pub fn create_client(api_key: String, base_url: Option<String>) -> OpenAiClient {
    let mut config = OpenAiConfig::with_api_key(api_key);
    if let Some(base_url) = base_url {
        config.base_url = base_url;
    }
    OpenAiClient::new(config)
}
