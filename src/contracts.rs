//! Core request/response contracts for gateway calls
//!
//! All request types validate at construction and behave as value objects:
//! middleware that annotates a request produces a new copy instead of
//! mutating in place. Everything else in the crate depends on this module;
//! this module depends only on `error`.

use std::collections::HashMap;
use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};

/// Message roles accepted by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// Why the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::Error => "error",
        }
    }

    /// Map a provider-reported finish reason onto the gateway enum.
    /// Unknown values collapse to `Stop`.
    pub fn from_provider(value: &str) -> Self {
        match value {
            "length" | "max_tokens" => FinishReason::Length,
            "tool_calls" | "tool_use" | "function_call" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            "error" => FinishReason::Error,
            _ => FinishReason::Stop,
        }
    }
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Token accounting for one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageInfo {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl UsageInfo {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Providers that omit the sum get it computed here
    pub fn normalized(mut self) -> Self {
        if self.total_tokens == 0 {
            self.total_tokens = self.prompt_tokens + self.completion_tokens;
        }
        self
    }
}

/// The canonical completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_cache() -> bool {
    true
}

impl CompletionRequest {
    /// Build a request with defaults applied, rejecting malformed input
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> GatewayResult<Self> {
        let request = Self {
            model: model.into(),
            messages,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            stop: None,
            stream: false,
            metadata: HashMap::new(),
        };
        request.validate()?;
        Ok(request)
    }

    pub fn with_temperature(mut self, temperature: f32) -> GatewayResult<Self> {
        self.temperature = temperature;
        self.validate()?;
        Ok(self)
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> GatewayResult<Self> {
        self.max_tokens = max_tokens;
        self.validate()?;
        Ok(self)
    }

    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Returns an annotated copy; the original request is untouched
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.model.is_empty() {
            return Err(invalid("model must not be empty", "model"));
        }
        validate_temperature(self.temperature)?;
        validate_max_tokens(self.max_tokens)?;
        validate_leading_message(self.messages.first().map(|m| m.role))?;
        Ok(())
    }
}

/// Response to a blocking completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    /// The resolved deployment, which may differ from the requested model
    pub model: String,
    pub usage: UsageInfo,
    pub finish_reason: FinishReason,
    #[serde(default)]
    pub latency_ms: f64,
    #[serde(default)]
    pub cost_usd: f64,
}

/// Image fidelity requested from vision models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    Low,
    High,
    Auto,
}

impl Default for ImageDetail {
    fn default() -> Self {
        ImageDetail::Auto
    }
}

/// Image reference within a multi-modal message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default)]
    pub detail: ImageDetail,
}

/// One part of a multi-modal message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

/// Message content: plain text or an ordered list of parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Flattened text view, used for token estimation and span recording
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// Function exposed to the model for tool calling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    pub description: String,
    /// JSON-Schema object describing the arguments
    #[serde(default)]
    pub parameters: Value,
}

/// Tool definition; only `function` tools exist today
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type", default = "default_tool_type")]
    pub tool_type: String,
    pub function: ToolFunction,
}

fn default_tool_type() -> String {
    "function".to_string()
}

impl Tool {
    pub fn function(function: ToolFunction) -> Self {
        Self {
            tool_type: default_tool_type(),
            function,
        }
    }
}

/// Tool selection strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    #[serde(untagged)]
    Function { name: String },
}

/// A tool invocation emitted by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallResponse {
    pub id: String,
    pub function_name: String,
    /// Kept as the provider's JSON-encoded string, never parsed here
    pub arguments: String,
}

/// Message form supporting multi-modal content and tool traffic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedMessage {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Assistant-side tool invocations being echoed back to the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallResponse>>,
    /// Set on `tool` role messages carrying a tool result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ExtendedMessage {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(MessageContent::Text(content.into())),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(MessageContent::Text(content.into())),
            name: None,
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Completion request with tools, vision and extra sampling controls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedCompletionRequest {
    pub model: String,
    pub messages: Vec<ExtendedMessage>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default = "default_cache")]
    pub cache: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl: Option<u64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl ExtendedCompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ExtendedMessage>) -> GatewayResult<Self> {
        let request = Self {
            model: model.into(),
            messages,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            stop: None,
            stream: false,
            tools: None,
            tool_choice: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            seed: None,
            cache: true,
            cache_ttl: None,
            metadata: HashMap::new(),
        };
        request.validate()?;
        Ok(request)
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = Some(tool_choice);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> GatewayResult<Self> {
        self.temperature = temperature;
        self.validate()?;
        Ok(self)
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> GatewayResult<Self> {
        self.max_tokens = max_tokens;
        self.validate()?;
        Ok(self)
    }

    pub fn with_top_p(mut self, top_p: f32) -> GatewayResult<Self> {
        self.top_p = Some(top_p);
        self.validate()?;
        Ok(self)
    }

    pub fn with_penalties(
        mut self,
        frequency_penalty: Option<f32>,
        presence_penalty: Option<f32>,
    ) -> GatewayResult<Self> {
        self.frequency_penalty = frequency_penalty;
        self.presence_penalty = presence_penalty;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.model.is_empty() {
            return Err(invalid("model must not be empty", "model"));
        }
        validate_temperature(self.temperature)?;
        validate_max_tokens(self.max_tokens)?;
        validate_leading_message(self.messages.first().map(|m| m.role))?;
        if let Some(top_p) = self.top_p {
            if !(0.0..=1.0).contains(&top_p) {
                return Err(invalid("top_p must be within [0.0, 1.0]", "top_p"));
            }
        }
        for (name, penalty) in [
            ("frequency_penalty", self.frequency_penalty),
            ("presence_penalty", self.presence_penalty),
        ] {
            if let Some(value) = penalty {
                if !(-2.0..=2.0).contains(&value) {
                    return Err(invalid(
                        &format!("{} must be within [-2.0, 2.0]", name),
                        name,
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Response to a tool-calling completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedCompletionResponse {
    #[serde(default)]
    pub content: Option<String>,
    pub model: String,
    pub usage: UsageInfo,
    pub finish_reason: FinishReason,
    /// Provider ordering preserved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallResponse>>,
    #[serde(default)]
    pub latency_ms: f64,
    #[serde(default)]
    pub cost_usd: f64,
}

/// A single streamed fragment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallResponse>>,
    /// Only populated on the terminal chunk, when the provider reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageInfo>,
}

/// Pull-based finite sequence of stream chunks
pub type ChunkStream = Pin<Box<dyn Stream<Item = GatewayResult<StreamChunk>> + Send>>;

fn invalid(message: &str, param: &str) -> GatewayError {
    GatewayError::InvalidRequest {
        message: message.to_string(),
        param: Some(param.to_string()),
    }
}

fn validate_temperature(temperature: f32) -> GatewayResult<()> {
    if !(0.0..=2.0).contains(&temperature) {
        return Err(invalid(
            "temperature must be within [0.0, 2.0]",
            "temperature",
        ));
    }
    Ok(())
}

fn validate_max_tokens(max_tokens: u32) -> GatewayResult<()> {
    if max_tokens < 1 {
        return Err(invalid("max_tokens must be at least 1", "max_tokens"));
    }
    Ok(())
}

fn validate_leading_message(first: Option<Role>) -> GatewayResult<()> {
    match first {
        None => Err(invalid("messages must not be empty", "messages")),
        Some(Role::User) | Some(Role::System) => Ok(()),
        Some(_) => Err(invalid(
            "conversation must start with a user or system message",
            "messages",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_defaults() {
        let request =
            CompletionRequest::new("gpt-4", vec![Message::user("Hello")]).unwrap();
        assert_eq!(request.temperature, 0.7);
        assert_eq!(request.max_tokens, 4096);
        assert!(!request.stream);
    }

    #[test]
    fn test_temperature_bounds() {
        let request = CompletionRequest::new("gpt-4", vec![Message::user("hi")]).unwrap();
        assert!(request.clone().with_temperature(2.0).is_ok());
        let err = request.with_temperature(2.5).unwrap_err();
        assert_eq!(err.error_code(), "invalid_request");
    }

    #[test]
    fn test_empty_messages_rejected() {
        let err = CompletionRequest::new("gpt-4", vec![]).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest { .. }));
    }

    #[test]
    fn test_leading_assistant_rejected() {
        let err =
            CompletionRequest::new("gpt-4", vec![Message::assistant("hi")]).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest { .. }));
    }

    #[test]
    fn test_metadata_copy_leaves_original() {
        let request = CompletionRequest::new("gpt-4", vec![Message::user("hi")]).unwrap();
        let annotated = request.clone().with_metadata("trace_id", json!("abc"));
        assert!(request.metadata.is_empty());
        assert_eq!(annotated.metadata["trace_id"], json!("abc"));
    }

    #[test]
    fn test_usage_normalization() {
        let usage = UsageInfo {
            prompt_tokens: 10,
            completion_tokens: 20,
            total_tokens: 0,
        };
        assert_eq!(usage.normalized().total_tokens, 30);
        assert_eq!(UsageInfo::new(10, 20).total_tokens, 30);
    }

    #[test]
    fn test_extended_request_sampling_bounds() {
        let messages = vec![ExtendedMessage::text(Role::User, "hi")];
        let request = ExtendedCompletionRequest::new("gpt-4", messages).unwrap();
        assert!(request.clone().with_top_p(1.5).is_err());
        assert!(request.clone().with_penalties(Some(-3.0), None).is_err());
        assert!(request.with_penalties(Some(1.0), Some(-1.0)).is_ok());
    }

    #[test]
    fn test_multimodal_text_flattening() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text {
                text: "describe".into(),
            },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: "https://example.com/cat.png".into(),
                    detail: ImageDetail::Auto,
                },
            },
            ContentPart::Text {
                text: "this image".into(),
            },
        ]);
        assert_eq!(content.as_text(), "describe this image");
    }

    #[test]
    fn test_tool_choice_serialization() {
        assert_eq!(serde_json::to_value(ToolChoice::Auto).unwrap(), json!("auto"));
        assert_eq!(
            serde_json::to_value(ToolChoice::Function {
                name: "get_weather".into()
            })
            .unwrap(),
            json!({"name": "get_weather"})
        );
    }
}
