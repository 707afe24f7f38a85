//! OpenAI wire types for the chat completions API
//!
//! DeepSeek exposes the same wire format, so its client reuses these types.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::contracts::{
    CompletionRequest, ExtendedCompletionRequest, ExtendedMessage, Message, MessageContent,
    Tool, ToolCallResponse, ToolChoice, UsageInfo,
};

/// Outbound chat completion request
#[derive(Debug, Clone, Serialize)]
pub struct OpenAiRequest {
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

/// Outbound message; `content` is a string or an array of content parts
#[derive(Debug, Clone, Serialize)]
pub struct OpenAiMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: OpenAiFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiFunctionCall {
    pub name: String,
    pub arguments: String,
}

/// Inbound chat completion response
#[derive(Debug, Deserialize)]
pub struct OpenAiResponse {
    pub model: String,
    pub choices: Vec<OpenAiChoice>,
    pub usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiChoice {
    pub message: OpenAiResponseMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiResponseMessage {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl From<OpenAiUsage> for UsageInfo {
    fn from(usage: OpenAiUsage) -> Self {
        UsageInfo {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
        .normalized()
    }
}

impl From<&Message> for OpenAiMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role.as_str().to_string(),
            content: Some(Value::String(message.content.clone())),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

impl From<&ExtendedMessage> for OpenAiMessage {
    fn from(message: &ExtendedMessage) -> Self {
        let content = message.content.as_ref().map(|content| match content {
            MessageContent::Text(text) => Value::String(text.clone()),
            MessageContent::Parts(parts) => {
                serde_json::to_value(parts).unwrap_or(Value::Null)
            }
        });

        let tool_calls = message.tool_calls.as_ref().map(|calls| {
            calls
                .iter()
                .map(|call| OpenAiToolCall {
                    id: call.id.clone(),
                    call_type: function_type(),
                    function: OpenAiFunctionCall {
                        name: call.function_name.clone(),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect()
        });

        Self {
            role: message.role.as_str().to_string(),
            content,
            name: message.name.clone(),
            tool_calls,
            tool_call_id: message.tool_call_id.clone(),
        }
    }
}

impl From<&OpenAiToolCall> for ToolCallResponse {
    fn from(call: &OpenAiToolCall) -> Self {
        Self {
            id: call.id.clone(),
            function_name: call.function.name.clone(),
            arguments: call.function.arguments.clone(),
        }
    }
}

/// Wire representation of a tool-choice directive
pub fn tool_choice_value(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::None => json!("none"),
        ToolChoice::Required => json!("required"),
        ToolChoice::Function { name } => json!({
            "type": "function",
            "function": { "name": name },
        }),
    }
}

impl OpenAiRequest {
    pub fn from_request(request: &CompletionRequest) -> Self {
        Self {
            model: request.model.clone(),
            messages: request.messages.iter().map(OpenAiMessage::from).collect(),
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            seed: None,
            stop: request.stop.clone(),
            stream: None,
            stream_options: None,
            tools: None,
            tool_choice: None,
        }
    }

    pub fn from_extended(request: &ExtendedCompletionRequest) -> Self {
        Self {
            model: request.model.clone(),
            messages: request.messages.iter().map(OpenAiMessage::from).collect(),
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            top_p: request.top_p,
            frequency_penalty: request.frequency_penalty,
            presence_penalty: request.presence_penalty,
            seed: request.seed,
            stop: request.stop.clone(),
            stream: None,
            stream_options: None,
            tools: request.tools.clone(),
            tool_choice: request.tool_choice.as_ref().map(tool_choice_value),
        }
    }

    pub fn streaming(mut self) -> Self {
        self.stream = Some(true);
        self.stream_options = Some(StreamOptions {
            include_usage: true,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{Role, ToolFunction};

    #[test]
    fn test_basic_request_conversion() {
        let request = CompletionRequest::new("gpt-4", vec![Message::user("Hello")]).unwrap();
        let wire = OpenAiRequest::from_request(&request);
        assert_eq!(wire.model, "gpt-4");
        assert_eq!(wire.messages.len(), 1);
        assert_eq!(wire.messages[0].role, "user");
        assert_eq!(wire.temperature, Some(0.7));
        assert!(wire.stream.is_none());
    }

    #[test]
    fn test_streaming_enables_usage_reporting() {
        let request = CompletionRequest::new("gpt-4", vec![Message::user("Hello")]).unwrap();
        let wire = OpenAiRequest::from_request(&request).streaming();
        assert_eq!(wire.stream, Some(true));
        assert!(wire.stream_options.as_ref().unwrap().include_usage);
    }

    #[test]
    fn test_tool_serialization_shape() {
        let tool = Tool::function(ToolFunction {
            name: "get_weather".into(),
            description: "Look up weather".into(),
            parameters: json!({"type": "object", "properties": {"location": {"type": "string"}}}),
        });
        let value = serde_json::to_value(&tool).unwrap();
        assert_eq!(value["type"], "function");
        assert_eq!(value["function"]["name"], "get_weather");
    }

    #[test]
    fn test_tool_choice_wire_forms() {
        assert_eq!(tool_choice_value(&ToolChoice::Auto), json!("auto"));
        assert_eq!(
            tool_choice_value(&ToolChoice::Function {
                name: "search".into()
            }),
            json!({"type": "function", "function": {"name": "search"}})
        );
    }

    #[test]
    fn test_tool_result_message_conversion() {
        let message = ExtendedMessage::tool_result("call_123", "{\"weather\":\"sunny\"}");
        let wire = OpenAiMessage::from(&message);
        assert_eq!(wire.role, "tool");
        assert_eq!(wire.tool_call_id.as_deref(), Some("call_123"));
    }

    #[test]
    fn test_multimodal_message_conversion() {
        let message = ExtendedMessage {
            role: Role::User,
            content: Some(MessageContent::Parts(vec![crate::contracts::ContentPart::Text {
                text: "describe".into(),
            }])),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        };
        let wire = OpenAiMessage::from(&message);
        let parts = wire.content.unwrap();
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[0]["text"], "describe");
    }
}
