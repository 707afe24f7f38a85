//! Anthropic wire types for the messages API

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::contracts::{
    CompletionRequest, ExtendedCompletionRequest, FinishReason, MessageContent, Role,
    ToolCallResponse, ToolChoice, UsageInfo,
};

/// Outbound messages API request
#[derive(Debug, Clone, Serialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
}

/// Message with string content or an array of content blocks
#[derive(Debug, Clone, Serialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Inbound messages API response
#[derive(Debug, Deserialize)]
pub struct AnthropicResponse {
    pub model: String,
    pub content: Vec<AnthropicContentBlock>,
    pub stop_reason: Option<String>,
    pub usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: Option<String>,
    pub id: Option<String>,
    pub name: Option<String>,
    pub input: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl From<AnthropicUsage> for UsageInfo {
    fn from(usage: AnthropicUsage) -> Self {
        UsageInfo::new(usage.input_tokens, usage.output_tokens)
    }
}

fn content_part_to_block(part: &crate::contracts::ContentPart) -> Value {
    match part {
        crate::contracts::ContentPart::Text { text } => json!({
            "type": "text",
            "text": text,
        }),
        crate::contracts::ContentPart::ImageUrl { image_url } => json!({
            "type": "image",
            "source": { "type": "url", "url": image_url.url },
        }),
    }
}

impl AnthropicRequest {
    /// Convert a basic request. System messages move to the `system` field;
    /// the remainder alternates user/assistant turns.
    pub fn from_request(request: &CompletionRequest) -> Self {
        let mut system_parts = Vec::new();
        let mut messages = Vec::new();

        for message in &request.messages {
            match message.role {
                Role::System => system_parts.push(message.content.clone()),
                Role::Assistant => messages.push(AnthropicMessage {
                    role: "assistant".to_string(),
                    content: Value::String(message.content.clone()),
                }),
                _ => messages.push(AnthropicMessage {
                    role: "user".to_string(),
                    content: Value::String(message.content.clone()),
                }),
            }
        }

        Self {
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            messages,
            system: if system_parts.is_empty() {
                None
            } else {
                Some(system_parts.join("\n\n"))
            },
            temperature: Some(request.temperature),
            top_p: None,
            stop_sequences: request.stop.clone(),
            stream: None,
            tools: None,
            tool_choice: None,
        }
    }

    pub fn from_extended(request: &ExtendedCompletionRequest) -> Self {
        let mut system_parts = Vec::new();
        let mut messages = Vec::new();

        for message in &request.messages {
            match message.role {
                Role::System => {
                    if let Some(content) = &message.content {
                        system_parts.push(content.as_text());
                    }
                }
                Role::Tool => {
                    // Tool results come back as user-side tool_result blocks
                    let text = message
                        .content
                        .as_ref()
                        .map(|c| c.as_text())
                        .unwrap_or_default();
                    messages.push(AnthropicMessage {
                        role: "user".to_string(),
                        content: json!([{
                            "type": "tool_result",
                            "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                            "content": text,
                        }]),
                    });
                }
                Role::Assistant if message.tool_calls.is_some() => {
                    let mut blocks = Vec::new();
                    if let Some(content) = &message.content {
                        let text = content.as_text();
                        if !text.is_empty() {
                            blocks.push(json!({"type": "text", "text": text}));
                        }
                    }
                    for call in message.tool_calls.as_deref().unwrap_or_default() {
                        let input = serde_json::from_str::<Value>(&call.arguments)
                            .unwrap_or_else(|_| json!({}));
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.function_name,
                            "input": input,
                        }));
                    }
                    messages.push(AnthropicMessage {
                        role: "assistant".to_string(),
                        content: Value::Array(blocks),
                    });
                }
                role => {
                    let content = match &message.content {
                        Some(MessageContent::Text(text)) => Value::String(text.clone()),
                        Some(MessageContent::Parts(parts)) => {
                            Value::Array(parts.iter().map(content_part_to_block).collect())
                        }
                        None => Value::String(String::new()),
                    };
                    messages.push(AnthropicMessage {
                        role: if role == Role::Assistant {
                            "assistant"
                        } else {
                            "user"
                        }
                        .to_string(),
                        content,
                    });
                }
            }
        }

        // `tool_choice: none` has no wire form here; omitting the tool list
        // expresses the same intent
        let suppress_tools = matches!(request.tool_choice, Some(ToolChoice::None));
        let tools = if suppress_tools {
            None
        } else {
            request.tools.as_ref().map(|tools| {
                tools
                    .iter()
                    .map(|tool| AnthropicTool {
                        name: tool.function.name.clone(),
                        description: tool.function.description.clone(),
                        input_schema: tool.function.parameters.clone(),
                    })
                    .collect()
            })
        };
        let tool_choice = if suppress_tools {
            None
        } else {
            request.tool_choice.as_ref().map(|choice| match choice {
                ToolChoice::Auto | ToolChoice::None => json!({"type": "auto"}),
                ToolChoice::Required => json!({"type": "any"}),
                ToolChoice::Function { name } => json!({"type": "tool", "name": name}),
            })
        };

        Self {
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            messages,
            system: if system_parts.is_empty() {
                None
            } else {
                Some(system_parts.join("\n\n"))
            },
            temperature: Some(request.temperature),
            top_p: request.top_p,
            stop_sequences: request.stop.clone(),
            stream: None,
            tools,
            tool_choice,
        }
    }

    pub fn streaming(mut self) -> Self {
        self.stream = Some(true);
        self
    }
}

impl AnthropicResponse {
    /// Joined text across text blocks
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Tool invocations in provider order
    pub fn tool_calls(&self) -> Option<Vec<ToolCallResponse>> {
        let calls: Vec<ToolCallResponse> = self
            .content
            .iter()
            .filter(|block| block.block_type == "tool_use")
            .map(|block| ToolCallResponse {
                id: block.id.clone().unwrap_or_default(),
                function_name: block.name.clone().unwrap_or_default(),
                arguments: block
                    .input
                    .as_ref()
                    .map(|input| input.to_string())
                    .unwrap_or_else(|| "{}".to_string()),
            })
            .collect();
        if calls.is_empty() {
            None
        } else {
            Some(calls)
        }
    }

    pub fn finish_reason(&self) -> FinishReason {
        self.stop_reason
            .as_deref()
            .map(FinishReason::from_provider)
            .unwrap_or(FinishReason::Stop)
    }
}
