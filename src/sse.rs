//! Server-Sent Events parsing for provider streams
//!
//! Providers frame streaming completions as SSE over HTTP. This module turns
//! a response body into a stream of wire events and decodes the
//! provider-specific event payloads into gateway stream chunks.

use futures::{Stream, StreamExt};
use tracing::{debug, error};

use crate::contracts::StreamChunk;
use crate::error::{GatewayError, GatewayResult};

/// One parsed SSE event
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

/// Incremental SSE parser over arbitrary byte chunk boundaries
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Feed bytes, returning every event completed so far
    pub fn parse_chunk(&mut self, chunk: &[u8]) -> GatewayResult<Vec<SseEvent>> {
        let text = std::str::from_utf8(chunk).map_err(|e| GatewayError::Provider {
            message: format!("invalid UTF-8 in event stream: {}", e),
        })?;
        self.buffer.push_str(text);

        let mut events = Vec::new();
        while let Some(boundary) = self.buffer.find("\n\n") {
            let block = self.buffer[..boundary].to_string();
            self.buffer = self.buffer[boundary + 2..].to_string();

            if block.trim().is_empty() {
                continue;
            }
            match Self::parse_block(&block) {
                // Comment-only blocks parse to nothing worth emitting
                Ok(event) if event.event_type.is_none() && event.data.is_empty() => {}
                Ok(event) => events.push(event),
                Err(e) => error!(error = %e, "unparseable event block"),
            }
        }
        Ok(events)
    }

    fn parse_block(block: &str) -> GatewayResult<SseEvent> {
        let mut event_type = None;
        let mut data_lines = Vec::new();
        let mut id = None;
        let mut retry = None;

        for line in block.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.find(':') {
                Some(colon) => (&line[..colon], line[colon + 1..].trim_start()),
                None => ("data", line),
            };

            match field {
                "event" => event_type = Some(value.to_string()),
                "data" => data_lines.push(value.to_string()),
                "id" => id = Some(value.to_string()),
                "retry" => retry = value.parse().ok(),
                _ => {}
            }
        }

        Ok(SseEvent {
            event_type,
            data: data_lines.join("\n"),
            id,
            retry,
        })
    }

    pub fn has_remaining_data(&self) -> bool {
        !self.buffer.trim().is_empty()
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert an HTTP response body into a stream of SSE events
pub fn response_to_sse_stream(
    response: reqwest::Response,
) -> impl Stream<Item = GatewayResult<SseEvent>> + Send + Unpin {
    let mut parser = SseParser::new();

    Box::pin(
        response
            .bytes_stream()
            .map(move |chunk_result| match chunk_result {
                Ok(chunk) => parser.parse_chunk(&chunk),
                Err(e) => Err(GatewayError::Provider {
                    message: format!("stream read failed: {}", e),
                }),
            })
            .flat_map(|events_result| {
                futures::stream::iter(match events_result {
                    Ok(events) => events.into_iter().map(Ok).collect::<Vec<_>>(),
                    Err(e) => vec![Err(e)],
                })
            }),
    )
}

/// OpenAI-compatible stream decoding (also used by DeepSeek)
pub mod openai {
    use serde::Deserialize;

    use super::*;
    use crate::contracts::{FinishReason, ToolCallResponse, UsageInfo};

    #[derive(Debug, Deserialize)]
    pub struct OpenAiStreamChunk {
        pub choices: Vec<OpenAiStreamChoice>,
        pub usage: Option<OpenAiStreamUsage>,
    }

    #[derive(Debug, Deserialize)]
    pub struct OpenAiStreamChoice {
        pub delta: OpenAiDelta,
        pub finish_reason: Option<String>,
    }

    #[derive(Debug, Deserialize, Default)]
    pub struct OpenAiDelta {
        pub content: Option<String>,
        pub tool_calls: Option<Vec<OpenAiToolCallDelta>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct OpenAiToolCallDelta {
        pub id: Option<String>,
        pub function: Option<OpenAiFunctionDelta>,
    }

    #[derive(Debug, Deserialize)]
    pub struct OpenAiFunctionDelta {
        pub name: Option<String>,
        pub arguments: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct OpenAiStreamUsage {
        pub prompt_tokens: u32,
        pub completion_tokens: u32,
        #[serde(default)]
        pub total_tokens: u32,
    }

    /// Decode one SSE event into a gateway chunk. `[DONE]` markers and empty
    /// keep-alives decode to `None`.
    pub fn chunk_from_event(event: &SseEvent) -> GatewayResult<Option<StreamChunk>> {
        let data = event.data.trim();
        if data.is_empty() || data == "[DONE]" {
            return Ok(None);
        }

        let parsed: OpenAiStreamChunk =
            serde_json::from_str(data).map_err(|e| GatewayError::Provider {
                message: format!("unparseable stream chunk: {}", e),
            })?;

        let usage = parsed.usage.map(|u| {
            UsageInfo {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }
            .normalized()
        });

        let Some(choice) = parsed.choices.into_iter().next() else {
            // A trailing usage-only frame still matters to the caller
            if let Some(usage) = usage {
                return Ok(Some(StreamChunk {
                    usage: Some(usage),
                    ..Default::default()
                }));
            }
            return Ok(None);
        };

        let tool_calls = choice.delta.tool_calls.map(|calls| {
            calls
                .into_iter()
                .map(|call| ToolCallResponse {
                    id: call.id.unwrap_or_default(),
                    function_name: call
                        .function
                        .as_ref()
                        .and_then(|f| f.name.clone())
                        .unwrap_or_default(),
                    arguments: call
                        .function
                        .and_then(|f| f.arguments)
                        .unwrap_or_default(),
                })
                .collect()
        });

        Ok(Some(StreamChunk {
            content: choice.delta.content.unwrap_or_default(),
            finish_reason: choice
                .finish_reason
                .as_deref()
                .map(FinishReason::from_provider),
            tool_calls,
            usage,
        }))
    }
}

/// Anthropic message-event stream decoding
pub mod anthropic {
    use serde::Deserialize;

    use super::*;
    use crate::contracts::{FinishReason, UsageInfo};

    #[derive(Debug, Deserialize)]
    #[serde(tag = "type")]
    pub enum AnthropicStreamEvent {
        #[serde(rename = "ping")]
        Ping,
        #[serde(rename = "message_start")]
        MessageStart { message: AnthropicMessageStart },
        #[serde(rename = "content_block_start")]
        ContentBlockStart,
        #[serde(rename = "content_block_delta")]
        ContentBlockDelta { delta: AnthropicDelta },
        #[serde(rename = "content_block_stop")]
        ContentBlockStop,
        #[serde(rename = "message_delta")]
        MessageDelta {
            delta: AnthropicMessageDelta,
            usage: Option<AnthropicUsage>,
        },
        #[serde(rename = "message_stop")]
        MessageStop,
        #[serde(rename = "error")]
        Error { error: AnthropicStreamError },
    }

    #[derive(Debug, Deserialize)]
    pub struct AnthropicMessageStart {
        pub usage: Option<AnthropicUsage>,
    }

    #[derive(Debug, Deserialize)]
    pub struct AnthropicDelta {
        pub text: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct AnthropicMessageDelta {
        pub stop_reason: Option<String>,
    }

    #[derive(Debug, Deserialize, Default, Clone, Copy)]
    pub struct AnthropicUsage {
        #[serde(default)]
        pub input_tokens: u32,
        #[serde(default)]
        pub output_tokens: u32,
    }

    #[derive(Debug, Deserialize)]
    pub struct AnthropicStreamError {
        pub message: String,
    }

    /// Decode one Anthropic SSE event. `prompt_tokens` carries the input
    /// count observed in `message_start` so the terminal chunk reports full
    /// usage.
    pub fn chunk_from_event(
        event: &SseEvent,
        prompt_tokens: &mut u32,
    ) -> GatewayResult<Option<StreamChunk>> {
        let data = event.data.trim();
        if data.is_empty() || data == "[DONE]" {
            return Ok(None);
        }

        let parsed: AnthropicStreamEvent =
            serde_json::from_str(data).map_err(|e| GatewayError::Provider {
                message: format!("unparseable stream event: {}", e),
            })?;

        match parsed {
            AnthropicStreamEvent::Ping
            | AnthropicStreamEvent::ContentBlockStart
            | AnthropicStreamEvent::ContentBlockStop
            | AnthropicStreamEvent::MessageStop => Ok(None),
            AnthropicStreamEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    *prompt_tokens = usage.input_tokens;
                }
                Ok(None)
            }
            AnthropicStreamEvent::ContentBlockDelta { delta } => match delta.text {
                Some(text) => Ok(Some(StreamChunk {
                    content: text,
                    ..Default::default()
                })),
                None => {
                    debug!("content delta without text");
                    Ok(None)
                }
            },
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                let finish_reason = delta
                    .stop_reason
                    .as_deref()
                    .map(FinishReason::from_provider);
                let usage = usage.map(|u| {
                    UsageInfo::new(*prompt_tokens, u.output_tokens)
                });
                if finish_reason.is_none() && usage.is_none() {
                    return Ok(None);
                }
                Ok(Some(StreamChunk {
                    finish_reason,
                    usage,
                    ..Default::default()
                }))
            }
            AnthropicStreamEvent::Error { error } => Err(GatewayError::Provider {
                message: format!("stream error: {}", error.message),
            }),
        }
    }
}
