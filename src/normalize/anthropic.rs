//! Anthropic Messages 编解码器 — 处理与 OpenAI 风格的关键差异
//!
//! Anthropic Messages codec. Key differences from the OpenAI shape:
//! - Content uses typed blocks: `[{"type": "text", "text": "..."}]`.
//! - Tool results travel as `tool_result` blocks on user-role messages.
//! - Tool declarations use `{name, description, input_schema}`.
//! - Response content is an array mixing `text` and `tool_use` blocks.
//! - `max_tokens` is required, not optional.

use serde_json::Value;

use super::{WireCodec, WireRequest};
use crate::registry::{ProviderDescriptor, ProviderKind};
use crate::types::chat::{ChatRequest, ChatResponse, Usage};
use crate::types::message::Role;
use crate::types::tool::ToolCall;
use crate::Result;

pub struct AnthropicCodec;

impl WireCodec for AnthropicCodec {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AnthropicMessages
    }

    fn encode(
        &self,
        request: &ChatRequest,
        descriptor: &ProviderDescriptor,
    ) -> Result<WireRequest> {
        let messages: Vec<Value> = request
            .turns
            .iter()
            .map(|turn| match turn.role {
                Role::Tool => serde_json::json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": turn.tool_call_id.clone().unwrap_or_default(),
                        "content": turn.content,
                    }],
                }),
                role => serde_json::json!({
                    "role": role.as_str(),
                    "content": [{"type": "text", "text": turn.content}],
                }),
            })
            .collect();

        let mut body = serde_json::json!({
            "model": descriptor.model,
            "messages": messages,
            "max_tokens": request.params.max_tokens.unwrap_or(descriptor.max_tokens),
        });

        if let Some(t) = request.params.temperature {
            body["temperature"] = serde_json::json!(t);
        }

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    serde_json::json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.schema,
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }

        let mut wire = WireRequest::post(descriptor.chat_path.clone(), body);
        wire.headers
            .insert("anthropic-version".into(), "2023-06-01".into());
        Ok(wire)
    }

    fn decode(&self, body: &Value) -> Result<ChatResponse> {
        if let Some(err) = super::detect_error_envelope(body) {
            return Err(err);
        }

        let mut text = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();

        if let Some(blocks) = body.get("content").and_then(|c| c.as_array()) {
            for block in blocks {
                match block.get("type").and_then(|t| t.as_str()) {
                    Some("text") => {
                        if let Some(chunk) = block.get("text").and_then(|t| t.as_str()) {
                            text.push_str(chunk);
                        }
                    }
                    Some("tool_use") => {
                        if let (Some(id), Some(name)) = (
                            block.get("id").and_then(|v| v.as_str()),
                            block.get("name").and_then(|v| v.as_str()),
                        ) {
                            tool_calls.push(ToolCall {
                                id: id.to_string(),
                                name: name.to_string(),
                                arguments: block.get("input").cloned().unwrap_or(Value::Null),
                            });
                        }
                    }
                    _ => {}
                }
            }
        }

        let usage = body.get("usage").map(|u| {
            let prompt = u["input_tokens"].as_u64().unwrap_or(0);
            let completion = u["output_tokens"].as_u64().unwrap_or(0);
            Usage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
            }
        });

        let text = if text.is_empty() { None } else { Some(text) };
        super::finish_response(text, tool_calls, usage)
    }
}
