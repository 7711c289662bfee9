//! OpenAI-compatible chat completions codec. Covers OpenAI itself plus the
//! many providers that speak the same shape (DeepSeek, Moonshot, Zhipu, …) —
//! in this core: the chat, code, math, and reasoning capabilities.

use std::collections::HashMap;

use serde_json::Value;

use super::{ChunkAssembler, WireCodec, WireRequest};
use crate::registry::{ProviderDescriptor, ProviderKind};
use crate::types::chat::{ChatRequest, ChatResponse, Usage};
use crate::types::message::Role;
use crate::types::tool::ToolCall;
use crate::{Error, Result};

pub struct OpenAiCodec;

fn usage_from(u: &Value) -> Usage {
    Usage {
        prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0),
        completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0),
        total_tokens: u["total_tokens"].as_u64().unwrap_or(0),
    }
}

/// Tool-call arguments arrive as a JSON-encoded string; keep the raw string
/// if it does not parse.
fn parse_arguments(raw: &Value) -> Value {
    match raw {
        Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| raw.clone()),
        other => other.clone(),
    }
}

impl WireCodec for OpenAiCodec {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAiCompatible
    }

    fn encode(
        &self,
        request: &ChatRequest,
        descriptor: &ProviderDescriptor,
    ) -> Result<WireRequest> {
        let messages: Vec<Value> = request
            .turns
            .iter()
            .map(|turn| {
                let mut obj = serde_json::json!({
                    "role": turn.role.as_str(),
                    "content": turn.content,
                });
                // The API requires tool_call_id for role "tool"
                if turn.role == Role::Tool {
                    if let Some(ref id) = turn.tool_call_id {
                        obj["tool_call_id"] = Value::String(id.clone());
                    }
                }
                obj
            })
            .collect();

        let mut body = serde_json::json!({
            "model": descriptor.model,
            "messages": messages,
            "stream": false,
        });

        if let Some(t) = request.params.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        let max_tokens = request.params.max_tokens.unwrap_or(descriptor.max_tokens);
        body["max_tokens"] = serde_json::json!(max_tokens);

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.schema,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }

        Ok(WireRequest::post(descriptor.chat_path.clone(), body))
    }

    fn decode(&self, body: &Value) -> Result<ChatResponse> {
        if let Some(err) = super::detect_error_envelope(body) {
            return Err(err);
        }

        let text = body
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from);

        let tool_calls: Vec<ToolCall> = body
            .pointer("/choices/0/message/tool_calls")
            .and_then(|v| v.as_array())
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|call| {
                        let id = call.get("id")?.as_str()?.to_string();
                        let name = call.pointer("/function/name")?.as_str()?.to_string();
                        let arguments = call
                            .pointer("/function/arguments")
                            .map(parse_arguments)
                            .unwrap_or(Value::Null);
                        Some(ToolCall {
                            id,
                            name,
                            arguments,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let usage = body.get("usage").map(usage_from);

        super::finish_response(text, tool_calls, usage)
    }

    fn decode_stream(&self, raw: &str) -> Result<ChatResponse> {
        let mut assembler = ChunkAssembler::new();
        // SSE stream: tool calls are keyed by index, ids only arrive on the
        // first fragment of each call.
        let mut ids_by_index: HashMap<u64, String> = HashMap::new();

        for line in raw.lines() {
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() || data == "[DONE]" {
                continue;
            }
            let chunk: Value = serde_json::from_str(data).map_err(|e| {
                Error::parse_with_context(
                    format!("malformed streaming chunk: {}", e),
                    crate::ErrorContext::new().with_source("wire_decode"),
                )
            })?;

            if let Some(err) = super::detect_error_envelope(&chunk) {
                return Err(err);
            }

            if let Some(content) = chunk
                .pointer("/choices/0/delta/content")
                .and_then(|c| c.as_str())
            {
                assembler.on_text(content);
            }

            if let Some(calls) = chunk
                .pointer("/choices/0/delta/tool_calls")
                .and_then(|v| v.as_array())
            {
                for call in calls {
                    let index = call.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                    if let (Some(id), Some(name)) = (
                        call.get("id").and_then(|v| v.as_str()),
                        call.pointer("/function/name").and_then(|v| v.as_str()),
                    ) {
                        ids_by_index.insert(index, id.to_string());
                        assembler.on_tool_started(id.to_string(), name.to_string());
                    }
                    if let Some(fragment) = call
                        .pointer("/function/arguments")
                        .and_then(|v| v.as_str())
                    {
                        if let Some(id) = ids_by_index.get(&index) {
                            assembler.on_tool_fragment(id, fragment);
                        }
                    }
                }
            }

            if let Some(usage) = chunk.get("usage").filter(|u| !u.is_null()) {
                assembler.set_usage(usage_from(usage));
            }
        }

        assembler.finalize()
    }
}
