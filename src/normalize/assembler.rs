//! Accumulates streamed chunks (text deltas + tool-call fragments) into a
//! complete canonical response. Intentionally tolerant: if a tool call's
//! argument JSON never becomes valid, the raw string is kept.

use serde_json::Value;

use crate::types::chat::{ChatResponse, Usage};
use crate::types::tool::ToolCall;
use crate::Result;

#[derive(Default)]
pub struct ChunkAssembler {
    text: String,
    saw_text: bool,
    tool_calls: Vec<ToolCall>,
    usage: Option<Usage>,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a text delta. Order of arrival is preserved.
    pub fn on_text(&mut self, fragment: &str) {
        self.saw_text = true;
        self.text.push_str(fragment);
    }

    pub fn on_tool_started(&mut self, id: String, name: String) {
        if self.tool_calls.iter().any(|t| t.id == id) {
            return;
        }
        self.tool_calls.push(ToolCall {
            id,
            name,
            arguments: Value::String(String::new()),
        });
    }

    pub fn on_tool_fragment(&mut self, id: &str, fragment: &str) {
        if let Some(tc) = self.tool_calls.iter_mut().find(|t| t.id == id) {
            match &mut tc.arguments {
                Value::String(s) => s.push_str(fragment),
                _ => tc.arguments = Value::String(fragment.to_string()),
            }
        }
    }

    pub fn set_usage(&mut self, usage: Usage) {
        self.usage = Some(usage);
    }

    pub fn finalize(mut self) -> Result<ChatResponse> {
        for tc in &mut self.tool_calls {
            if let Value::String(s) = &tc.arguments {
                let trimmed = s.trim();
                if !trimmed.is_empty() {
                    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
                        tc.arguments = v;
                    }
                }
            }
        }
        let text = if self.saw_text && !self.text.is_empty() {
            Some(self.text)
        } else {
            None
        };
        super::finish_response(text, self.tool_calls, self.usage)
    }
}
