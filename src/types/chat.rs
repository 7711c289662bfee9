//! Canonical chat request/response envelopes.

use serde::{Deserialize, Serialize};

use super::message::{Role, Turn};
use super::tool::{ToolCall, ToolDefinition};
use crate::registry::Capability;

/// Which retry policy a dispatch uses. Interactive requests favor low
/// latency; batch (document analysis) requests tolerate longer backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallClass {
    Interactive,
    Batch,
}

impl Default for CallClass {
    fn default() -> Self {
        CallClass::Interactive
    }
}

/// Optional generation parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Voice id for synthesis dispatches; absent for text capabilities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

/// A UI-level request, immutable once dispatch begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub capability: Capability,
    pub turns: Vec<Turn>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub params: GenerationParams,
    #[serde(default)]
    pub call_class: CallClass,
}

impl ChatRequest {
    pub fn new(capability: Capability, turns: Vec<Turn>) -> Self {
        Self {
            capability,
            turns,
            tools: Vec::new(),
            params: GenerationParams::default(),
            call_class: CallClass::default(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_call_class(mut self, call_class: CallClass) -> Self {
        self.call_class = call_class;
        self
    }

    /// Same request over a different (augmented) conversation. Used by the
    /// orchestrator when feeding tool results back to the model.
    pub fn with_turns(&self, turns: Vec<Turn>) -> Self {
        Self {
            turns,
            ..self.clone()
        }
    }

    /// Content of the most recent user turn, if any.
    pub fn last_user_text(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Normalized result returned to the caller. Owned exclusively by the caller
/// once returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Text content; `None` only while tool calls are pending.
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    pub terminal: bool,
}

impl ChatResponse {
    /// The sole non-terminal state: no text yet, and one or more tool calls
    /// to execute.
    pub fn is_tool_turn(&self) -> bool {
        self.text.is_none() && !self.tool_calls.is_empty()
    }
}
