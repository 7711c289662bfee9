//! Tool calling definitions for the canonical envelope.

use serde::{Deserialize, Serialize};

/// Tool declaration passed to the provider (for function calling).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's arguments, passed through opaquely.
    pub schema: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, schema: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            description: None,
            schema,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Tool call (invocation requested by the model).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id linking this call back to the turn that produced it.
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Result of executing a tool call, consumed only by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Correlation id, copied from the originating [`ToolCall`].
    pub id: String,
    pub ok: bool,
    /// Payload on success, error description on failure.
    pub payload: serde_json::Value,
}

impl ToolResult {
    pub fn success(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            ok: true,
            payload,
        }
    }

    pub fn failure(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ok: false,
            payload: serde_json::Value::String(message.into()),
        }
    }
}
