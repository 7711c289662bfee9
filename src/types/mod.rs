//! Canonical envelope types shared across the dispatch core.
//!
//! Everything here is a value object: created per call, never mutated after
//! dispatch begins, discarded when the dispatch completes.

pub mod chat;
pub mod message;
pub mod tool;

pub use chat::{CallClass, ChatRequest, ChatResponse, GenerationParams, Usage};
pub use message::{Role, Turn};
pub use tool::{ToolCall, ToolDefinition, ToolResult};
