//! Provider 编解码层 — 每种 Provider 协议一个编解码器，统一隐藏线格式差异
//!
//! Request normalizer: one [`WireCodec`] per [`ProviderKind`], selected once
//! at registry resolution time. Each codec owns the full variance of its
//! provider's wire shape — turn encoding, tool-declaration shape, error
//! envelopes, streaming chunks — so the rest of the core stays
//! provider-agnostic.

pub mod anthropic;
pub mod assembler;
pub mod openai;
pub mod search;
pub mod voice;

use std::collections::HashMap;

use serde_json::Value;

use crate::error::ErrorContext;
use crate::registry::{ProviderDescriptor, ProviderKind};
use crate::types::chat::{ChatRequest, ChatResponse, Usage};
use crate::types::tool::ToolCall;
use crate::{Error, Result};

pub use anthropic::AnthropicCodec;
pub use assembler::ChunkAssembler;
pub use openai::OpenAiCodec;
pub use search::WebSearchCodec;
pub use voice::VoiceSynthesisCodec;

/// Unified HTTP request representation handed to the transport.
#[derive(Debug, Clone)]
pub struct WireRequest {
    /// HTTP method (POST for chat/synthesis/search, GET for catalogs).
    pub method: String,
    /// Endpoint path, joined to the descriptor's base URL by the transport.
    pub path: String,
    /// Extra provider-specific headers (e.g. `anthropic-version`).
    pub headers: HashMap<String, String>,
    /// JSON body; absent for GET requests.
    pub body: Option<Value>,
}

impl WireRequest {
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: "POST".into(),
            path: path.into(),
            headers: HashMap::new(),
            body: Some(body),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: "GET".into(),
            path: path.into(),
            headers: HashMap::new(),
            body: None,
        }
    }
}

/// Core trait for provider-specific wire adaptation. Object-safe; the
/// dispatcher holds a `&'static dyn WireCodec` chosen by [`codec_for`].
pub trait WireCodec: Send + Sync {
    /// The protocol this codec implements.
    fn kind(&self) -> ProviderKind;

    /// Build the provider wire request from the canonical envelope.
    fn encode(&self, request: &ChatRequest, descriptor: &ProviderDescriptor)
        -> Result<WireRequest>;

    /// Parse a complete JSON response body into the canonical envelope.
    fn decode(&self, body: &Value) -> Result<ChatResponse>;

    /// Parse a streamed (SSE) response body. Chunks are concatenated in
    /// arrival order, never reordered. Codecs for providers that never
    /// stream keep the default.
    fn decode_stream(&self, raw: &str) -> Result<ChatResponse> {
        let _ = raw;
        Err(Error::parse_with_context(
            "provider returned a streaming envelope this codec does not support",
            ErrorContext::new().with_source("wire_decode"),
        ))
    }
}

/// Select the codec for a provider kind. The set of kinds is closed; adding
/// a provider protocol means adding a codec here.
pub fn codec_for(kind: ProviderKind) -> &'static dyn WireCodec {
    match kind {
        ProviderKind::OpenAiCompatible => &OpenAiCodec,
        ProviderKind::AnthropicMessages => &AnthropicCodec,
        ProviderKind::VoiceSynthesis => &VoiceSynthesisCodec,
        ProviderKind::WebSearch => &WebSearchCodec,
    }
}

/// Detect a provider error envelope delivered with a success status.
/// The provider's own message is preserved verbatim.
pub(crate) fn detect_error_envelope(body: &Value) -> Option<Error> {
    let error = body.get("error")?;
    if error.is_null() {
        return None;
    }
    let message = error
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("provider signalled an error without a message")
        .to_string();
    let class = error
        .get("type")
        .or_else(|| error.get("code"))
        .and_then(|t| t.as_str())
        .unwrap_or("error_envelope")
        .to_string();
    Some(Error::Provider {
        status: 200,
        class,
        message,
        retry_after_ms: None,
    })
}

/// Assemble the canonical response, enforcing two boundaries: a body with
/// neither text content nor tool calls is a protocol violation, and a body
/// with pending tool calls decodes to null text; text plus tool calls is not a
/// state the callers are asked to reason about.
pub(crate) fn finish_response(
    text: Option<String>,
    tool_calls: Vec<ToolCall>,
    usage: Option<Usage>,
) -> Result<ChatResponse> {
    if text.is_none() && tool_calls.is_empty() {
        return Err(Error::parse_with_context(
            "response contained neither text content nor tool calls",
            ErrorContext::new().with_source("wire_decode"),
        ));
    }
    let terminal = tool_calls.is_empty();
    let text = if terminal { text } else { None };
    Ok(ChatResponse {
        text,
        tool_calls,
        usage,
        latency_ms: None,
        terminal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_is_parse_error_not_terminal() {
        let err = finish_response(None, Vec::new(), None).unwrap_err();
        assert_eq!(err.kind(), "parse");
    }

    #[test]
    fn error_envelope_preserves_provider_message() {
        let body = serde_json::json!({
            "error": {"message": "model is overloaded", "type": "overloaded_error"}
        });
        let err = detect_error_envelope(&body).unwrap();
        match err {
            Error::Provider { class, message, .. } => {
                assert_eq!(class, "overloaded_error");
                assert_eq!(message, "model is overloaded");
            }
            other => panic!("expected Provider error, got {:?}", other),
        }
    }

    #[test]
    fn null_error_field_is_not_an_envelope() {
        let body = serde_json::json!({"error": null, "choices": []});
        assert!(detect_error_envelope(&body).is_none());
    }
}
