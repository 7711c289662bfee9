//! Web-search codec. The query is the most recent user turn; ranked results
//! come back as terminal text so the UI renders them like any other answer.

use serde_json::Value;

use super::{WireCodec, WireRequest};
use crate::error::ErrorContext;
use crate::registry::{ProviderDescriptor, ProviderKind};
use crate::types::chat::{ChatRequest, ChatResponse};
use crate::{Error, Result};

const MAX_RESULTS: u32 = 5;

pub struct WebSearchCodec;

impl WireCodec for WebSearchCodec {
    fn kind(&self) -> ProviderKind {
        ProviderKind::WebSearch
    }

    fn encode(
        &self,
        request: &ChatRequest,
        descriptor: &ProviderDescriptor,
    ) -> Result<WireRequest> {
        let query = request.last_user_text().ok_or_else(|| {
            Error::configuration_with_context(
                "search dispatch requires at least one user turn",
                ErrorContext::new()
                    .with_provider(&descriptor.name)
                    .with_source("wire_encode"),
            )
        })?;

        let body = serde_json::json!({
            "query": query,
            "max_results": MAX_RESULTS,
            "include_answer": true,
        });
        Ok(WireRequest::post(descriptor.chat_path.clone(), body))
    }

    fn decode(&self, body: &Value) -> Result<ChatResponse> {
        if let Some(err) = super::detect_error_envelope(body) {
            return Err(err);
        }

        let mut lines: Vec<String> = Vec::new();
        if let Some(answer) = body.get("answer").and_then(|a| a.as_str()) {
            if !answer.is_empty() {
                lines.push(answer.to_string());
            }
        }
        if let Some(results) = body.get("results").and_then(|r| r.as_array()) {
            for (rank, result) in results.iter().enumerate() {
                let title = result.get("title").and_then(|t| t.as_str()).unwrap_or("");
                let url = result.get("url").and_then(|u| u.as_str()).unwrap_or("");
                let snippet = result
                    .get("content")
                    .or_else(|| result.get("snippet"))
                    .and_then(|c| c.as_str())
                    .unwrap_or("");
                lines.push(format!("{}. {} — {}\n   {}", rank + 1, title, url, snippet));
            }
        }

        let text = if lines.is_empty() {
            "No results found.".to_string()
        } else {
            lines.join("\n")
        };
        super::finish_response(Some(text), Vec::new(), None)
    }
}
