//! Pooled HTTP transport, one per provider descriptor. Maps non-success
//! statuses to provider errors with the body preserved, before any decoding
//! happens; the codecs only ever see success-status bodies.

use std::time::Duration;

use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::error::{error_class_for_status, ErrorContext};
use crate::normalize::WireRequest;
use crate::registry::ProviderDescriptor;
use crate::{Error, Result};

/// A success-status response body: complete JSON, or a raw SSE stream
/// handed to the codec's stream decoder.
#[derive(Debug, Clone)]
pub enum WireBody {
    Json(Value),
    EventStream(String),
}

pub struct HttpTransport {
    client: reqwest::Client,
    provider: String,
    base_url: String,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn for_descriptor(descriptor: &ProviderDescriptor) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(descriptor.timeout)
            .pool_max_idle_per_host(8)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(Error::Transport)?;

        Ok(Self {
            client,
            provider: descriptor.name.clone(),
            base_url: descriptor.base_url.clone(),
            api_key: descriptor.api_key.clone(),
        })
    }

    /// Execute a wire request against this provider. Non-success statuses
    /// become provider errors carrying the status, stable class string, and
    /// the provider's own message.
    pub async fn execute(&self, wire: &WireRequest) -> Result<WireBody> {
        let url = format!("{}{}", self.base_url, wire.path);
        let client_request_id = Uuid::new_v4().to_string();

        let mut request = match wire.method.as_str() {
            "GET" => self.client.get(&url),
            _ => self.client.post(&url),
        };
        if let Some(body) = &wire.body {
            request = request.json(body);
        }
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        for (name, value) in &wire.headers {
            request = request.header(name, value);
        }
        request = request.header("x-client-request-id", &client_request_id);

        let start = std::time::Instant::now();
        let response = request.send().await.map_err(Error::Transport)?;
        let status = response.status();

        if !status.is_success() {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000);
            let body = response.text().await.unwrap_or_default();
            let status = status.as_u16();
            let class = error_class_for_status(status);
            info!(
                provider = self.provider.as_str(),
                http_status = status,
                error_class = class,
                client_request_id = client_request_id.as_str(),
                duration_ms = start.elapsed().as_millis() as u64,
                "provider request failed"
            );
            return Err(Error::Provider {
                status,
                class: class.to_string(),
                message: extract_error_message(&body).unwrap_or(body),
                retry_after_ms,
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let text = response.text().await.map_err(Error::Transport)?;

        if content_type.starts_with("text/event-stream") {
            return Ok(WireBody::EventStream(text));
        }

        let json: Value = serde_json::from_str(&text).map_err(|e| {
            Error::parse_with_context(
                format!("response body is not valid JSON: {}", e),
                ErrorContext::new()
                    .with_provider(&self.provider)
                    .with_source("transport"),
            )
        })?;
        Ok(WireBody::Json(json))
    }

    /// Convenience GET returning parsed JSON (voice catalog and similar
    /// service endpoints).
    pub async fn get_json(&self, path: &str) -> Result<Value> {
        match self.execute(&WireRequest::get(path)).await? {
            WireBody::Json(json) => Ok(json),
            WireBody::EventStream(_) => Err(Error::parse_with_context(
                "expected a JSON body, got an event stream",
                ErrorContext::new()
                    .with_provider(&self.provider)
                    .with_source("transport"),
            )),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }
}

/// Pull the human-readable message out of the common provider error shapes.
fn extract_error_message(body: &str) -> Option<String> {
    let json: Value = serde_json::from_str(body).ok()?;
    json.pointer("/error/message")
        .or_else(|| json.get("message"))
        .or_else(|| json.get("detail"))
        .and_then(|v| v.as_str())
        .map(String::from)
}
