//! 调度路由器 — 解析 Provider、编码请求、带重试执行、驱动工具循环
//!
//! Dispatch router. One invocation handles one logical request: resolve the
//! provider, encode the wire request, execute it under the retry policy,
//! decode, and drive the tool-call loop to completion. No conversation state
//! is persisted here; callers serialize dispatches per conversation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::ErrorContext;
use crate::normalize::codec_for;
use crate::orchestrator::ToolOrchestrator;
use crate::registry::ProviderRegistry;
use crate::retry::{RetryEngine, RetryPolicy};
use crate::transport::{HttpTransport, WireBody};
use crate::types::chat::{CallClass, ChatRequest, ChatResponse};
use crate::{Error, Result};

use super::DispatcherBuilder;

pub struct Dispatcher {
    pub(crate) registry: Arc<ProviderRegistry>,
    pub(crate) transports: HashMap<String, Arc<HttpTransport>>,
    pub(crate) engine: RetryEngine,
    pub(crate) policies: HashMap<CallClass, RetryPolicy>,
    pub(crate) orchestrator: ToolOrchestrator,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub(crate) fn transport_for(&self, provider: &str) -> Result<Arc<HttpTransport>> {
        self.transports.get(provider).cloned().ok_or_else(|| {
            Error::configuration_with_context(
                "no transport constructed for provider",
                ErrorContext::new()
                    .with_provider(provider)
                    .with_source("dispatch"),
            )
        })
    }

    /// Dispatch one request to its capability's provider and drive any tool
    /// calls to completion. Returns a terminal [`ChatResponse`], or one of
    /// the taxonomy errors, never a raw network exception.
    pub async fn dispatch(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        let descriptor = self.registry.resolve(request.capability)?;
        let codec = codec_for(descriptor.kind);
        let transport = self.transport_for(&descriptor.name)?;
        let policy = self.policies.get(&request.call_class).ok_or_else(|| {
            Error::configuration_with_context(
                "no retry policy compiled for call class",
                ErrorContext::new().with_source("dispatch"),
            )
        })?;

        let start = Instant::now();
        let label = format!("{}:{}", descriptor.name, request.capability);

        let result = self
            .orchestrator
            .drive(request.turns.clone(), cancel, |turns| {
                let round = request.with_turns(turns);
                let descriptor = Arc::clone(&descriptor);
                let transport = Arc::clone(&transport);
                let label = label.clone();
                async move {
                    let wire = codec.encode(&round, &descriptor)?;
                    let body = self
                        .engine
                        .execute(&label, policy, cancel, |_attempt| {
                            let transport = Arc::clone(&transport);
                            let wire = wire.clone();
                            async move { transport.execute(&wire).await }
                        })
                        .await?;
                    let mut response = match body {
                        WireBody::Json(json) => codec.decode(&json),
                        WireBody::EventStream(raw) => codec.decode_stream(&raw),
                    }
                    .map_err(|e| match e {
                        // parse failures must name the provider so callers can
                        // tell protocol drift from an outage
                        Error::Parse { message, context } => Error::Parse {
                            message,
                            context: context
                                .with_provider(descriptor.name.clone())
                                .with_capability(round.capability.as_str()),
                        },
                        other => other,
                    })?;
                    response.latency_ms = Some(start.elapsed().as_millis() as u64);
                    Ok(response)
                }
            })
            .await;

        match &result {
            Ok(response) => info!(
                provider = descriptor.name.as_str(),
                capability = request.capability.as_str(),
                duration_ms = start.elapsed().as_millis() as u64,
                terminal = response.terminal,
                "dispatch completed"
            ),
            Err(e) => info!(
                provider = descriptor.name.as_str(),
                capability = request.capability.as_str(),
                duration_ms = start.elapsed().as_millis() as u64,
                error_kind = e.kind(),
                "dispatch failed"
            ),
        }

        result
    }
}
