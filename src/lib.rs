//! # ai-dispatch-rust
//!
//! 多模型聊天应用的调度与弹性核心 — 统一的多厂商 AI 请求路由层。
//!
//! Provider dispatch and resilience core for multi-model chat applications.
//!
//! ## Overview
//!
//! This library is the layer of a consumer chat application that routes user
//! requests to one of several heterogeneous AI backends (general chat models,
//! specialized reasoning/coding/math models, voice synthesis, web search) and
//! returns a normalized result. It hides protocol differences between
//! providers, drives structured tool calling, retries and fails over on
//! provider errors, and keeps long-lived resources (caches, timers,
//! subscriptions) from leaking under retry storms.
//!
//! ## Core Philosophy
//!
//! - **Provider-Agnostic**: one canonical request/response envelope; each
//!   provider's wire shape is confined to its [`normalize`] codec
//! - **Resilient by Construction**: every outbound call goes through the
//!   single [`retry`] engine; no component hand-rolls its own loop
//! - **Cancellation-Aware**: one token threaded through every suspension point
//! - **Leak-Safe**: disposable handles are owned by the [`lifecycle`] manager
//!   from registration until disposal
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_dispatch_rust::{Dispatcher, ChatRequest, Capability, Turn};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> ai_dispatch_rust::Result<()> {
//!     let config = ai_dispatch_rust::DispatchConfig::from_path("dispatch.yaml")?;
//!     let dispatcher = Dispatcher::builder().config(config).build()?;
//!
//!     let request = ChatRequest::new(Capability::Chat, vec![Turn::user("2+2?")]);
//!     let response = dispatcher.dispatch(request, &CancellationToken::new()).await?;
//!     println!("{}", response.text.unwrap_or_default());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | Canonical envelopes (turns, tool calls, chat request/response) |
//! | [`config`] | Configuration surface consumed from the host application |
//! | [`registry`] | Capability → provider descriptor resolution |
//! | [`normalize`] | Per-provider wire codecs behind one trait |
//! | [`retry`] | Bounded exponential-backoff execution engine |
//! | [`orchestrator`] | Tool-call state machine and executor fan-out |
//! | [`dispatch`] | Top-level router: resolve → encode → execute → decode |
//! | [`transport`] | Pooled HTTP transport per provider |
//! | [`lifecycle`] | Owner-keyed disposable-handle registry |
//! | [`loader`] | Safe remote resource loader with placeholder fallback |
//! | [`voice`] | Voice catalog, selection, and synthesis surface |
//! | [`telemetry`] | Advisory event sink and tracing init |

pub mod config;
pub mod dispatch;
pub mod lifecycle;
pub mod loader;
pub mod normalize;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod telemetry;
pub mod transport;
pub mod types;
pub mod voice;

// Re-export main types for convenience
pub use config::{DispatchConfig, ProviderConfig, ResourceLimits, RetrySettings};
pub use dispatch::{Dispatcher, DispatcherBuilder};
pub use lifecycle::{LifecycleManager, ResourceHandle};
pub use loader::SafeResourceLoader;
pub use orchestrator::{ToolExecutor, ToolExecutorSet};
pub use registry::{Capability, ProviderDescriptor, ProviderKind, ProviderRegistry};
pub use retry::{RetryEngine, RetryPolicy};
pub use telemetry::{DispatchEvent, EventSink};
pub use types::{
    chat::{CallClass, ChatRequest, ChatResponse, GenerationParams, Usage},
    message::{Role, Turn},
    tool::{ToolCall, ToolDefinition, ToolResult},
};
pub use voice::{AudioClip, VoiceProfile, VoiceSelectionManager};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext, ErrorEnvelope};
