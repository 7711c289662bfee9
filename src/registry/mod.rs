//! 能力注册表 — 每个能力映射到唯一的 Provider 描述符
//!
//! Provider registry: a static, in-memory catalog of provider descriptors
//! keyed by capability. Resolution is deterministic — each capability maps to
//! exactly one descriptor, swappable only via configuration (process
//! restart). Read-only after startup; safe for unsynchronized concurrent
//! reads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{DispatchConfig, ProviderConfig};
use crate::error::ErrorContext;
use crate::{Error, Result};

/// A category of AI task, mapped to exactly one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Chat,
    Code,
    Math,
    Reasoning,
    Voice,
    Search,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Chat => "chat",
            Capability::Code => "code",
            Capability::Math => "math",
            Capability::Reasoning => "reasoning",
            Capability::Voice => "voice",
            Capability::Search => "search",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of provider wire protocols. One codec per kind, selected once
/// at resolution time, never inspected ad hoc at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[serde(rename = "openai_compatible")]
    OpenAiCompatible,
    AnthropicMessages,
    VoiceSynthesis,
    WebSearch,
}

impl ProviderKind {
    fn default_chat_path(&self) -> &'static str {
        match self {
            ProviderKind::OpenAiCompatible => "/v1/chat/completions",
            ProviderKind::AnthropicMessages => "/v1/messages",
            ProviderKind::VoiceSynthesis => "/v1/text-to-speech",
            ProviderKind::WebSearch => "/search",
        }
    }
}

/// Immutable description of one provider, constructed once at process start.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub name: String,
    pub kind: ProviderKind,
    pub base_url: String,
    /// Path of the primary (chat/synthesis/search) endpoint.
    pub chat_path: String,
    /// Path of the voice catalog endpoint; only meaningful for voice providers.
    pub voices_path: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub timeout: Duration,
}

const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

impl ProviderDescriptor {
    fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let api_key = match (&cfg.api_key, &cfg.api_key_env) {
            (Some(key), _) => Some(key.clone()),
            (None, Some(var)) => match std::env::var(var) {
                Ok(key) => Some(key),
                Err(_) => {
                    return Err(Error::configuration_with_context(
                        format!("credential environment variable '{}' is not set", var),
                        ErrorContext::new()
                            .with_provider(&cfg.name)
                            .with_source("registry"),
                    ));
                }
            },
            (None, None) => None,
        };

        Ok(Self {
            name: cfg.name.clone(),
            kind: cfg.kind,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            chat_path: cfg
                .chat_path
                .clone()
                .unwrap_or_else(|| cfg.kind.default_chat_path().to_string()),
            voices_path: cfg
                .voices_path
                .clone()
                .unwrap_or_else(|| "/v1/voices".to_string()),
            model: cfg.model.clone(),
            api_key,
            max_tokens: cfg.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            timeout: Duration::from_secs(cfg.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
        })
    }
}

/// Capability → descriptor catalog. No load-balancing: a single active
/// provider per capability.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    by_capability: HashMap<Capability, Arc<ProviderDescriptor>>,
}

impl ProviderRegistry {
    pub fn from_config(config: &DispatchConfig) -> Result<Self> {
        let mut by_capability = HashMap::new();
        for provider in &config.providers {
            let descriptor = Arc::new(ProviderDescriptor::from_config(provider)?);
            for capability in &provider.capabilities {
                if by_capability
                    .insert(*capability, Arc::clone(&descriptor))
                    .is_some()
                {
                    return Err(Error::configuration_with_context(
                        format!("capability '{}' is claimed by more than one provider", capability),
                        ErrorContext::new()
                            .with_provider(&provider.name)
                            .with_capability(capability.as_str())
                            .with_source("registry"),
                    ));
                }
            }
        }
        Ok(Self { by_capability })
    }

    /// Resolve the single provider for a capability. Failure is a
    /// configuration error, never retried.
    pub fn resolve(&self, capability: Capability) -> Result<Arc<ProviderDescriptor>> {
        self.by_capability
            .get(&capability)
            .cloned()
            .ok_or_else(|| {
                Error::configuration_with_context(
                    "no provider registered for capability",
                    ErrorContext::new()
                        .with_capability(capability.as_str())
                        .with_source("registry"),
                )
            })
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        self.by_capability.keys().copied().collect()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<ProviderDescriptor>> {
        self.by_capability.values()
    }
}
