//! Configuration surface consumed (not owned) by the dispatch core.
//!
//! The host application owns configuration loading and hands the core a
//! [`DispatchConfig`]. Values here are read once at startup; changes require
//! a process restart.

use serde::Deserialize;

use crate::error::ErrorContext;
use crate::registry::{Capability, ProviderKind};
use crate::{Error, Result};

/// Top-level configuration for the dispatch core.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub retry: RetryTable,
    /// Hard bound on tool-call round trips within one dispatch.
    #[serde(default = "default_tool_loop_cap")]
    pub tool_loop_cap: u32,
    #[serde(default)]
    pub resources: ResourceLimits,
}

impl DispatchConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid dispatch configuration: {}", e),
                ErrorContext::new().with_source("config"),
            )
        })
    }

    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }
}

/// One provider entry. Credentials resolve from `api_key_env` at registry
/// construction; a literal `api_key` takes precedence (test fixtures).
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    pub capabilities: Vec<Capability>,
    pub base_url: String,
    #[serde(default)]
    pub chat_path: Option<String>,
    #[serde(default)]
    pub voices_path: Option<String>,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Retry policies per call class.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryTable {
    #[serde(default = "RetrySettings::interactive")]
    pub interactive: RetrySettings,
    #[serde(default = "RetrySettings::batch")]
    pub batch: RetrySettings,
}

impl Default for RetryTable {
    fn default() -> Self {
        Self {
            interactive: RetrySettings::interactive(),
            batch: RetrySettings::batch(),
        }
    }
}

/// Raw retry policy values; compiled into a `retry::RetryPolicy` at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    #[serde(default)]
    pub jitter_min_ms: u64,
    #[serde(default = "default_jitter_max_ms")]
    pub jitter_max_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

impl RetrySettings {
    pub fn interactive() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            multiplier: 2.0,
            jitter_min_ms: 0,
            jitter_max_ms: default_jitter_max_ms(),
            max_delay_ms: default_max_delay_ms(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }

    pub fn batch() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 2_000,
            multiplier: 2.0,
            jitter_min_ms: 0,
            jitter_max_ms: 1_000,
            max_delay_ms: 30_000,
            attempt_timeout_secs: 120,
        }
    }
}

/// Limits for the resource loader and lifecycle leak check.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceLimits {
    #[serde(default = "default_cache_entries")]
    pub cache_entries: usize,
    /// Bound on a single fetched resource; larger bodies fall back.
    #[serde(default = "default_max_resource_bytes")]
    pub max_resource_bytes: usize,
    /// Tracked-handle count above which the leak check warns.
    #[serde(default = "default_leak_warn_threshold")]
    pub leak_warn_threshold: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cache_entries: default_cache_entries(),
            max_resource_bytes: default_max_resource_bytes(),
            leak_warn_threshold: default_leak_warn_threshold(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

fn default_tool_loop_cap() -> u32 {
    4
}

fn default_jitter_max_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_attempt_timeout_secs() -> u64 {
    30
}

fn default_cache_entries() -> usize {
    64
}

fn default_max_resource_bytes() -> usize {
    5 * 1024 * 1024
}

fn default_leak_warn_threshold() -> usize {
    256
}

fn default_fetch_timeout_secs() -> u64 {
    15
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_yaml_fills_defaults() {
        let config = DispatchConfig::from_yaml(
            r#"
providers:
  - name: chat
    kind: openai_compatible
    capabilities: [chat]
    base_url: https://api.example.com
    model: gpt-4o
    api_key: sk-test
"#,
        )
        .unwrap();
        assert_eq!(config.tool_loop_cap, 4);
        assert_eq!(config.retry.interactive.max_attempts, 3);
        assert_eq!(config.retry.batch.max_attempts, 5);
        assert_eq!(config.resources.cache_entries, 64);
        assert_eq!(config.resources.max_resource_bytes, 5 * 1024 * 1024);
    }

    #[test]
    fn explicit_retry_values_override_defaults() {
        let config = DispatchConfig::from_yaml(
            r#"
providers:
  - name: chat
    kind: openai_compatible
    capabilities: [chat]
    base_url: https://api.example.com
    model: gpt-4o
    api_key: sk-test
retry:
  interactive:
    max_attempts: 7
    base_delay_ms: 10
    multiplier: 3.0
tool_loop_cap: 2
"#,
        )
        .unwrap();
        assert_eq!(config.retry.interactive.max_attempts, 7);
        assert_eq!(config.retry.interactive.multiplier, 3.0);
        assert_eq!(config.tool_loop_cap, 2);
    }

    #[test]
    fn malformed_yaml_is_configuration_error() {
        let err = DispatchConfig::from_yaml("providers: [not a provider]").unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }
}
