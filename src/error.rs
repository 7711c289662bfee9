use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Provider name the error originated from (e.g., "openai-main")
    pub provider: Option<String>,
    /// Capability being dispatched when the error occurred (e.g., "chat")
    pub capability: Option<String>,
    /// Additional context about the error (e.g., expected shape, raw body excerpt)
    pub details: Option<String>,
    /// Source of the error (e.g., "registry", "wire_decode")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = Some(capability.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Unified error type for the dispatch core.
/// This aggregates all low-level errors into the categories the UI layer can
/// act on; [`Error::kind`] yields the stable string used for localized
/// messaging.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Provider error: HTTP {status} ({class}): {message}")]
    Provider {
        status: u16,
        class: String,
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("Parse error: {message}{}", format_context(.context))]
    Parse {
        message: String,
        context: ErrorContext,
    },

    #[error("Terminal error after {attempts} attempt(s): {message}{}", .cause.as_ref().map(|c| format!(" (last cause: {})", c)).unwrap_or_default())]
    Terminal {
        attempts: u32,
        message: String,
        cause: Option<Box<Error>>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Attempt timed out after {0:?}")]
    AttemptTimeout(Duration),

    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Network transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref provider) = ctx.provider {
        parts.push(format!("provider: {}", provider));
    }
    if let Some(ref capability) = ctx.capability {
        parts.push(format!("capability: {}", capability));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Create a new parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Error::Parse {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a new parse error with structured context
    pub fn parse_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Parse {
            message: msg.into(),
            context,
        }
    }

    /// Stable kind string for UI-facing error mapping. These strings are a
    /// public contract; localized messages key off them.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration { .. } => "configuration",
            Error::Provider { .. } => "provider",
            Error::Parse { .. } => "parse",
            Error::Terminal { .. } => "terminal",
            Error::Cancelled => "cancelled",
            Error::AttemptTimeout(_) => "timeout",
            Error::ToolExecution { .. } => "tool_execution",
            Error::Transport(_) => "transport",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Parse { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Serializable form for the UI collaborator's response envelope.
    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

/// The `error` member of the canonical response envelope.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorEnvelope {
    pub kind: String,
    pub message: String,
}

/// Map an HTTP status to the stable provider error class strings.
pub fn error_class_for_status(status: u16) -> &'static str {
    match status {
        400 => "invalid_request",
        401 => "authentication",
        403 => "permission_denied",
        404 => "not_found",
        408 => "timeout",
        409 => "conflict",
        413 => "request_too_large",
        429 => "rate_limited",
        503 | 529 => "overloaded",
        500..=599 => "server_error",
        _ => "http_error",
    }
}
