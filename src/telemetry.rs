//! Advisory signal sink. Components report noteworthy runtime events
//! (scheduled retries, exhausted retries, leak warnings) to an [`EventSink`]
//! owned by the host application — never to ambient global state. The
//! default sink drops everything; reporting is advisory and must never
//! block or fail a dispatch.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

/// Typed advisory events emitted by the core.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    /// A retryable failure was observed; the next attempt is scheduled.
    RetryScheduled {
        label: String,
        attempt: u32,
        delay: Duration,
    },
    /// All attempts failed; a terminal error is being surfaced.
    RetriesExhausted { label: String, attempts: u32 },
    /// Tracked resource handles exceed the configured threshold.
    LeakWarning { tracked: usize, threshold: usize },
}

/// Destination for advisory events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn report(&self, event: DispatchEvent) -> Result<()>;
}

/// Default sink: drops everything.
pub struct NoopSink;

#[async_trait]
impl EventSink for NoopSink {
    async fn report(&self, _event: DispatchEvent) -> Result<()> {
        Ok(())
    }
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoopSink)
}

/// In-memory sink for tests.
pub struct InMemorySink {
    events: Mutex<Vec<DispatchEvent>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<DispatchEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for InMemorySink {
    async fn report(&self, event: DispatchEvent) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Initialize an env-filtered tracing subscriber. Intended for binaries and
/// integration tests; safe to call more than once.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_sink_records_events() {
        let sink = InMemorySink::new();
        sink.report(DispatchEvent::RetriesExhausted {
            label: "chat".into(),
            attempts: 3,
        })
        .await
        .unwrap();
        assert_eq!(sink.len(), 1);
        assert!(matches!(
            sink.events()[0],
            DispatchEvent::RetriesExhausted { attempts: 3, .. }
        ));
    }
}
