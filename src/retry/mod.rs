//! 重试引擎 — 所有出站调用共用的有界指数退避执行器
//!
//! Retry/backoff engine. Every outbound call in the core goes through
//! [`RetryEngine::execute`]; no component hand-rolls its own loop. The
//! policy is compiled once at startup per call class and read-only after.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::RetrySettings;
use crate::telemetry::{DispatchEvent, EventSink};
use crate::{Error, Result};

/// Classification of a failed attempt. Which classes are retryable is part
/// of the policy, not hard-coded at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Connection-level failure (DNS, reset, refused).
    Network,
    /// Per-attempt deadline elapsed.
    Timeout,
    /// HTTP 429.
    RateLimited,
    /// HTTP 5xx.
    ServerError,
    /// Other 4xx: the request itself is wrong; retrying cannot help.
    ClientError,
    /// The response shape was unexpected.
    Protocol,
    /// Configuration, cancellation, anything retrying cannot fix.
    Fatal,
}

/// Classify an error for retry purposes.
pub fn classify(error: &Error) -> ErrorClass {
    match error {
        Error::Transport(e) if e.is_timeout() => ErrorClass::Timeout,
        Error::Transport(_) => ErrorClass::Network,
        Error::AttemptTimeout(_) => ErrorClass::Timeout,
        Error::Provider { status, .. } => match status {
            429 => ErrorClass::RateLimited,
            500..=599 => ErrorClass::ServerError,
            _ => ErrorClass::ClientError,
        },
        Error::Parse { .. } | Error::Serialization(_) => ErrorClass::Protocol,
        _ => ErrorClass::Fatal,
    }
}

/// Compiled retry policy for one call class.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
    pub retry_on: HashSet<ErrorClass>,
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            multiplier: settings.multiplier,
            jitter_min: Duration::from_millis(settings.jitter_min_ms),
            jitter_max: Duration::from_millis(settings.jitter_max_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            attempt_timeout: Duration::from_secs(settings.attempt_timeout_secs),
            retry_on: [
                ErrorClass::Network,
                ErrorClass::Timeout,
                ErrorClass::RateLimited,
                ErrorClass::ServerError,
            ]
            .into_iter()
            .collect(),
        }
    }

    fn is_retryable(&self, error: &Error) -> bool {
        self.retry_on.contains(&classify(error))
    }

    /// Deterministic part of the backoff for a completed attempt (1-based):
    /// `base * multiplier^(attempt-1)`, capped at `max_delay`.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let ms = (base_ms * exp).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(ms as u64)
    }

    /// Full sleep for a failed attempt: exponential backoff plus uniform
    /// jitter within the configured bounds. A provider-supplied
    /// `retry_after_ms` hint overrides the computed backoff.
    fn sleep_for(&self, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
        let backoff = match retry_after_ms {
            Some(ms) => Duration::from_millis(ms).min(self.max_delay),
            None => self.backoff_delay(attempt),
        };
        let (lo, hi) = (self.jitter_min.as_millis() as u64, self.jitter_max.as_millis() as u64);
        let jitter = if hi > lo {
            Duration::from_millis(rand::rng().random_range(lo..=hi))
        } else {
            Duration::from_millis(lo)
        };
        backoff + jitter
    }
}

/// Executes operations under a retry policy, reporting advisory events.
pub struct RetryEngine {
    sink: Arc<dyn EventSink>,
}

impl RetryEngine {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Run `op` until it succeeds, fails terminally, is cancelled, or the
    /// policy's attempts are exhausted. `op` receives the 1-based attempt
    /// number. Cancellation aborts immediately, with no further backoff sleep.
    pub async fn execute<T, F, Fut>(
        &self,
        label: &str,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                result = tokio::time::timeout(policy.attempt_timeout, op(attempt)) => {
                    match result {
                        Ok(inner) => inner,
                        Err(_) => Err(Error::AttemptTimeout(policy.attempt_timeout)),
                    }
                }
            };

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => e,
            };

            if !policy.is_retryable(&error) {
                return Err(error);
            }

            if attempt >= policy.max_attempts {
                let _ = self
                    .sink
                    .report(DispatchEvent::RetriesExhausted {
                        label: label.to_string(),
                        attempts: attempt,
                    })
                    .await;
                return Err(Error::Terminal {
                    attempts: attempt,
                    message: "retries exhausted".into(),
                    cause: Some(Box::new(error)),
                });
            }

            let retry_after_ms = match &error {
                Error::Provider { retry_after_ms, .. } => *retry_after_ms,
                _ => None,
            };
            let delay = policy.sleep_for(attempt, retry_after_ms);
            debug!(
                label,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying after failure"
            );
            let _ = self
                .sink
                .report(DispatchEvent::RetryScheduled {
                    label: label.to_string(),
                    attempt,
                    delay,
                })
                .await;

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{noop_sink, InMemorySink};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn policy(max_attempts: u32, base_delay_ms: u64) -> RetryPolicy {
        RetryPolicy::from_settings(&RetrySettings {
            max_attempts,
            base_delay_ms,
            multiplier: 2.0,
            jitter_min_ms: 0,
            jitter_max_ms: 0,
            max_delay_ms: 10_000,
            attempt_timeout_secs: 5,
        })
    }

    fn server_error() -> Error {
        Error::Provider {
            status: 500,
            class: "server_error".into(),
            message: "boom".into(),
            retry_after_ms: None,
        }
    }

    #[test]
    fn classification_matrix() {
        assert_eq!(classify(&server_error()), ErrorClass::ServerError);
        assert_eq!(
            classify(&Error::Provider {
                status: 429,
                class: "rate_limited".into(),
                message: String::new(),
                retry_after_ms: None,
            }),
            ErrorClass::RateLimited
        );
        assert_eq!(
            classify(&Error::Provider {
                status: 400,
                class: "invalid_request".into(),
                message: String::new(),
                retry_after_ms: None,
            }),
            ErrorClass::ClientError
        );
        assert_eq!(
            classify(&Error::AttemptTimeout(Duration::from_secs(1))),
            ErrorClass::Timeout
        );
        assert_eq!(classify(&Error::parse("bad shape")), ErrorClass::Protocol);
        assert_eq!(classify(&Error::configuration("no key")), ErrorClass::Fatal);
    }

    #[tokio::test]
    async fn exact_attempt_count_before_terminal() {
        let engine = RetryEngine::new(noop_sink());
        let attempts = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let err = engine
            .execute("test", &policy(3, 1), &cancel, |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(server_error()) }
            })
            .await
            .unwrap_err();

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        match err {
            Error::Terminal { attempts, cause, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(cause.unwrap().kind(), "provider");
            }
            other => panic!("expected Terminal, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn backoff_elapsed_time_floor() {
        // base 10ms, multiplier 2, 3 attempts: sleeps of 10ms + 20ms = 30ms
        let engine = RetryEngine::new(noop_sink());
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let _ = engine
            .execute("test", &policy(3, 10), &cancel, |_| async {
                Err::<(), _>(server_error())
            })
            .await;

        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn non_retryable_surfaces_immediately() {
        let engine = RetryEngine::new(noop_sink());
        let attempts = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let err = engine
            .execute("test", &policy(5, 1), &cancel, |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(Error::Provider {
                        status: 401,
                        class: "authentication".into(),
                        message: "bad key".into(),
                        retry_after_ms: None,
                    })
                }
            })
            .await
            .unwrap_err();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(err.kind(), "provider");
    }

    #[tokio::test]
    async fn success_after_transient_failures() {
        let engine = RetryEngine::new(noop_sink());
        let attempts = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let value = engine
            .execute("test", &policy(3, 1), &cancel, |_| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(server_error())
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_stops_backoff_sleep() {
        let engine = RetryEngine::new(noop_sink());
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        // long backoff; cancel during the first sleep
        let mut slow = policy(3, 60_000);
        slow.max_delay = Duration::from_secs(120);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let start = Instant::now();
        let err = engine
            .execute("test", &slow, &cancel, |_| async {
                Err::<(), _>(server_error())
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "cancelled");
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn per_attempt_timeout_is_retryable() {
        let engine = RetryEngine::new(noop_sink());
        let cancel = CancellationToken::new();
        let mut fast = policy(2, 1);
        fast.attempt_timeout = Duration::from_millis(20);

        let err = engine
            .execute("test", &fast, &cancel, |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<(), _>(())
            })
            .await
            .unwrap_err();

        match err {
            Error::Terminal { attempts, cause, .. } => {
                assert_eq!(attempts, 2);
                assert_eq!(cause.unwrap().kind(), "timeout");
            }
            other => panic!("expected Terminal, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn advisory_events_are_reported() {
        let sink = Arc::new(InMemorySink::new());
        let engine = RetryEngine::new(sink.clone());
        let cancel = CancellationToken::new();

        let _ = engine
            .execute("chat", &policy(2, 1), &cancel, |_| async {
                Err::<(), _>(server_error())
            })
            .await;

        let events = sink.events();
        assert!(matches!(events[0], DispatchEvent::RetryScheduled { attempt: 1, .. }));
        assert!(matches!(
            events.last().unwrap(),
            DispatchEvent::RetriesExhausted { attempts: 2, .. }
        ));
    }
}
