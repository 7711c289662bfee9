//! Safe remote resource loader. Fetch failures, bad schemes, oversized
//! bodies, and timeouts all degrade to a deterministic placeholder instead
//! of propagating — a crashed image decode is strictly worse for the UI
//! than a grey square. Successful loads are cached (bounded, LRU) and the
//! cache registers its own teardown with the lifecycle manager.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use lru::LruCache;
use tracing::{debug, warn};
use url::Url;

use crate::config::ResourceLimits;
use crate::error::error_class_for_status;
use crate::lifecycle::{LifecycleManager, ResourceHandle};
use crate::{Error, Result};

/// 1x1 transparent PNG served whenever a resource cannot be loaded.
pub const FALLBACK_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

const LOADER_OWNER: &str = "resource.loader";

pub struct SafeResourceLoader {
    http: reqwest::Client,
    cache: Arc<Mutex<LruCache<String, Bytes>>>,
    max_resource_bytes: usize,
    fallback: Bytes,
}

impl SafeResourceLoader {
    pub fn new(limits: &ResourceLimits, lifecycle: &Arc<LifecycleManager>) -> Result<Self> {
        let capacity = NonZeroUsize::new(limits.cache_entries).unwrap_or(NonZeroUsize::MIN);
        let cache = Arc::new(Mutex::new(LruCache::new(capacity)));

        let cache_for_teardown = Arc::clone(&cache);
        lifecycle.register(
            LOADER_OWNER,
            ResourceHandle::new("resource-cache", move || {
                cache_for_teardown.lock().unwrap().clear();
            }),
        );

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(limits.fetch_timeout_secs))
            .build()
            .map_err(Error::Transport)?;

        Ok(Self {
            http,
            cache,
            max_resource_bytes: limits.max_resource_bytes,
            fallback: Bytes::from_static(FALLBACK_PNG),
        })
    }

    /// Fetch a remote resource. Never fails: every error path yields the
    /// placeholder.
    pub async fn load(&self, raw_url: &str) -> Bytes {
        let url = match Self::validate(raw_url) {
            Some(url) => url,
            None => {
                warn!(url = raw_url, "rejected resource url, serving placeholder");
                return self.fallback.clone();
            }
        };

        if let Some(hit) = self.cache.lock().unwrap().get(raw_url) {
            debug!(url = raw_url, "resource cache hit");
            return hit.clone();
        }

        match self.fetch(url).await {
            Ok(bytes) => {
                self.cache
                    .lock()
                    .unwrap()
                    .put(raw_url.to_string(), bytes.clone());
                bytes
            }
            Err(e) => {
                warn!(url = raw_url, error = %e, "resource fetch failed, serving placeholder");
                self.fallback.clone()
            }
        }
    }

    /// The placeholder returned on any failure. Exposed so UIs can compare.
    pub fn fallback(&self) -> Bytes {
        self.fallback.clone()
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    fn validate(raw_url: &str) -> Option<Url> {
        let url = Url::parse(raw_url).ok()?;
        matches!(url.scheme(), "http" | "https").then_some(url)
    }

    async fn fetch(&self, url: Url) -> Result<Bytes> {
        let response = self.http.get(url).send().await.map_err(Error::Transport)?;
        let status = response.status();
        if !status.is_success() {
            let status = status.as_u16();
            return Err(Error::Provider {
                status,
                class: error_class_for_status(status).to_string(),
                message: "resource fetch failed".into(),
                retry_after_ms: None,
            });
        }
        if let Some(length) = response.content_length() {
            if length as usize > self.max_resource_bytes {
                return Err(Error::parse(format!(
                    "resource exceeds size limit ({} > {} bytes)",
                    length, self.max_resource_bytes
                )));
            }
        }
        let bytes = response.bytes().await.map_err(Error::Transport)?;
        if bytes.len() > self.max_resource_bytes {
            return Err(Error::parse(format!(
                "resource exceeds size limit ({} > {} bytes)",
                bytes.len(),
                self.max_resource_bytes
            )));
        }
        if bytes.is_empty() {
            return Err(Error::parse("resource body is empty"));
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::noop_sink;

    fn loader() -> (SafeResourceLoader, Arc<LifecycleManager>) {
        let lifecycle = Arc::new(LifecycleManager::new(100, noop_sink()));
        let loader = SafeResourceLoader::new(&ResourceLimits::default(), &lifecycle).unwrap();
        (loader, lifecycle)
    }

    #[tokio::test]
    async fn bad_scheme_serves_placeholder() {
        let (loader, _lifecycle) = loader();
        assert_eq!(loader.load("file:///etc/passwd").await, FALLBACK_PNG);
        assert_eq!(loader.load("not a url at all").await, FALLBACK_PNG);
        assert_eq!(loader.cached_entries(), 0);
    }

    #[tokio::test]
    async fn teardown_clears_cache() {
        let (loader, lifecycle) = loader();
        loader
            .cache
            .lock()
            .unwrap()
            .put("https://cdn.example.com/a.png".into(), Bytes::from_static(b"img"));
        assert_eq!(loader.cached_entries(), 1);

        lifecycle.dispose_all("resource.loader");
        assert_eq!(loader.cached_entries(), 0);
    }

    #[test]
    fn cache_evicts_least_recently_used() {
        let lifecycle = Arc::new(LifecycleManager::new(100, noop_sink()));
        let limits = ResourceLimits {
            cache_entries: 2,
            ..Default::default()
        };
        let loader = SafeResourceLoader::new(&limits, &lifecycle).unwrap();

        let mut cache = loader.cache.lock().unwrap();
        cache.put("a".into(), Bytes::from_static(b"1"));
        cache.put("b".into(), Bytes::from_static(b"2"));
        // touch "a" so "b" becomes the eviction candidate
        cache.get("a");
        cache.put("c".into(), Bytes::from_static(b"3"));
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
    }
}
