//! 资源生命周期管理器 — 以所有者为键保证一次性释放
//!
//! Resource lifecycle manager. Long-lived handles (subscriptions, timers,
//! stream controllers, cached buffers) are registered under an owner key and
//! guaranteed exactly-once disposal — explicitly per owner, or at global
//! teardown. The internal map is the only mutable shared state in the core;
//! its lock is scoped to registration/disposal bookkeeping and is never held
//! across I/O or while disposal callbacks run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::telemetry::{DispatchEvent, EventSink};

/// Opaque identifier for a registered handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(Uuid);

/// A disposable resource: label plus a disposal callback invoked exactly
/// once.
pub struct ResourceHandle {
    id: HandleId,
    label: String,
    disposer: Option<Box<dyn FnOnce() + Send>>,
}

impl ResourceHandle {
    pub fn new(label: impl Into<String>, disposer: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id: HandleId(Uuid::new_v4()),
            label: label.into(),
            disposer: Some(Box::new(disposer)),
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    fn dispose(&mut self) {
        if let Some(disposer) = self.disposer.take() {
            disposer();
        }
    }
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("disposed", &self.disposer.is_none())
            .finish()
    }
}

/// Advisory snapshot produced by the leak check.
#[derive(Debug, Clone)]
pub struct LeakReport {
    pub tracked: usize,
    pub threshold: usize,
    pub owners: Vec<(String, usize)>,
}

pub struct LifecycleManager {
    entries: Mutex<HashMap<String, Vec<ResourceHandle>>>,
    warn_threshold: usize,
    sink: Arc<dyn EventSink>,
}

const MONITOR_OWNER: &str = "lifecycle.monitor";

impl LifecycleManager {
    pub fn new(warn_threshold: usize, sink: Arc<dyn EventSink>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            warn_threshold,
            sink,
        }
    }

    /// Take ownership of a handle. The handle is disposed when its owner key
    /// is disposed or at global teardown, whichever comes first.
    pub fn register(&self, owner: &str, handle: ResourceHandle) -> HandleId {
        let id = handle.id();
        debug!(owner, label = handle.label.as_str(), "registered resource handle");
        self.entries
            .lock()
            .unwrap()
            .entry(owner.to_string())
            .or_default()
            .push(handle);
        id
    }

    /// Dispose every handle registered under `owner`. Each disposal callback
    /// runs exactly once, outside the lock; calling this again for the same
    /// owner is a no-op.
    pub fn dispose_all(&self, owner: &str) {
        let removed = self.entries.lock().unwrap().remove(owner);
        if let Some(mut handles) = removed {
            debug!(owner, count = handles.len(), "disposing resource handles");
            for handle in &mut handles {
                handle.dispose();
            }
        }
    }

    /// Dispose a single handle. Returns false when the handle is unknown
    /// (already disposed, or never registered).
    pub fn dispose(&self, owner: &str, id: HandleId) -> bool {
        let removed = {
            let mut entries = self.entries.lock().unwrap();
            match entries.get_mut(owner) {
                Some(handles) => handles
                    .iter()
                    .position(|h| h.id() == id)
                    .map(|index| handles.remove(index)),
                None => None,
            }
        };
        match removed {
            Some(mut handle) => {
                handle.dispose();
                true
            }
            None => false,
        }
    }

    /// Global teardown: dispose everything under every owner key.
    pub fn dispose_everything(&self) {
        let drained: Vec<ResourceHandle> = {
            let mut entries = self.entries.lock().unwrap();
            entries.drain().flat_map(|(_, handles)| handles).collect()
        };
        for mut handle in drained {
            handle.dispose();
        }
    }

    pub fn tracked(&self, owner: &str) -> usize {
        self.entries
            .lock()
            .unwrap()
            .get(owner)
            .map(|h| h.len())
            .unwrap_or(0)
    }

    pub fn total_tracked(&self) -> usize {
        self.entries.lock().unwrap().values().map(|h| h.len()).sum()
    }

    /// Compare tracked counts against the threshold. Advisory: a warning
    /// signal, never an error, never blocking.
    pub fn leak_check(&self) -> Option<LeakReport> {
        let (tracked, owners) = {
            let entries = self.entries.lock().unwrap();
            let tracked = entries.values().map(|h| h.len()).sum::<usize>();
            let owners: Vec<(String, usize)> = entries
                .iter()
                .map(|(owner, handles)| (owner.clone(), handles.len()))
                .collect();
            (tracked, owners)
        };
        if tracked <= self.warn_threshold {
            return None;
        }
        warn!(
            tracked,
            threshold = self.warn_threshold,
            "tracked resource handles exceed threshold"
        );
        Some(LeakReport {
            tracked,
            threshold: self.warn_threshold,
            owners,
        })
    }

    /// Run the leak check periodically on a background task. The task's own
    /// abort guard is registered under an internal owner key, so global
    /// teardown stops the monitor too.
    pub fn spawn_leak_monitor(self: &Arc<Self>, interval: Duration) -> HandleId {
        let manager: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if let Some(report) = manager.leak_check() {
                    let _ = manager
                        .sink
                        .report(DispatchEvent::LeakWarning {
                            tracked: report.tracked,
                            threshold: report.threshold,
                        })
                        .await;
                }
            }
        });
        self.register(
            MONITOR_OWNER,
            ResourceHandle::new("leak-monitor", move || task.abort()),
        )
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        // Teardown through the map directly: &mut access, no lock contention.
        if let Ok(entries) = self.entries.get_mut() {
            for (_, handles) in entries.drain() {
                for mut handle in handles {
                    handle.dispose();
                }
            }
        }
    }
}
