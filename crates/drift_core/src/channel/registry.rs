//! Listener registry for job events.
//!
//! Listeners register per job and event kind. Each registration returns a
//! [`Subscription`] handle; dropping the handle removes the listener, so a
//! forgotten handle cannot leak callbacks.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, Weak};

use log::{debug, error};

use super::protocol::{JobEvent, JobEventKind};

/// A registered event listener.
pub type Listener = Arc<dyn Fn(&JobEvent) + Send + Sync>;

type Key = (String, JobEventKind);

#[derive(Default)]
struct Inner {
    next_id: u64,
    listeners: HashMap<Key, Vec<(u64, Listener)>>,
}

/// Registry of listeners keyed by (job id, event kind).
#[derive(Default)]
pub struct ListenerRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. The listener stays active until the returned
    /// handle is dropped or the job's listeners are removed wholesale.
    pub fn register(&self, job_id: &str, kind: JobEventKind, listener: Listener) -> Subscription {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .listeners
            .entry((job_id.to_string(), kind))
            .or_default()
            .push((id, listener));
        Subscription {
            registry: Arc::downgrade(&self.inner),
            key: (job_id.to_string(), kind),
            id,
        }
    }

    /// Invoke all listeners for a (job, kind). A panicking listener is
    /// caught and logged; the remaining listeners still run.
    pub fn dispatch(&self, kind: JobEventKind, event: &JobEvent) {
        let listeners: Vec<Listener> = {
            let inner = self.inner.lock().unwrap();
            inner
                .listeners
                .get(&(event.job_id.clone(), kind))
                .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
                .unwrap_or_default()
        };

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!(
                    "[EventChannel] listener for {}:{} panicked, continuing",
                    event.job_id, kind
                );
            }
        }
    }

    /// Remove every listener for a job across all event kinds.
    pub fn remove_job(&self, job_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.listeners.len();
        inner.listeners.retain(|(id, _), _| id != job_id);
        if inner.listeners.len() != before {
            debug!("[EventChannel] removed listeners for job {}", job_id);
        }
    }

    /// Number of listeners registered for a (job, kind).
    pub fn count(&self, job_id: &str, kind: JobEventKind) -> usize {
        self.inner
            .lock()
            .unwrap()
            .listeners
            .get(&(job_id.to_string(), kind))
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("ListenerRegistry")
            .field("keys", &inner.listeners.len())
            .finish()
    }
}

/// Handle to a registered listener. Dropping it removes the listener.
pub struct Subscription {
    registry: Weak<Mutex<Inner>>,
    key: Key,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut inner = registry.lock().unwrap();
            if let Some(entries) = inner.listeners.get_mut(&self.key) {
                entries.retain(|(id, _)| *id != self.id);
                if entries.is_empty() {
                    inner.listeners.remove(&self.key);
                }
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("job_id", &self.key.0)
            .field("kind", &self.key.1)
            .finish()
    }
}
