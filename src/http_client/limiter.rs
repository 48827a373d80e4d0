use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Concurrency ceilings for one batch: a global slot count and a per-host
/// slot count. A limit of zero means unlimited.
pub(crate) struct BatchLimiter {
    global: Option<Arc<Semaphore>>,
    per_host: usize,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
}

/// Slots held for the duration of one request; released on drop.
pub(crate) struct Slot {
    _global: Option<OwnedSemaphorePermit>,
    _host: Option<OwnedSemaphorePermit>,
}

fn semaphore(limit: usize) -> Option<Arc<Semaphore>> {
    (limit > 0).then(|| Arc::new(Semaphore::new(limit)))
}

impl BatchLimiter {
    pub fn new(global: usize, per_host: usize) -> Self {
        Self {
            global: semaphore(global),
            per_host,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    fn host(&self, host: &str) -> Option<Arc<Semaphore>> {
        if self.per_host == 0 {
            return None;
        }
        let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host)));
        Some(Arc::clone(slot))
    }

    /// Wait for a global slot, then a slot for `host`.
    pub async fn acquire(&self, host: &str) -> Slot {
        // The semaphores are never closed, so acquisition cannot fail.
        let global = match &self.global {
            Some(sem) => Arc::clone(sem).acquire_owned().await.ok(),
            None => None,
        };
        let host = match self.host(host) {
            Some(sem) => sem.acquire_owned().await.ok(),
            None => None,
        };
        Slot {
            _global: global,
            _host: host,
        }
    }

    #[cfg(test)]
    fn tracked_hosts(&self) -> usize {
        self.hosts.lock().unwrap().len()
    }
}
