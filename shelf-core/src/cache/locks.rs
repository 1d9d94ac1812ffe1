use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per chapter id, created on demand and dropped when idle.
#[derive(Default)]
pub struct KeyLocks {
    inflight: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(self: &Arc<Self>, key: &str) -> KeyGuard {
        let lock = self
            .inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        let guard = lock.lock_owned().await;
        KeyGuard {
            key: key.to_string(),
            locks: Arc::clone(self),
            guard: Some(guard),
        }
    }

    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }
}

pub struct KeyGuard {
    key: String,
    locks: Arc<KeyLocks>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map still references the mutex: nobody holds or waits on it.
        self.locks
            .inflight
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
