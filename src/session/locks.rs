//! Per-session serialization of interactions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Hands out one async mutex per session id.
///
/// Requests from the same session queue behind each other; requests from
/// different sessions never share a lock.
#[derive(Debug, Clone, Default)]
pub struct SessionLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl SessionLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `session_id`.
    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(guard.entry(session_id.to_owned()).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop locks nobody is holding or waiting on.
    ///
    /// Returns the number of locks removed.
    pub fn prune(&self) -> usize {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = guard.len();
        guard.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - guard.len()
    }

    /// Number of session locks currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
