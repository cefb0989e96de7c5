//! Session storage with an explicit dirty flag.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Default session timeout (30 minutes).
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Key-value storage scoped by an opaque session identifier.
///
/// Writes made through [`SessionStore::set`] are staged. They only become
/// durable once [`SessionStore::mark_modified`] has been called for the
/// session before the interaction ends with [`SessionStore::release`].
pub trait SessionStore: Send + Sync + std::fmt::Debug {
    /// Read a value, including writes staged by the current interaction.
    fn get(&self, session_id: &str, key: &str) -> Option<Value>;

    /// Stage a value for the session.
    fn set(&self, session_id: &str, key: &str, value: Value);

    /// Flag the session as modified so staged writes are kept.
    fn mark_modified(&self, session_id: &str);

    /// End the interaction that touched `session_id`.
    fn release(&self, _session_id: &str) {}
}

#[derive(Debug)]
struct SessionRecord {
    committed: HashMap<String, Value>,
    staged: HashMap<String, Value>,
    modified: bool,
    last_activity: DateTime<Utc>,
}

impl SessionRecord {
    fn new() -> Self {
        Self {
            committed: HashMap::new(),
            staged: HashMap::new(),
            modified: false,
            last_activity: Utc::now(),
        }
    }

    fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    fn is_expired_with_timeout(&self, timeout: Duration) -> bool {
        let now = Utc::now();
        match (now - self.last_activity).to_std() {
            Ok(idle) => idle > timeout,
            // Negative duration means clock skew.
            Err(_) => false,
        }
    }
}

/// Thread-safe in-memory [`SessionStore`].
///
/// Each interaction works on a copy-on-write view of its session: staged
/// writes are visible to later reads in the same interaction, and
/// [`MemorySessionStore::release`] either commits them (when the session was
/// marked modified) or drops them.
#[derive(Debug, Clone)]
pub struct MemorySessionStore {
    inner: Arc<MemorySessionStoreInner>,
}

#[derive(Debug)]
struct MemorySessionStoreInner {
    sessions: RwLock<HashMap<String, SessionRecord>>,
    idle_timeout: Duration,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionStore {
    /// Create a store using [`DEFAULT_SESSION_TIMEOUT`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_idle_timeout(DEFAULT_SESSION_TIMEOUT)
    }

    /// Create a store whose sessions expire after `idle_timeout` of inactivity.
    #[must_use]
    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(MemorySessionStoreInner {
                sessions: RwLock::new(HashMap::new()),
                idle_timeout,
            }),
        }
    }

    /// Whether the store holds any state for `session_id`.
    #[must_use]
    pub fn contains(&self, session_id: &str) -> bool {
        self.read().contains_key(session_id)
    }

    /// Remove a session and everything stored under it.
    pub fn remove(&self, session_id: &str) -> bool {
        let removed = self.write().remove(session_id).is_some();
        if removed {
            tracing::debug!(name: "session.removed", session_id = %session_id, "Session removed");
        }
        removed
    }

    /// Number of tracked sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all sessions idle for longer than the store's timeout.
    ///
    /// Returns the number of sessions removed.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_with_timeout(self.inner.idle_timeout)
    }

    /// Remove sessions that have been inactive longer than `timeout`.
    pub fn cleanup_expired_with_timeout(&self, timeout: Duration) -> usize {
        let mut guard = self.write();
        let before = guard.len();
        guard.retain(|_, record| !record.is_expired_with_timeout(timeout));
        before - guard.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, SessionRecord>> {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, SessionRecord>> {
        self.inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, session_id: &str, key: &str) -> Option<Value> {
        let guard = self.read();
        let record = guard.get(session_id)?;
        record
            .staged
            .get(key)
            .or_else(|| record.committed.get(key))
            .cloned()
    }

    fn set(&self, session_id: &str, key: &str, value: Value) {
        let mut guard = self.write();
        let record = guard
            .entry(session_id.to_owned())
            .or_insert_with(SessionRecord::new);
        record.staged.insert(key.to_owned(), value);
        record.touch();
    }

    fn mark_modified(&self, session_id: &str) {
        let mut guard = self.write();
        let record = guard
            .entry(session_id.to_owned())
            .or_insert_with(SessionRecord::new);
        record.modified = true;
        record.touch();
    }

    fn release(&self, session_id: &str) {
        let mut guard = self.write();
        let Some(record) = guard.get_mut(session_id) else {
            return;
        };

        if record.modified {
            let staged = std::mem::take(&mut record.staged);
            record.committed.extend(staged);
        } else if !record.staged.is_empty() {
            tracing::warn!(
                name: "session.writes_dropped",
                session_id = %session_id,
                keys = ?record.staged.keys().collect::<Vec<_>>(),
                "Session was not marked modified, dropping staged writes"
            );
            record.staged.clear();
        }
        record.modified = false;
        record.touch();
    }
}
