//! Session storage and per-session serialization.
//!
//! Sessions are identified by an opaque id chosen by the HTTP layer (a UUID
//! carried in a signed cookie). The core only relies on the
//! [`SessionStore`] contract: `get`, `set` and an explicit `mark_modified`
//! signal.
//!
//! # Architecture
//!
//! - [`SessionStore`]: key-value contract with an explicit dirty flag
//! - [`MemorySessionStore`]: in-memory implementation with idle expiry
//! - [`SessionLocks`]: one async mutex per session id
//!
//! # Example
//!
//! ```rust
//! use studybrain::session::{MemorySessionStore, SessionStore};
//! use serde_json::json;
//!
//! let store = MemorySessionStore::new();
//! store.set("abc", "greeting", json!("hello"));
//! store.mark_modified("abc");
//! store.release("abc");
//!
//! assert_eq!(store.get("abc", "greeting"), Some(json!("hello")));
//! ```

mod locks;
mod store;

pub use locks::SessionLocks;
pub use store::{DEFAULT_SESSION_TIMEOUT, MemorySessionStore, SessionStore};
