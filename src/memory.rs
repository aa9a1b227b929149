use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// RedirectKey
///
/// The two cross-navigation intent slots: where to go after a successful
/// sign-in, and where the user came from when an authorization check denied
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RedirectKey {
    PostLoginTarget,
    UnauthorizedOrigin,
}

impl RedirectKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedirectKey::PostLoginTarget => "post-login-target",
            RedirectKey::UnauthorizedOrigin => "unauthorized-origin",
        }
    }
}

/// RedirectStore
///
/// Injectable one-shot key-value contract the gate writes its redirect intent
/// through. `set` is idempotent with last-write-wins; `take_and_clear`
/// consumes the slot in the same operation, so a stored value can never be
/// replayed into a second unrelated flow. No ambient storage: implementations
/// are constructed and handed in explicitly, which keeps the gate logic
/// fakeable in tests.
pub trait RedirectStore: Send + Sync {
    fn set(&self, key: RedirectKey, path: &str);

    /// Returns the stored value and clears the slot, or `default` if the slot
    /// is empty (or was already consumed).
    fn take_and_clear(&self, key: RedirectKey, default: &str) -> String;
}

/// SessionRedirectMemory
///
/// In-memory `RedirectStore` for a single portal session. Both operations are
/// O(1) map accesses under one mutex.
#[derive(Debug, Default)]
pub struct SessionRedirectMemory {
    slots: Mutex<HashMap<RedirectKey, String>>,
}

impl SessionRedirectMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RedirectStore for SessionRedirectMemory {
    fn set(&self, key: RedirectKey, path: &str) {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(key = key.as_str(), path, "redirect memory set");
        slots.insert(key, path.to_string());
    }

    fn take_and_clear(&self, key: RedirectKey, default: &str) -> String {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        slots.remove(&key).unwrap_or_else(|| default.to_string())
    }
}

/// RedirectRegistry
///
/// Process-wide map from portal session id to that session's redirect memory.
/// Each session gets its own isolated store; `drop_session` removes the
/// store on sign-out so no redirect target survives into another user's
/// session.
#[derive(Debug, Default)]
pub struct RedirectRegistry {
    sessions: Mutex<HashMap<String, Arc<SessionRedirectMemory>>>,
}

impl RedirectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the memory for `sid`, creating it on first access.
    pub fn for_session(&self, sid: &str) -> Arc<SessionRedirectMemory> {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        sessions
            .entry(sid.to_string())
            .or_insert_with(|| Arc::new(SessionRedirectMemory::new()))
            .clone()
    }

    pub fn drop_session(&self, sid: &str) {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        sessions.remove(sid);
    }
}
