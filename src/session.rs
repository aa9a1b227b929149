use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::error::SessionError;
use crate::models::Principal;

/// SessionState
///
/// One snapshot of the authentication session: the resolved principal (if
/// any), whether a resolution is in flight, whether the session has resolved
/// at least once since startup, and the last session-source failure.
/// `initialized` is the authoritative "has resolved at least once" flag; the
/// gate treats everything before it as loading.
///
/// State only changes through the `SessionHub` lifecycle methods. Consumers
/// hold snapshots, never references into the hub.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionState {
    pub principal: Option<Principal>,
    pub loading: bool,
    pub initialized: bool,
    pub last_error: Option<SessionError>,
}

impl SessionState {
    /// A session that has already resolved to `principal`. This is the shape
    /// the HTTP layer builds after the auth extractor has run, where
    /// resolution is synchronous with the request.
    pub fn resolved(principal: Option<Principal>) -> Self {
        Self {
            principal,
            loading: false,
            initialized: true,
            last_error: None,
        }
    }
}

/// Callback invoked with every session emission, including once immediately
/// on subscription. Must not call back into the hub.
pub type SessionCallback = Box<dyn Fn(&SessionState) + Send + Sync>;

/// SessionSource
///
/// The observable contract the gate consumes: a synchronous read of the
/// freshest state, and an ordered subscription that fires at least once with
/// the current state. Dropping the returned `Subscription` unsubscribes, so a
/// torn-down consumer cannot leak its callback.
pub trait SessionSource: Send + Sync {
    fn snapshot(&self) -> SessionState;
    fn subscribe(&self, callback: SessionCallback) -> Subscription;
}

struct HubState {
    state: SessionState,
    subscribers: HashMap<u64, SessionCallback>,
}

struct HubInner {
    // One lock covers both the state and the subscriber set so every
    // subscriber observes transitions in publish order.
    current: Mutex<HubState>,
    next_id: AtomicU64,
}

/// SessionHub
///
/// The process-wide session object with an explicit lifecycle: created at
/// application start (uninitialized), updated only through the identity
/// provider's callbacks (`begin_resolve` / `resolve` / `fail` / `sign_out`),
/// torn down with the application. UI-facing code never mutates it directly.
#[derive(Clone)]
pub struct SessionHub {
    inner: Arc<HubInner>,
}

impl SessionHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                current: Mutex::new(HubState {
                    state: SessionState::default(),
                    subscribers: HashMap::new(),
                }),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    fn publish(&self, apply: impl FnOnce(&mut SessionState)) {
        let mut current = self
            .inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        apply(&mut current.state);
        let snapshot = current.state.clone();
        for callback in current.subscribers.values() {
            callback(&snapshot);
        }
    }

    /// The provider started (re)resolving the session.
    pub fn begin_resolve(&self) {
        self.publish(|state| {
            state.loading = true;
            state.last_error = None;
        });
    }

    /// The provider resolved the session, with or without a principal.
    pub fn resolve(&self, principal: Option<Principal>) {
        self.publish(|state| {
            state.principal = principal;
            state.loading = false;
            state.initialized = true;
            state.last_error = None;
        });
    }

    /// The provider itself failed. An already-present principal is kept; the
    /// error is surfaced instead of being read as "signed out".
    pub fn fail(&self, error: SessionError) {
        tracing::warn!(%error, "session resolution failed");
        self.publish(|state| {
            state.loading = false;
            state.initialized = true;
            state.last_error = Some(error);
        });
    }

    pub fn sign_out(&self) {
        self.publish(|state| {
            state.principal = None;
            state.last_error = None;
        });
    }
}

impl Default for SessionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionSource for SessionHub {
    fn snapshot(&self) -> SessionState {
        self.inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
            .clone()
    }

    fn subscribe(&self, callback: SessionCallback) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut current = self
            .inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // First emission happens under the same lock, so no publish can slip
        // in between registration and the initial callback.
        let snapshot = current.state.clone();
        callback(&snapshot);
        current.subscribers.insert(id, callback);
        Subscription {
            hub: Arc::downgrade(&self.inner),
            id,
        }
    }
}

/// Subscription
///
/// Guard for one registered session callback. Unsubscribes on drop.
pub struct Subscription {
    hub: Weak<HubInner>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.hub.upgrade() {
            let mut current = inner
                .current
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            current.subscribers.remove(&self.id);
        }
    }
}
