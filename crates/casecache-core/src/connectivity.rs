//! Connectivity state shared by the dispatcher and the sync service.
//!
//! The host feeds online/offline signals into `ConnectivityMonitor::set_online`;
//! consumers either register a callback or hold a `watch` receiver. The
//! monitor is injected wherever it is needed, never read from a global.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, info};

pub type ListenerId = u64;

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

/// Snapshot published on every connectivity change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityState {
    pub online: bool,
    /// Number of offline -> online transitions so far. Lets watchers notice
    /// a reconnect even when a quick off/on flip is coalesced.
    pub reconnects: u64,
}

struct Inner {
    state: watch::Sender<ConnectivityState>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

/// Process-wide connectivity flag with subscribe/unsubscribe.
/// Clone is cheap and every clone observes the same state.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (state, _) = watch::channel(ConnectivityState {
            online: initially_online,
            reconnects: 0,
        });
        Self {
            inner: Arc::new(Inner {
                state,
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.state.borrow().online
    }

    pub fn state(&self) -> ConnectivityState {
        *self.inner.state.borrow()
    }

    /// Record a connectivity signal from the host. Listeners run only when
    /// the state actually changes.
    pub fn set_online(&self, online: bool) {
        let changed = self.inner.state.send_if_modified(|state| {
            if state.online == online {
                return false;
            }
            state.online = online;
            if online {
                state.reconnects += 1;
            }
            true
        });

        if !changed {
            return;
        }

        if online {
            info!("Connectivity restored");
        } else {
            info!("Connectivity lost");
        }

        // Call outside the lock so a listener may (un)subscribe
        let listeners: Vec<Listener> = self
            .lock_listeners()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(online);
        }
    }

    /// Register a callback invoked with the new state on every change.
    pub fn on_connectivity_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.lock_listeners().push((id, Arc::new(listener)));
        debug!(id, "Connectivity listener registered");
        id
    }

    /// Remove a callback. Returns false when the id was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock_listeners();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        before != listeners.len()
    }

    /// Receiver for async consumers.
    pub fn watch(&self) -> watch::Receiver<ConnectivityState> {
        self.inner.state.subscribe()
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, Listener)>> {
        // A panicking listener must not wedge connectivity updates
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}
