//! Connectivity policy: the single source of truth for "should we attempt
//! the network".
//!
//! Connectivity is sampled per operation, not assumed from a cached flag,
//! because platform connectivity signals can go stale; every operation in
//! the sync layer re-checks at call time. Listeners are registered through a
//! guard that unregisters on drop, so a torn-down caller cannot leak its
//! subscription.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// The question every sync operation asks before touching the network.
pub trait ConnectivityProbe: Send + Sync {
    /// Reflects the platform's connectivity signal at call time.
    fn is_offline(&self) -> bool;
}

type Listener = Box<dyn Fn(bool) + Send + Sync>;

struct ConnectivityInner {
    reachable: AtomicBool,
    next_id: AtomicU64,
    listeners: Mutex<HashMap<u64, Listener>>,
}

/// Shared connectivity state, driven by the embedder from the platform's
/// online/offline signal.
#[derive(Clone)]
pub struct Connectivity {
    inner: Arc<ConnectivityInner>,
}

impl Connectivity {
    pub fn new(initially_reachable: bool) -> Self {
        Self {
            inner: Arc::new(ConnectivityInner {
                reachable: AtomicBool::new(initially_reachable),
                next_id: AtomicU64::new(0),
                listeners: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Report the platform signal. Listeners fire on transitions only.
    pub fn set_reachable(&self, reachable: bool) {
        let previous = self.inner.reachable.swap(reachable, Ordering::SeqCst);
        if previous == reachable {
            return;
        }

        tracing::info!(online = reachable, "Connectivity changed");

        let listeners = match self.inner.listeners.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        for listener in listeners.values() {
            listener(reachable);
        }
    }

    /// Register a pair of transition callbacks. The returned guard
    /// unregisters them when dropped.
    pub fn subscribe<On, Off>(&self, on_online: On, on_offline: Off) -> ConnectivityGuard
    where
        On: Fn() + Send + Sync + 'static,
        Off: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let listener: Listener = Box::new(move |online| {
            if online {
                on_online();
            } else {
                on_offline();
            }
        });

        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.insert(id, listener);
        }

        ConnectivityGuard {
            inner: Arc::clone(&self.inner),
            id,
        }
    }
}

impl ConnectivityProbe for Connectivity {
    fn is_offline(&self) -> bool {
        !self.inner.reachable.load(Ordering::SeqCst)
    }
}

/// Scoped subscription: dropping it unregisters the callbacks.
pub struct ConnectivityGuard {
    inner: Arc<ConnectivityInner>,
    id: u64,
}

impl Drop for ConnectivityGuard {
    fn drop(&mut self) {
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_is_offline_samples_current_state() {
        let connectivity = Connectivity::new(true);
        assert!(!connectivity.is_offline());

        connectivity.set_reachable(false);
        assert!(connectivity.is_offline());

        connectivity.set_reachable(true);
        assert!(!connectivity.is_offline());
    }

    #[test]
    fn test_listeners_fire_on_transitions_only() {
        let connectivity = Connectivity::new(true);
        let online_calls = Arc::new(AtomicUsize::new(0));
        let offline_calls = Arc::new(AtomicUsize::new(0));

        let on = Arc::clone(&online_calls);
        let off = Arc::clone(&offline_calls);
        let _guard = connectivity.subscribe(
            move || {
                on.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                off.fetch_add(1, Ordering::SeqCst);
            },
        );

        connectivity.set_reachable(true); // no transition
        connectivity.set_reachable(false);
        connectivity.set_reachable(false); // no transition
        connectivity.set_reachable(true);

        assert_eq!(online_calls.load(Ordering::SeqCst), 1);
        assert_eq!(offline_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_guard_unsubscribes() {
        let connectivity = Connectivity::new(true);
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let guard = connectivity.subscribe(
            || {},
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        drop(guard);

        connectivity.set_reachable(false);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_multiple_subscribers() {
        let connectivity = Connectivity::new(true);
        let calls = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&calls);
        let c2 = Arc::clone(&calls);
        let _g1 = connectivity.subscribe(
            || {},
            move || {
                c1.fetch_add(1, Ordering::SeqCst);
            },
        );
        let _g2 = connectivity.subscribe(
            || {},
            move || {
                c2.fetch_add(1, Ordering::SeqCst);
            },
        );

        connectivity.set_reachable(false);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
