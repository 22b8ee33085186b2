//! Thread-safe multi-listener registry with snapshot fan-out
//!
//! The listener list is stored as an immutable `Arc<Vec<_>>` behind a
//! `parking_lot::RwLock`. Subscribing or unsubscribing replaces the vector
//! (copy-on-write); broadcasting clones the `Arc` under the read lock and
//! releases it before any listener runs. A broadcast therefore always
//! delivers to the exact set of listeners registered when it started, and
//! listeners are free to subscribe, unsubscribe or broadcast again from
//! inside their callback.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, trace};

/// Receiver of events fanned out by an [`EventBroadcaster`]
///
/// Closures taking `&E` implement this trait, so most callers never write
/// an explicit impl.
pub trait EventListener<E>: Send + Sync {
    /// Called once per broadcast, on the broadcasting thread
    fn on_event(&self, event: &E);
}

impl<E, F> EventListener<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        self(event)
    }
}

/// Shared handle to a registered listener
///
/// Listener identity is the address of the allocation behind the `Arc`:
/// registering a clone of the same handle twice is a no-op.
pub type ListenerRef<E> = Arc<dyn EventListener<E>>;

/// Result of a single broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Listeners that returned normally
    pub delivered: usize,
    /// Listeners that panicked (logged and skipped)
    pub failed: usize,
}

impl BroadcastOutcome {
    /// Number of listeners in the snapshot used for this broadcast
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }

    /// True when every listener returned normally
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Generic fan-out primitive shared by every lifecycle component
pub struct EventBroadcaster<E> {
    name: &'static str,
    listeners: RwLock<Arc<Vec<ListenerRef<E>>>>,
}

fn same_listener<E>(a: &ListenerRef<E>, b: &ListenerRef<E>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string panic payload>"
    }
}

impl<E> EventBroadcaster<E> {
    /// Create an empty broadcaster; `name` only appears in log output
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            listeners: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Name used in log output
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register a listener
    ///
    /// Returns `false` if this exact listener is already registered.
    pub fn subscribe(&self, listener: ListenerRef<E>) -> bool {
        let mut guard = self.listeners.write();
        if guard.iter().any(|existing| same_listener(existing, &listener)) {
            return false;
        }
        Arc::make_mut(&mut *guard).push(listener);
        trace!(broadcaster = self.name, listeners = guard.len(), "listener subscribed");
        true
    }

    /// Wrap a closure, register it and return the handle needed to unsubscribe it
    pub fn subscribe_fn<F>(&self, f: F) -> ListenerRef<E>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let listener: ListenerRef<E> = Arc::new(f);
        self.subscribe(listener.clone());
        listener
    }

    /// Remove a listener
    ///
    /// Returns `false` if the listener was not registered. A broadcast that
    /// already took its snapshot may still deliver to it once.
    pub fn unsubscribe(&self, listener: &ListenerRef<E>) -> bool {
        let mut guard = self.listeners.write();
        let Some(index) = guard.iter().position(|existing| same_listener(existing, listener)) else {
            return false;
        };
        Arc::make_mut(&mut *guard).remove(index);
        trace!(broadcaster = self.name, listeners = guard.len(), "listener unsubscribed");
        true
    }

    /// Whether this exact listener is registered
    pub fn is_subscribed(&self, listener: &ListenerRef<E>) -> bool {
        self.listeners
            .read()
            .iter()
            .any(|existing| same_listener(existing, listener))
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// True when nobody is listening
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Drop every registered listener
    pub fn clear(&self) {
        *self.listeners.write() = Arc::new(Vec::new());
    }

    /// Point-in-time copy of the listener list in delivery order
    pub fn snapshot(&self) -> Arc<Vec<ListenerRef<E>>> {
        Arc::clone(&self.listeners.read())
    }

    /// Deliver `event` to every listener registered when the call started
    ///
    /// Listeners run on the caller's thread in registration order. A
    /// listener that panics is logged and counted; delivery continues with
    /// the next one.
    pub fn broadcast(&self, event: &E) -> BroadcastOutcome {
        let snapshot = self.snapshot();
        let mut outcome = BroadcastOutcome::default();

        for listener in snapshot.iter() {
            match panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(()) => outcome.delivered += 1,
                Err(payload) => {
                    outcome.failed += 1;
                    error!(
                        broadcaster = self.name,
                        "Listener failed during broadcast: {}",
                        panic_message(&*payload)
                    );
                }
            }
        }

        trace!(
            broadcaster = self.name,
            delivered = outcome.delivered,
            failed = outcome.failed,
            "broadcast complete"
        );
        outcome
    }
}

impl<E> Default for EventBroadcaster<E> {
    fn default() -> Self {
        Self::new("events")
    }
}

impl<E> fmt::Debug for EventBroadcaster<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("name", &self.name)
            .field("listeners", &self.listener_count())
            .finish()
    }
}
