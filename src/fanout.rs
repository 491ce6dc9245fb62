//! Ordered fan-out of frame events to registered listeners.
//!
//! The fan-out list preserves registration order and deduplicates by
//! listener identity (`Arc` pointer equality). Registration calls come from
//! arbitrary caller threads while dispatch runs on the worker task, so the
//! list lives behind a mutex and dispatch works on a snapshot taken under
//! the lock; a subscribe or unsubscribe racing a dispatch pass can never
//! tear the iteration.
//!
//! Each listener invocation is isolated: a panicking listener is logged and
//! skipped, and delivery continues with the remaining listeners.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::event::{FrameEvent, FrameListener};

/// Ordered, identity-deduplicated listener registry with synchronous fan-out.
#[derive(Default)]
pub struct FrameFanout {
    listeners: Mutex<Vec<Arc<dyn FrameListener>>>,
}

impl FrameFanout {
    /// Create an empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.lock().expect("listener lock poisoned").len()
    }

    /// Returns `true` when no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a listener at the end of the notification order.
    ///
    /// Re-registering the same listener (same `Arc`) is a logged no-op.
    pub fn subscribe(&self, listener: Arc<dyn FrameListener>) {
        let mut listeners = self.listeners.lock().expect("listener lock poisoned");
        if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            warn!("listener is already registered; ignoring");
            return;
        }
        listeners.push(listener);
    }

    /// Remove a previously registered listener.
    ///
    /// Removing a listener that is not registered is a logged no-op.
    pub fn unsubscribe(&self, listener: &Arc<dyn FrameListener>) {
        let mut listeners = self.listeners.lock().expect("listener lock poisoned");
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        if listeners.len() == before {
            warn!("listener is not registered; ignoring");
        }
    }

    /// Remove all listeners.
    pub fn clear(&self) {
        self.listeners.lock().expect("listener lock poisoned").clear();
    }

    /// Deliver one event to every currently registered listener, in
    /// registration order, on the calling task.
    ///
    /// Listeners reporting [`is_closed`](FrameListener::is_closed) are
    /// skipped and removed afterwards.
    pub fn dispatch(&self, event: &FrameEvent) {
        let snapshot: Vec<Arc<dyn FrameListener>> =
            self.listeners.lock().expect("listener lock poisoned").clone();
        let mut saw_closed = false;
        for listener in snapshot {
            if listener.is_closed() {
                saw_closed = true;
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| listener.on_frame(event))).is_err() {
                warn!(sequence = event.sequence(), "listener panicked during dispatch; skipping");
            }
        }
        if saw_closed {
            let mut listeners = self.listeners.lock().expect("listener lock poisoned");
            let before = listeners.len();
            listeners.retain(|l| !l.is_closed());
            debug!(reaped = before - listeners.len(), "removed closed listeners");
        }
    }
}

impl std::fmt::Debug for FrameFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameFanout").field("listeners", &self.len()).finish()
    }
}
