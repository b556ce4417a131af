//! Callback slots and subscription handles.
//!
//! Every observable boundary in this crate (transport data, viewport
//! geometry, surface input) hands out an explicit [`Subscription`] that the
//! owner must retain and release. There are no bare global listeners: when
//! the handle is released (or dropped), the callback is gone and the
//! producer stops firing.
//!
//! Dispatch takes the callback *out* of the slot for the duration of the
//! call. A release that races with an in-flight dispatch therefore cannot
//! deadlock, and the callback is not re-installed afterwards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A single-listener callback slot.
pub(crate) struct Slot<F: ?Sized> {
    callback: Mutex<Option<Box<F>>>,
    released: AtomicBool,
}

impl<F: ?Sized> Slot<F> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            callback: Mutex::new(None),
            released: AtomicBool::new(false),
        })
    }

    /// Install a callback, returning the handle that releases it.
    ///
    /// Installing over a live callback replaces it; the boundaries in this
    /// crate are single-listener (one Session per transport/tracker/surface).
    pub fn install(self: &Arc<Self>, callback: Box<F>) -> Subscription<F> {
        self.released.store(false, Ordering::SeqCst);
        *self.callback.lock().unwrap() = Some(callback);
        Subscription {
            slot: Arc::clone(self),
        }
    }

    /// Take the callback out for a dispatch run. Returns `None` when no
    /// listener is installed.
    pub fn begin_dispatch(&self) -> Option<Box<F>> {
        self.callback.lock().unwrap().take()
    }

    /// Put the callback back after a dispatch run, unless the subscription
    /// was released while the callback was in flight.
    pub fn end_dispatch(&self, callback: Box<F>) {
        let mut guard = self.callback.lock().unwrap();
        // The flag is checked under the lock: a release that lands while
        // the dispatch is unwinding either sets it before we look, or
        // takes the callback back out right after we re-install it.
        if self.released.load(Ordering::SeqCst) || guard.is_some() {
            return;
        }
        *guard = Some(callback);
    }
}

/// Handle for a registered callback. Releasing (or dropping) it
/// unregisters the callback.
pub struct Subscription<F: ?Sized> {
    slot: Arc<Slot<F>>,
}

impl<F: ?Sized> Subscription<F> {
    /// Unregister the callback. Safe to call more than once.
    pub fn release(&self) {
        self.slot.released.store(true, Ordering::SeqCst);
        self.slot.callback.lock().unwrap().take();
    }
}

impl<F: ?Sized> Drop for Subscription<F> {
    fn drop(&mut self) {
        self.release();
    }
}
