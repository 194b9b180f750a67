//! Typed in-process event dispatch.
//!
//! Each event stream is a [`Listeners`] value with a concrete event type, so
//! listener signatures are checked at compile time instead of going through
//! a name-keyed registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::UnknownListener;

/// Identifier handed out by [`Listeners::subscribe`]; needed to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A subscribable callback. Listeners run synchronously on the emitting task,
/// so they must hand longer work off to a channel or a spawned task.
pub type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// A registry of typed event listeners.
///
/// Emission is synchronous and runs listeners in subscription order within
/// the emitting task.
pub struct Listeners<E> {
    entries: Mutex<Vec<(ListenerId, Callback<E>)>>,
    next_id: AtomicU64,
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Listeners {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a listener and return its id.
    ///
    /// Subscribing the same callback (same `Arc`) twice is a no-op that
    /// returns the id of the existing registration.
    pub fn subscribe(&self, callback: Callback<E>) -> ListenerId {
        let mut entries = self.entries.lock().expect("listener registry poisoned");
        if let Some((id, _)) = entries.iter().find(|(_, cb)| Arc::ptr_eq(cb, &callback)) {
            return *id;
        }
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        entries.push((id, callback));
        id
    }

    /// Remove a previously registered listener.
    pub fn unsubscribe(&self, id: ListenerId) -> Result<(), UnknownListener> {
        let mut entries = self.entries.lock().expect("listener registry poisoned");
        match entries.iter().position(|(entry_id, _)| *entry_id == id) {
            Some(index) => {
                entries.remove(index);
                Ok(())
            }
            None => Err(UnknownListener),
        }
    }

    /// Call every listener with the event, in subscription order.
    pub fn emit(&self, event: &E) {
        // Snapshot outside the callbacks so a listener may (un)subscribe.
        let snapshot: Vec<Callback<E>> = {
            let entries = self.entries.lock().expect("listener registry poisoned");
            entries.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for callback in snapshot {
            callback(event);
        }
    }
}
