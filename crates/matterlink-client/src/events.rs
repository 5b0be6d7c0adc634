//! Event listener registry.

use matterlink_core::EventKind;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: BTreeMap<EventKind, Vec<(u64, Listener)>>,
}

impl Registry {
    fn contains(&self, kind: EventKind, id: u64) -> bool {
        self.listeners
            .get(&kind)
            .is_some_and(|list| list.iter().any(|(lid, _)| *lid == id))
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Routes events to listeners in registration order.
///
/// The registry lock is never held while a listener runs, so listeners may
/// subscribe or unsubscribe (themselves or others) from inside a callback.
#[derive(Default)]
pub struct EventDispatcher {
    registry: Arc<Mutex<Registry>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .listeners
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        Subscription {
            kind,
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Invoke the listeners for `kind` on the calling thread.
    ///
    /// A listener removed by an earlier one in the same round is skipped.
    /// A panicking listener is logged and does not stop the others.
    /// Returns how many listeners ran to completion.
    pub fn dispatch(&self, kind: EventKind, data: &Value) -> usize {
        let snapshot = match lock(&self.registry).listeners.get(&kind) {
            Some(list) => list.clone(),
            None => return 0,
        };

        let mut completed = 0;
        for (id, listener) in snapshot {
            if !lock(&self.registry).contains(kind, id) {
                continue;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| listener(data))) {
                Ok(()) => completed += 1,
                Err(_) => tracing::error!("Listener {} for {} panicked", id, kind),
            }
        }
        completed
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        lock(&self.registry)
            .listeners
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

/// Returned by [`EventDispatcher::subscribe`]; removes that one listener.
#[derive(Clone)]
pub struct Subscription {
    kind: EventKind,
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Remove the listener. Calling this again does nothing.
    pub fn unsubscribe(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = lock(&registry);
        if let Some(list) = registry.listeners.get_mut(&self.kind) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                registry.listeners.remove(&self.kind);
            }
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
