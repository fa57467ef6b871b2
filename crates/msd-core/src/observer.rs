//! Per-instance listener registry and the observable state cell.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Callback invoked on each state change.
pub type Listener<S> = Arc<dyn Fn(&S) + Send + Sync>;

/// Handle returned by `add`, used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Thread-safe listener list owned by one component.
pub struct Listeners<S> {
    next_id: AtomicU64,
    entries: RwLock<Vec<(ListenerId, Listener<S>)>>,
}

impl<S> Default for Listeners<S> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl<S> Listeners<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Listener<S>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(i, _)| *i != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every listener with `state`. The list is copied first, so a
    /// listener may add or remove listeners while being called.
    pub fn broadcast(&self, state: &S) {
        let snapshot: Vec<Listener<S>> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in snapshot {
            listener(state);
        }
    }
}

/// Current state plus its listeners. Setting an equal value is a no-op.
pub struct StateCell<S> {
    current: Mutex<S>,
    /// Serializes compare, replace, and broadcast so listeners see changes in order.
    notify: Mutex<()>,
    listeners: Listeners<S>,
}

impl<S: Clone + PartialEq> StateCell<S> {
    pub fn new(initial: S) -> Self {
        Self {
            current: Mutex::new(initial),
            notify: Mutex::new(()),
            listeners: Listeners::new(),
        }
    }

    pub fn get(&self) -> S {
        self.current.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the state and broadcast it if it differs. Returns true if it changed.
    pub fn set(&self, next: S) -> bool {
        self.set_if(next, |_| true)
    }

    /// Like `set`, but only when `allow(current)` holds.
    pub fn set_if(&self, next: S, allow: impl FnOnce(&S) -> bool) -> bool {
        let _order = self.notify.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut cur = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            if *cur == next || !allow(&cur) {
                return false;
            }
            *cur = next.clone();
        }
        self.listeners.broadcast(&next);
        true
    }

    pub fn listeners(&self) -> &Listeners<S> {
        &self.listeners
    }
}
