//! Observer registry
//!
//! Set of listener callbacks with stable identities. Notification iterates a
//! copy of the registry taken before the first callback runs, and every entry
//! carries a liveness flag checked right before it is invoked:
//!
//! - a listener added during a notification is first called on the next one
//! - a listener removed during a notification (by itself or by another
//!   listener) is not called again, not even later in the same pass
//!
//! The registry lock is never held while a listener runs, so listeners may
//! subscribe and unsubscribe freely from inside a callback.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Stable identity of a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Entry<T> {
    id: ListenerId,
    active: Arc<AtomicBool>,
    listener: Listener<T>,
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            active: self.active.clone(),
            listener: self.listener.clone(),
        }
    }
}

struct RegistryInner<T> {
    next_id: u64,
    entries: Vec<Entry<T>>,
}

/// Registry of listeners notified with `&T`
pub struct ObserverRegistry<T> {
    inner: Mutex<RegistryInner<T>>,
}

impl<T> Default for ObserverRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ObserverRegistry<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                next_id: 0,
                entries: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner<T>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a listener
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        let id = ListenerId(inner.next_id);
        inner.next_id += 1;
        inner.entries.push(Entry {
            id,
            active: Arc::new(AtomicBool::new(true)),
            listener: Arc::new(listener),
        });
        id
    }

    /// Remove a listener; false if it was not registered
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut inner = self.lock();
        match inner.entries.iter().position(|e| e.id == id) {
            Some(index) => {
                let entry = inner.entries.remove(index);
                entry.active.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Invoke every live listener with `value`, returning how many ran
    pub fn notify(&self, value: &T) -> usize {
        let snapshot: Vec<Entry<T>> = self.lock().entries.clone();

        let mut delivered = 0;
        for entry in snapshot {
            if entry.active.load(Ordering::SeqCst) {
                (entry.listener)(value);
                delivered += 1;
            }
        }
        delivered
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.lock().entries.iter().any(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> fmt::Debug for ObserverRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}
