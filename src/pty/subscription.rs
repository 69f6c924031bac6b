//! Subscriptions
//!
//! Callback fan-out with disposable handles. Callbacks run on the producer's
//! thread in registration order. Disposing a handle stops further callbacks:
//! from inside the callback it takes effect immediately, from another thread
//! it waits for an in-progress invocation to return.

use parking_lot::{Mutex, ReentrantMutex};
use std::cell::Cell;
use std::sync::{Arc, Weak};

type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;

struct Entry<T> {
    live: ReentrantMutex<Cell<bool>>,
    callback: Callback<T>,
}

struct Slots<T> {
    next_id: u64,
    entries: Vec<(u64, Arc<Entry<T>>)>,
}

/// A set of subscribers for values of type `T`
pub struct Subscribers<T> {
    slots: Arc<Mutex<Slots<T>>>,
}

impl<T: 'static> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register a callback; it stays registered until the handle is disposed
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let entry = Arc::new(Entry {
            live: ReentrantMutex::new(Cell::new(true)),
            callback: Box::new(callback),
        });

        let id = {
            let mut slots = self.slots.lock();
            let id = slots.next_id;
            slots.next_id += 1;
            slots.entries.push((id, entry.clone()));
            id
        };

        let slots: Weak<Mutex<Slots<T>>> = Arc::downgrade(&self.slots);
        Subscription::new(move || {
            {
                let live = entry.live.lock();
                live.set(false);
            }
            if let Some(slots) = slots.upgrade() {
                slots.lock().entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Deliver a value to every live subscriber
    pub fn emit(&self, value: &T) {
        // Snapshot so callbacks may subscribe or dispose without deadlocking
        let snapshot: Vec<Arc<Entry<T>>> = self
            .slots
            .lock()
            .entries
            .iter()
            .map(|(_, entry)| entry.clone())
            .collect();

        for entry in snapshot {
            let live = entry.live.lock();
            if live.get() {
                (entry.callback)(value);
            }
        }
    }

    /// Number of registered subscribers
    pub fn len(&self) -> usize {
        self.slots.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every subscriber
    pub fn clear(&self) {
        let entries = std::mem::take(&mut self.slots.lock().entries);
        for (_, entry) in entries {
            entry.live.lock().set(false);
        }
    }
}

impl<T: 'static> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by `subscribe`. Disposing is idempotent and also happens on drop.
pub struct Subscription {
    disposer: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(disposer: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            disposer: Some(Box::new(disposer)),
        }
    }

    /// A handle that is already disposed
    pub fn disposed() -> Self {
        Self { disposer: None }
    }

    pub fn dispose(&mut self) {
        if let Some(disposer) = self.disposer.take() {
            disposer();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposer.is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
