use std::sync::{Mutex, MutexGuard};

/// Single-slot mailbox that keeps only the newest value.
///
/// Producers never wait: `put` replaces whatever is unconsumed and hands the
/// stale value back to the caller.
#[derive(Debug)]
pub struct LatestCell<T> {
    slot: Mutex<Option<T>>,
}

impl<T> Default for LatestCell<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }
}

impl<T> LatestCell<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the slot, recovering from a poisoned Mutex if necessary.
    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores `value`, returning the value it displaced.
    pub fn put(&self, value: T) -> Option<T> {
        self.lock().replace(value)
    }

    /// Removes and returns the current value.
    pub fn take(&self) -> Option<T> {
        self.lock().take()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }
}
