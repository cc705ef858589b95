// Athena Engine — Keyed Locks
//
// Single-writer-per-entity discipline without a store-wide lock: each key
// (record id, pattern key, category) gets its own mutex, created on demand.
// Slots nobody holds are dropped once the table grows past PRUNE_AT.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

const PRUNE_AT: usize = 1024;

pub struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        KeyedLocks {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Get the lock slot for `key`. Hold `slot.lock()` for the critical section:
    ///
    /// ```ignore
    /// let slot = locks.slot(&id);
    /// let _guard = slot.lock();
    /// ```
    pub fn slot(&self, key: &K) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock();
        if slots.len() >= PRUNE_AT {
            // Only the table itself references an idle slot.
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        }
        slots.entry(key.clone()).or_default().clone()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}
