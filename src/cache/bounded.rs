//! Concurrent map with optional oldest-first eviction.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

struct Slot<V> {
    value: V,
    seq: u64,
}

/// Last-write-wins map. Insertion order is tracked so the oldest key can be
/// evicted once `capacity` is exceeded; re-inserting a key makes it newest.
pub(crate) struct BoundedMap<V> {
    entries: DashMap<String, Slot<V>>,
    order: Mutex<VecDeque<(u64, String)>>,
    next_seq: AtomicU64,
    capacity: Option<usize>,
}

impl<V: Clone> BoundedMap<V> {
    pub(crate) fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            next_seq: AtomicU64::new(0),
            capacity,
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).map(|slot| slot.value.clone())
    }

    /// Insert `value`, returning the number of entries evicted.
    pub(crate) fn insert(&self, key: String, value: V) -> usize {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut order = self.order.lock().expect("cache order mutex poisoned");
        order.push_back((seq, key.clone()));
        self.entries.insert(key, Slot { value, seq });

        let capacity = self.capacity.unwrap_or(usize::MAX);
        let mut evicted = 0;
        while self.entries.len() > capacity {
            let Some((seq, key)) = order.pop_front() else {
                break;
            };
            // Stale order records belong to keys that were overwritten since.
            if self
                .entries
                .remove_if(&key, |_, slot| slot.seq == seq)
                .is_some()
            {
                evicted += 1;
            }
        }
        compact(&mut order, &self.entries);
        evicted
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&self) {
        let mut order = self.order.lock().expect("cache order mutex poisoned");
        order.clear();
        self.entries.clear();
    }

    /// Values from oldest to newest.
    pub(crate) fn values_in_order(&self) -> Vec<V> {
        let order = self.order.lock().expect("cache order mutex poisoned");
        order
            .iter()
            .filter_map(|(seq, key)| {
                self.entries
                    .get(key)
                    .filter(|slot| slot.seq == *seq)
                    .map(|slot| slot.value.clone())
            })
            .collect()
    }
}

/// Drop order records for overwritten keys once they dominate the queue.
fn compact<V>(order: &mut VecDeque<(u64, String)>, entries: &DashMap<String, Slot<V>>) {
    if order.len() <= entries.len().saturating_mul(2).max(64) {
        return;
    }
    order.retain(|(seq, key)| entries.get(key).is_some_and(|slot| slot.seq == *seq));
}

impl<V> std::fmt::Debug for BoundedMap<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedMap")
            .field("len", &self.entries.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

pub(crate) type SharedMap<V> = Arc<BoundedMap<V>>;
