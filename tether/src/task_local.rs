//! Per-unit local storage for agents
//!
//! Each execution unit gets one value slot and one raw-address slot. Slots are
//! keyed by [`UnitId`], which the host never reuses, so a stale id simply reads
//! `None` once its entries are evicted.
//!
//! Entries live in a fixed set of mutex-guarded shards. A single `get` or `set`
//! is atomic for its unit; there is no read-modify-write primitive.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use log::trace;

use crate::domain::UnitId;

const SHARDS: usize = 16;

/// Type-erased task-local value
pub type LocalValue = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
struct Entry {
    value: Option<LocalValue>,
    ptr: Option<usize>,
}

impl Entry {
    fn is_empty(&self) -> bool {
        self.value.is_none() && self.ptr.is_none()
    }
}

/// Agent-writable storage attached to execution units
pub struct TaskLocalStore {
    shards: [Mutex<HashMap<UnitId, Entry>>; SHARDS],
}

impl Default for TaskLocalStore {
    fn default() -> Self {
        Self { shards: std::array::from_fn(|_| Mutex::new(HashMap::new())) }
    }
}

impl TaskLocalStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn shard(&self, unit: UnitId) -> std::sync::MutexGuard<'_, HashMap<UnitId, Entry>> {
        #[allow(clippy::cast_possible_truncation)]
        let idx = (unit.as_u64() % SHARDS as u64) as usize;
        self.shards[idx].lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Value stored for `unit`, if any
    #[must_use]
    pub fn get(&self, unit: UnitId) -> Option<LocalValue> {
        self.shard(unit).get(&unit).and_then(|e| e.value.clone())
    }

    /// Value stored for `unit`, downcast to `T`
    ///
    /// Returns `None` when nothing is stored or the value has another type.
    #[must_use]
    pub fn get_as<T: Any + Send + Sync>(&self, unit: UnitId) -> Option<Arc<T>> {
        self.get(unit).and_then(|v| v.downcast::<T>().ok())
    }

    /// Store `value` for `unit`, replacing any previous value
    pub fn set<T: Any + Send + Sync>(&self, unit: UnitId, value: T) {
        self.set_shared(unit, Arc::new(value));
    }

    /// Store an already shared value for `unit`
    pub fn set_shared(&self, unit: UnitId, value: LocalValue) {
        self.shard(unit).entry(unit).or_default().value = Some(value);
    }

    /// Remove and return the value stored for `unit`
    pub fn take(&self, unit: UnitId) -> Option<LocalValue> {
        let mut shard = self.shard(unit);
        let entry = shard.get_mut(&unit)?;
        let value = entry.value.take();
        if entry.is_empty() {
            shard.remove(&unit);
        }
        value
    }

    /// Raw address stored for `unit`, if any
    #[must_use]
    pub fn get_ptr(&self, unit: UnitId) -> Option<usize> {
        self.shard(unit).get(&unit).and_then(|e| e.ptr)
    }

    /// Store a raw address for `unit`, replacing any previous one
    ///
    /// The store never dereferences it.
    pub fn set_ptr(&self, unit: UnitId, addr: usize) {
        self.shard(unit).entry(unit).or_default().ptr = Some(addr);
    }

    /// Drop every slot of a finished unit
    pub(crate) fn evict(&self, unit: UnitId) {
        if self.shard(unit).remove(&unit).is_some() {
            trace!("Evicted task-local entries of {unit}");
        }
    }

    /// Number of units with at least one slot filled
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(raw: u64) -> UnitId {
        UnitId::from_raw(raw).unwrap()
    }

    #[test]
    fn test_get_returns_last_set() {
        let store = TaskLocalStore::new();
        store.set(unit(1), "first".to_string());
        store.set(unit(1), "second".to_string());
        assert_eq!(store.get_as::<String>(unit(1)).unwrap().as_str(), "second");
        assert!(store.get(unit(2)).is_none());
    }

    #[test]
    fn test_get_as_wrong_type_is_none() {
        let store = TaskLocalStore::new();
        store.set(unit(3), 42u32);
        assert!(store.get_as::<u64>(unit(3)).is_none());
        assert_eq!(*store.get_as::<u32>(unit(3)).unwrap(), 42);
    }

    #[test]
    fn test_ptr_slot_is_independent() {
        let store = TaskLocalStore::new();
        store.set_ptr(unit(4), 0xdead_beef);
        assert!(store.get(unit(4)).is_none());
        assert_eq!(store.get_ptr(unit(4)), Some(0xdead_beef));

        store.set(unit(4), 1u8);
        assert!(store.take(unit(4)).is_some());
        // Pointer survives taking the value
        assert_eq!(store.get_ptr(unit(4)), Some(0xdead_beef));
    }

    #[test]
    fn test_evict_clears_both_slots() {
        let store = TaskLocalStore::new();
        store.set(unit(5), 1u8);
        store.set_ptr(unit(5), 8);
        store.set(unit(21), 2u8);
        assert_eq!(store.len(), 2);

        store.evict(unit(5));
        assert!(store.get(unit(5)).is_none());
        assert!(store.get_ptr(unit(5)).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_concurrent_units_do_not_interfere() {
        let store = Arc::new(TaskLocalStore::new());
        let handles: Vec<_> = (1..=8u64)
            .map(|raw| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..1000u64 {
                        store.set(unit(raw), raw * 10_000 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        for raw in 1..=8u64 {
            assert_eq!(*store.get_as::<u64>(unit(raw)).unwrap(), raw * 10_000 + 999);
        }
    }
}
