//! Live execution units
//!
//! Every unit has a cell with two locks. The record lock guards scheduling
//! state and the shadow stack and is only held for short updates and reads.
//! The order lock is held across a state transition and the delivery of its
//! event, so per-unit event order survives a wakeup on one worker racing a
//! poll on another. Handlers run with the order lock held but never the record
//! lock, so they can query any unit, including the one being reported.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::domain::{Address, Timestamp, UnitId, UnitInfo, UnitState, WorkerId};
use crate::profiling::StackSource;

const SHARDS: usize = 16;

/// Mutable part of a unit
#[derive(Debug)]
pub(crate) struct UnitRecord {
    pub state: UnitState,
    /// Woken while running; the next `Pending` is a yield rather than a park
    pub notified: bool,
    /// Shadow stack, innermost frame last
    pub frames: Vec<Address>,
    /// Worker of the most recent poll
    pub last_worker: Option<WorkerId>,
    /// When the unit last parked on a synchronization wait
    pub parked_at: Option<Timestamp>,
}

#[derive(Debug)]
pub(crate) struct UnitCell {
    id: UnitId,
    label: Option<Arc<str>>,
    order: Mutex<()>,
    record: Mutex<UnitRecord>,
}

thread_local! {
    /// Units whose order lock this thread holds
    static ORDERING: RefCell<Vec<UnitId>> = const { RefCell::new(Vec::new()) };
}

/// Held order lock of a unit
///
/// Reentrant on the owning thread: a handler that triggers another event of
/// the unit it is handling gets an empty guard instead of deadlocking.
pub(crate) struct OrderGuard<'a> {
    id: UnitId,
    guard: Option<MutexGuard<'a, ()>>,
}

impl Drop for OrderGuard<'_> {
    fn drop(&mut self) {
        if self.guard.take().is_some() {
            // Fails only during thread teardown
            let _ = ORDERING.try_with(|held| {
                let mut held = held.borrow_mut();
                if let Some(pos) = held.iter().rposition(|id| *id == self.id) {
                    held.remove(pos);
                }
            });
        }
    }
}

impl UnitCell {
    pub(crate) fn id(&self) -> UnitId {
        self.id
    }

    pub(crate) fn label(&self) -> Option<&Arc<str>> {
        self.label.as_ref()
    }

    /// Serialize an event of this unit with its other events
    pub(crate) fn order(&self) -> OrderGuard<'_> {
        if ORDERING.try_with(|held| held.borrow().contains(&self.id)).unwrap_or(false) {
            return OrderGuard { id: self.id, guard: None };
        }
        let guard = self.order.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = ORDERING.try_with(|held| held.borrow_mut().push(self.id));
        OrderGuard { id: self.id, guard: Some(guard) }
    }

    /// Short-lived access to the record; never held while emitting
    pub(crate) fn lock(&self) -> MutexGuard<'_, UnitRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn stack(&self) -> Vec<Address> {
        self.lock().frames.clone()
    }

    fn info(&self) -> UnitInfo {
        UnitInfo {
            id: self.id,
            state: self.lock().state,
            label: self.label.as_deref().map(str::to_string),
        }
    }
}

/// Sharded map of live units
pub(crate) struct UnitTable {
    shards: [Mutex<HashMap<UnitId, Arc<UnitCell>>>; SHARDS],
    next_id: AtomicU64,
    created: AtomicU64,
}

impl Default for UnitTable {
    fn default() -> Self {
        Self {
            shards: std::array::from_fn(|_| Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            created: AtomicU64::new(0),
        }
    }
}

impl UnitTable {
    fn shard(&self, id: UnitId) -> MutexGuard<'_, HashMap<UnitId, Arc<UnitCell>>> {
        #[allow(clippy::cast_possible_truncation)]
        let idx = (id.as_u64() % SHARDS as u64) as usize;
        self.shards[idx].lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a fresh identity and register a runnable unit under it
    pub(crate) fn create(&self, label: Option<Arc<str>>) -> Arc<UnitCell> {
        // Starts at 1; wrapping would take 2^64 units
        let raw = self.next_id.fetch_add(1, Ordering::Relaxed);
        let Some(id) = UnitId::from_raw(raw) else {
            return self.create(label);
        };
        let cell = Arc::new(UnitCell {
            id,
            label,
            order: Mutex::new(()),
            record: Mutex::new(UnitRecord {
                state: UnitState::Runnable,
                notified: false,
                frames: Vec::new(),
                last_worker: None,
                parked_at: None,
            }),
        });
        self.shard(id).insert(id, Arc::clone(&cell));
        self.created.fetch_add(1, Ordering::Relaxed);
        cell
    }

    pub(crate) fn get(&self, id: UnitId) -> Option<Arc<UnitCell>> {
        self.shard(id).get(&id).cloned()
    }

    pub(crate) fn remove(&self, id: UnitId) {
        self.shard(id).remove(&id);
    }

    pub(crate) fn info(&self, id: UnitId) -> Option<UnitInfo> {
        self.get(id).map(|cell| cell.info())
    }

    /// Every live unit, in no particular order
    pub(crate) fn cells(&self) -> Vec<Arc<UnitCell>> {
        self.shards
            .iter()
            .flat_map(|s| {
                let shard = s.lock().unwrap_or_else(PoisonError::into_inner);
                shard.values().cloned().collect::<Vec<_>>()
            })
            .collect()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.shards.iter().map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).len()).sum()
    }

    pub(crate) fn created_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    fn stacks(&self, running_only: bool) -> Vec<(UnitId, Option<WorkerId>, Vec<Address>)> {
        let mut out = Vec::new();
        for cell in self.cells() {
            let rec = cell.lock();
            if running_only && rec.state != UnitState::Running {
                continue;
            }
            out.push((cell.id, rec.last_worker, rec.frames.clone()));
        }
        out.sort_by_key(|(id, _, _)| *id);
        out
    }
}

impl StackSource for UnitTable {
    fn running_stacks(&self) -> Vec<(UnitId, Option<WorkerId>, Vec<Address>)> {
        self.stacks(true)
    }

    fn live_stacks(&self) -> Vec<(UnitId, Option<WorkerId>, Vec<Address>)> {
        self.stacks(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_never_reused() {
        let table = UnitTable::default();
        let a = table.create(None).id();
        table.remove(a);
        let b = table.create(Some(Arc::from("worker-loop"))).id();
        assert_ne!(a, b);
        assert!(b > a);
        assert!(table.info(a).is_none());
        assert_eq!(table.info(b).unwrap().label.as_deref(), Some("worker-loop"));
        assert_eq!(table.created_count(), 2);
        assert_eq!(table.live_count(), 1);
    }

    #[test]
    fn test_running_stacks_filter_state() {
        let table = UnitTable::default();
        let running = table.create(None);
        {
            let mut rec = running.lock();
            rec.state = UnitState::Running;
            rec.frames.push(0x40);
        }
        let _idle = table.create(None);

        let running_stacks = table.running_stacks();
        assert_eq!(running_stacks.len(), 1);
        assert_eq!(running_stacks[0].0, running.id());
        assert_eq!(running_stacks[0].2, vec![0x40]);
        assert_eq!(table.live_stacks().len(), 2);
    }

    #[test]
    fn test_order_lock_leaves_record_readable() {
        let table = UnitTable::default();
        let cell = table.create(None);
        let _order = cell.order();
        assert_eq!(table.info(cell.id()).unwrap().state, UnitState::Runnable);
        assert!(cell.stack().is_empty());
        assert_eq!(table.live_stacks().len(), 1);
    }

    #[test]
    fn test_order_lock_is_reentrant_on_one_thread() {
        let table = UnitTable::default();
        let cell = table.create(None);
        let outer = cell.order();
        {
            let inner = cell.order();
            assert!(inner.guard.is_none());
        }
        drop(outer);

        // Released after the outer guard drops
        let other = Arc::clone(&cell);
        let acquired = std::thread::spawn(move || other.order().guard.is_some()).join().unwrap();
        assert!(acquired);
    }
}
