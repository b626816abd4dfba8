//! Managed heap accounting and reclamation cycles
//!
//! Host code allocates through [`super::HostHandle::alloc`], which returns an
//! [`Allocation`] token. Dropping the token turns its bytes into garbage; the
//! next cycle sweeps them. A cycle runs synchronously on the allocating thread
//! as soon as live plus garbage bytes reach the heap goal:
//!
//! ```text
//! ReclaimStart
//!   StwStart(SweepTermination) StwDone
//!   MarkAssistStart MarkAssistDone        (allocation-triggered cycles only)
//!   StwStart(MarkTermination)  StwDone
//! ReclaimDone
//! SweepStart SweepDone(swept, reclaimed)
//! HeapSize NextThreshold
//! ```
//!
//! Only one cycle runs at a time; a unit that needs a cycle while another is
//! running parks as `TaskBlockReclaim` until it finishes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};

use log::debug;
use tether_common::{BlockReason, EventKind, StwKind};

use super::context::{self, Current};
use super::Shared;
use crate::domain::UnitState;
use crate::events::Payload;

/// Point-in-time heap figures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    pub live_bytes: u64,
    pub garbage_bytes: u64,
    pub goal_bytes: u64,
    pub cycles: u64,
    pub reclaimed_bytes: u64,
}

pub(crate) struct Reclaimer {
    live: AtomicU64,
    garbage: AtomicU64,
    goal: AtomicU64,
    percent: u64,
    min_goal: u64,
    cycle: Mutex<()>,
    cycles: AtomicU64,
    reclaimed: AtomicU64,
}

impl Reclaimer {
    pub(crate) fn new(percent: u64, min_goal: u64) -> Self {
        Self {
            live: AtomicU64::new(0),
            garbage: AtomicU64::new(0),
            goal: AtomicU64::new(min_goal),
            percent,
            min_goal,
            cycle: Mutex::new(()),
            cycles: AtomicU64::new(0),
            reclaimed: AtomicU64::new(0),
        }
    }

    pub(crate) fn stats(&self) -> HeapStats {
        HeapStats {
            live_bytes: self.live.load(Ordering::Relaxed),
            garbage_bytes: self.garbage.load(Ordering::Relaxed),
            goal_bytes: self.goal.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
            reclaimed_bytes: self.reclaimed.load(Ordering::Relaxed),
        }
    }

    fn over_goal(&self) -> bool {
        self.live.load(Ordering::Acquire) + self.garbage.load(Ordering::Acquire)
            >= self.goal.load(Ordering::Acquire)
    }

    fn next_goal(&self, live: u64) -> u64 {
        let grown = u128::from(live) * u128::from(100 + self.percent) / 100;
        u64::try_from(grown).unwrap_or(u64::MAX).max(self.min_goal)
    }
}

/// Managed bytes owned by host code; dropping them makes them garbage
#[must_use = "dropping an allocation immediately turns it into garbage"]
pub struct Allocation {
    bytes: u64,
    shared: Arc<Shared>,
}

impl Allocation {
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl std::fmt::Debug for Allocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocation").field("bytes", &self.bytes).finish()
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        let heap = &self.shared.heap;
        heap.live.fetch_sub(self.bytes, Ordering::AcqRel);
        heap.garbage.fetch_add(self.bytes, Ordering::AcqRel);
    }
}

pub(crate) fn allocate(shared: &Arc<Shared>, bytes: u64) -> Allocation {
    let heap = &shared.heap;
    let live = heap.live.fetch_add(bytes, Ordering::AcqRel) + bytes;
    let current = context::current();

    shared.profiler.on_alloc(current.as_ref().map(|c| c.cell.id()), bytes, live, || {
        current.as_ref().map(|c| c.cell.stack()).unwrap_or_default()
    });

    if heap.over_goal() {
        run_cycle(shared, current.as_ref(), true);
    }
    Allocation { bytes, shared: Arc::clone(shared) }
}

/// Force a full cycle now
pub(crate) fn collect(shared: &Shared) {
    run_cycle(shared, context::current().as_ref(), false);
}

fn run_cycle(shared: &Shared, current: Option<&Current>, assist: bool) {
    let heap = &shared.heap;
    let bus = &shared.bus;

    let _cycle = match heap.cycle.try_lock() {
        Ok(guard) => guard,
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        Err(TryLockError::WouldBlock) => {
            let blocked = UnitState::Blocked(BlockReason::Reclaim);
            set_unit_state(shared, current, blocked, EventKind::TaskBlockReclaim);
            let guard = heap.cycle.lock().unwrap_or_else(PoisonError::into_inner);
            set_unit_state(shared, current, UnitState::Running, EventKind::TaskUnblock);
            // The cycle we waited for may already have made room
            if assist && !heap.over_goal() {
                return;
            }
            guard
        }
    };

    bus.emit(EventKind::ReclaimStart, Payload::Bare);
    bus.emit(EventKind::StwStart, Payload::StwStart(StwKind::SweepTermination));
    bus.emit(EventKind::StwDone, Payload::Bare);
    if assist && current.is_some() {
        bus.emit(EventKind::MarkAssistStart, Payload::Bare);
        bus.emit(EventKind::MarkAssistDone, Payload::Bare);
    }
    bus.emit(EventKind::StwStart, Payload::StwStart(StwKind::MarkTermination));
    bus.emit(EventKind::StwDone, Payload::Bare);
    bus.emit(EventKind::ReclaimDone, Payload::Bare);

    bus.emit(EventKind::SweepStart, Payload::Bare);
    let reclaimed = heap.garbage.swap(0, Ordering::AcqRel);
    let live = heap.live.load(Ordering::Acquire);
    bus.emit(EventKind::SweepDone, Payload::Sweep { swept: live + reclaimed, reclaimed });

    let goal = heap.next_goal(live);
    heap.goal.store(goal, Ordering::Release);
    heap.reclaimed.fetch_add(reclaimed, Ordering::Relaxed);
    let cycle = heap.cycles.fetch_add(1, Ordering::Relaxed) + 1;
    bus.emit(EventKind::HeapSize, Payload::Counter(live));
    bus.emit(EventKind::NextThreshold, Payload::Counter(goal));

    debug!("Reclaim cycle {cycle}: reclaimed {reclaimed} bytes, live {live}, next goal {goal}");
}

fn set_unit_state(shared: &Shared, current: Option<&Current>, state: UnitState, kind: EventKind) {
    let Some(cur) = current else { return };
    let id = cur.cell.id();
    let _order = cur.cell.order();
    cur.cell.lock().state = state;
    shared.bus.emit_with(kind, || Payload::Unit(id));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_goal_grows_with_live_heap() {
        let heap = Reclaimer::new(100, 1024);
        assert_eq!(heap.next_goal(0), 1024);
        assert_eq!(heap.next_goal(4096), 8192);

        let heap = Reclaimer::new(50, 0);
        assert_eq!(heap.next_goal(1000), 1500);
        assert_eq!(heap.next_goal(u64::MAX), u64::MAX);
    }

    #[test]
    fn test_over_goal_counts_garbage() {
        let heap = Reclaimer::new(100, 100);
        heap.live.store(60, Ordering::Relaxed);
        assert!(!heap.over_goal());
        heap.garbage.store(40, Ordering::Relaxed);
        assert!(heap.over_goal());
    }
}
