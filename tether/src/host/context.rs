//! Thread-local view of what the current thread is doing
//!
//! - the worker identity of host threads
//! - the unit being polled right now (and the host it belongs to)
//! - the pending-reason note left by a tagged wait that returned `Pending`

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use tether_common::BlockReason;

use super::units::UnitCell;
use super::Shared;
use crate::domain::{UnitId, WorkerId};

/// How a unit is about to park
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Park {
    Blocked(BlockReason),
    Sleeping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ParkNote {
    pub park: Park,
    /// The wait had already been woken once and is pending again
    pub futile: bool,
}

/// The unit being polled on this thread
#[derive(Clone)]
pub(crate) struct Current {
    pub cell: Arc<UnitCell>,
    pub shared: Arc<Shared>,
}

thread_local! {
    static WORKER: Cell<Option<WorkerId>> = const { Cell::new(None) };
    static CURRENT: RefCell<Option<Current>> = const { RefCell::new(None) };
    static PARK_NOTE: Cell<Option<ParkNote>> = const { Cell::new(None) };
}

pub(crate) fn set_worker(worker: Option<WorkerId>) {
    WORKER.with(|w| w.set(worker));
}

pub(crate) fn current_worker() -> Option<WorkerId> {
    WORKER.with(Cell::get)
}

pub(crate) fn current() -> Option<Current> {
    CURRENT.with(|c| c.borrow().clone())
}

pub(crate) fn current_unit() -> Option<UnitId> {
    CURRENT.with(|c| c.borrow().as_ref().map(|cur| cur.cell.id()))
}

/// Restores the previously current unit on drop
pub(crate) struct EnterGuard {
    previous: Option<Current>,
}

pub(crate) fn enter_unit(current: Current) -> EnterGuard {
    let previous = CURRENT.with(|c| c.borrow_mut().replace(current));
    EnterGuard { previous }
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|c| *c.borrow_mut() = previous);
    }
}

/// Record how the current poll is about to park; the innermost note wins
pub(crate) fn note_park(note: ParkNote) {
    PARK_NOTE.with(|n| {
        if n.get().is_none() {
            n.set(Some(note));
        }
    });
}

pub(crate) fn take_park_note() -> Option<ParkNote> {
    PARK_NOTE.with(Cell::take)
}
