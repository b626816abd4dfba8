//! Instrumenting future wrapper
//!
//! Every spawned future runs inside an [`Instrumented`] wrapper that turns
//! poll results and wakeups into scheduler events:
//!
//! ```text
//!              spawn ──▶ TaskCreate
//!                          │
//!       ┌──────────────── poll ◀─────────────────────────┐
//!       │  TaskStart / TaskStartLocal / TaskStartLabel   │
//!       ▼                                                │
//!   Ready ──▶ TaskEnd                                    │
//!   Pending, woken during poll ──▶ TaskSched/TaskPreempt─┤
//!   Pending, tagged wait ──▶ TaskBlock*/TaskSleep        │
//!        └──── wake ──▶ TaskUnblock / TaskUnblockLocal ──┘
//!   dropped unfinished ──▶ TaskStop
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::time::Instant;

use log::trace;
use tether_common::{BlockReason, EventKind};

use super::context::{self, Current, Park, ParkNote};
use super::Shared;
use crate::domain::{UnitId, UnitState};
use crate::events::Payload;

pub(crate) struct Instrumented<F> {
    future: Pin<Box<F>>,
    current: Current,
    /// Last outer waker and the wrapper built around it
    waker: Option<(Waker, Waker)>,
    finished: bool,
}

impl<F> Instrumented<F> {
    /// Register a new unit and emit its `TaskCreate`
    pub(crate) fn new(shared: Arc<Shared>, label: Option<Arc<str>>, future: F) -> Self {
        let cell = shared.units.create(label);
        {
            let _order = cell.order();
            shared.bus.emit_with(EventKind::TaskCreate, || Payload::Unit(cell.id()));
        }
        trace!("Created {}", cell.id());
        Self {
            future: Box::pin(future),
            current: Current { cell, shared },
            waker: None,
            finished: false,
        }
    }

    pub(crate) fn unit(&self) -> UnitId {
        self.current.cell.id()
    }

    /// Emit a unit-shaped event for this unit, in order with its other events
    pub(crate) fn announce(&self, kind: EventKind) {
        let Current { cell, shared } = &self.current;
        let _order = cell.order();
        shared.bus.emit_with(kind, || Payload::Unit(cell.id()));
    }

    fn wrapped_waker(&mut self, outer: &Waker) -> Waker {
        if let Some((cached, wrapped)) = &self.waker {
            if cached.will_wake(outer) {
                return wrapped.clone();
            }
        }
        let wrapped = Waker::from(Arc::new(UnitWaker {
            current: self.current.clone(),
            inner: outer.clone(),
        }));
        self.waker = Some((outer.clone(), wrapped.clone()));
        wrapped
    }

    fn start(&self) {
        let Current { cell, shared } = &self.current;
        let worker = context::current_worker();
        let _order = cell.order();
        let kind = {
            let mut rec = cell.lock();
            let kind = if cell.label().is_some() {
                EventKind::TaskStartLabel
            } else if worker.is_some() && rec.last_worker == worker {
                EventKind::TaskStartLocal
            } else {
                EventKind::TaskStart
            };
            rec.state = UnitState::Running;
            rec.notified = false;
            rec.last_worker = worker;
            kind
        };
        shared.bus.emit_with(kind, || match cell.label() {
            Some(label) => Payload::LabeledUnit { unit: cell.id(), label: Arc::clone(label) },
            None => Payload::Unit(cell.id()),
        });
    }

    fn park(&self, note: Option<ParkNote>, poll_time: std::time::Duration) {
        let Current { cell, shared } = &self.current;
        let id = cell.id();
        let _order = cell.order();

        let rescheduled = {
            let mut rec = cell.lock();
            let notified = std::mem::take(&mut rec.notified);
            if notified {
                rec.state = UnitState::Runnable;
            }
            notified
        };
        if rescheduled {
            let kind = if poll_time >= shared.config.preempt_slice {
                EventKind::TaskPreempt
            } else {
                EventKind::TaskSched
            };
            shared.bus.emit_with(kind, || Payload::Unit(id));
            return;
        }

        let (state, kind) = match note.map(|n| n.park) {
            Some(Park::Sleeping) => (UnitState::Sleeping, EventKind::TaskSleep),
            Some(Park::Blocked(reason)) => (UnitState::Blocked(reason), reason.event_kind()),
            None => (UnitState::Blocked(BlockReason::Other), EventKind::TaskBlock),
        };
        if note.is_some_and(|n| n.futile) {
            shared.bus.emit_with(EventKind::FutileWakeup, || Payload::Unit(id));
        }
        {
            let mut rec = cell.lock();
            rec.state = state;
            rec.parked_at =
                matches!(state, UnitState::Blocked(_)).then(|| shared.bus.clock().now());
        }
        shared.bus.emit_with(kind, || Payload::Unit(id));
    }

    fn finish(&mut self, kind: EventKind) {
        if self.finished {
            return;
        }
        self.finished = true;
        let Current { cell, shared } = &self.current;
        let id = cell.id();
        {
            let _order = cell.order();
            {
                let mut rec = cell.lock();
                rec.state = UnitState::Done;
                rec.frames.clear();
            }
            shared.bus.emit_with(kind, || Payload::Unit(id));
        }
        // Entries stay readable from TaskEnd/TaskStop handlers
        shared.task_locals.evict(id);
        shared.units.remove(id);
        trace!("{id} finished ({})", kind.name());
    }
}

impl<F: Future> Future for Instrumented<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<F::Output> {
        let this = self.get_mut();
        this.start();

        let waker = this.wrapped_waker(cx.waker());
        let mut inner_cx = Context::from_waker(&waker);
        let started = Instant::now();

        context::take_park_note();
        let result = {
            let _enter = context::enter_unit(this.current.clone());
            this.future.as_mut().poll(&mut inner_cx)
        };
        let note = context::take_park_note();

        match result {
            Poll::Ready(out) => {
                this.finish(EventKind::TaskEnd);
                Poll::Ready(out)
            }
            Poll::Pending => {
                this.park(note, started.elapsed());
                Poll::Pending
            }
        }
    }
}

impl<F> Drop for Instrumented<F> {
    fn drop(&mut self) {
        self.finish(EventKind::TaskStop);
    }
}

/// Waker wrapper that reports wakeups of parked units
struct UnitWaker {
    current: Current,
    inner: Waker,
}

impl UnitWaker {
    fn on_wake(&self) {
        let Current { cell, shared } = &self.current;
        let id = cell.id();
        let mut blocked_for = None;
        {
            let _order = cell.order();
            let unblocked = {
                let mut rec = cell.lock();
                match rec.state {
                    UnitState::Running | UnitState::InSyscall => {
                        rec.notified = true;
                        None
                    }
                    state if state.is_parked() => {
                        rec.state = UnitState::Runnable;
                        let worker = context::current_worker();
                        let kind = if worker.is_some() && rec.last_worker == worker {
                            EventKind::TaskUnblockLocal
                        } else {
                            EventKind::TaskUnblock
                        };
                        Some((kind, rec.parked_at.take()))
                    }
                    _ => None,
                }
            };
            if let Some((kind, parked_at)) = unblocked {
                shared.bus.emit_with(kind, || Payload::Unit(id));
                blocked_for = parked_at.map(|at| shared.bus.clock().now().saturating_since(at));
            }
        }
        if let Some(nanos) = blocked_for {
            shared.profiler.on_blocked(Some(id), nanos, || cell.stack());
        }
    }
}

impl Wake for UnitWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.on_wake();
        self.inner.wake_by_ref();
    }
}

/// Emit the events of a unit that is already in a waiting state when tracing
/// of `kind` starts
pub(crate) fn announce_waiting(shared: &Shared, kind: EventKind) {
    let wanted = |state: UnitState| match kind {
        EventKind::TaskWaiting => state.is_parked(),
        EventKind::TaskInSyscall => state == UnitState::InSyscall,
        _ => false,
    };
    for cell in shared.units.cells() {
        let _order = cell.order();
        let state = cell.lock().state;
        if wanted(state) {
            shared.bus.emit_with(kind, || Payload::Unit(cell.id()));
        }
    }
}

