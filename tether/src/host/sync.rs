//! Instrumented waiting primitives
//!
//! Code running on the host reports *why* it waits by routing the wait
//! through these helpers. An untagged wait still works, it is just reported as
//! a generic `TaskBlock`.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tether_common::{BlockReason, EventKind};

use super::context::{self, Park, ParkNote};
use crate::domain::{Address, UnitState};
use crate::events::Payload;

/// A wait whose `Pending` results are attributed to a park reason
pub struct Tagged<F> {
    future: Pin<Box<F>>,
    park: Park,
    waited: bool,
}

impl<F: Future> Future for Tagged<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<F::Output> {
        let this = self.get_mut();
        match this.future.as_mut().poll(cx) {
            Poll::Ready(out) => Poll::Ready(out),
            Poll::Pending => {
                context::note_park(ParkNote { park: this.park, futile: this.waited });
                this.waited = true;
                Poll::Pending
            }
        }
    }
}

/// Attribute a wait to `reason`
///
/// ```no_run
/// # async fn demo(mut rx: tokio::sync::mpsc::Receiver<u32>) {
/// use tether::host::tag;
/// use tether_common::BlockReason;
///
/// let next = tag(BlockReason::Receive, rx.recv()).await;
/// # }
/// ```
pub fn tag<F: Future>(reason: BlockReason, future: F) -> Tagged<F> {
    Tagged { future: Box::pin(future), park: Park::Blocked(reason), waited: false }
}

/// Sleep for `duration`, reported as `TaskSleep`
pub fn sleep(duration: Duration) -> Tagged<tokio::time::Sleep> {
    Tagged { future: Box::pin(tokio::time::sleep(duration)), park: Park::Sleeping, waited: false }
}

/// Yield to the scheduler, reported as `TaskSched`
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Async mutex reporting contention and `TaskBlockSync`
#[derive(Debug, Default)]
pub struct Mutex<T> {
    inner: tokio::sync::Mutex<T>,
}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self { inner: tokio::sync::Mutex::new(value) }
    }

    /// Acquire the lock
    ///
    /// An uncontended acquisition is invisible to the host. A contended one
    /// parks the unit as blocked on sync and feeds the contention profile.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, T> {
        if let Ok(guard) = self.inner.try_lock() {
            return guard;
        }
        let started = Instant::now();
        let guard = tag(BlockReason::Sync, self.inner.lock()).await;
        if let Some(cur) = context::current() {
            let nanos = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
            let cell = &cur.cell;
            cur.shared.profiler.on_contention(Some(cell.id()), nanos, || cell.stack());
        }
        guard
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

/// Run a blocking call, handing the worker off while it runs
///
/// Reported as `TaskSyscall`, `TaskSyscallBlock`, then `TaskSyscallExit`.
/// Must be called from the host's multi-threaded runtime or outside any
/// runtime.
pub fn blocking<R>(f: impl FnOnce() -> R) -> R {
    let Some(cur) = context::current() else {
        return f();
    };
    let id = cur.cell.id();
    let bus = &cur.shared.bus;
    {
        let _order = cur.cell.order();
        cur.cell.lock().state = UnitState::InSyscall;
        bus.emit_with(EventKind::TaskSyscall, || Payload::Unit(id));
        bus.emit_with(EventKind::TaskSyscallBlock, || Payload::Unit(id));
    }
    let out = tokio::task::block_in_place(f);
    {
        let _order = cur.cell.order();
        cur.cell.lock().state = UnitState::Running;
        bus.emit_with(EventKind::TaskSyscallExit, || Payload::Unit(id));
    }
    out
}

/// Run a short system call inline, without a worker handoff
///
/// Reported as `TaskSyscall` followed by `TaskSyscallExitLocal`.
pub fn syscall<R>(f: impl FnOnce() -> R) -> R {
    let Some(cur) = context::current() else {
        return f();
    };
    let id = cur.cell.id();
    let bus = &cur.shared.bus;
    {
        let _order = cur.cell.order();
        cur.cell.lock().state = UnitState::InSyscall;
        bus.emit_with(EventKind::TaskSyscall, || Payload::Unit(id));
    }
    let out = f();
    {
        let _order = cur.cell.order();
        cur.cell.lock().state = UnitState::Running;
        bus.emit(EventKind::TaskSyscallExitLocal, Payload::Bare);
    }
    out
}

/// Shadow-stack frame, popped when dropped
#[must_use = "the frame is popped as soon as the guard is dropped"]
pub struct FrameGuard {
    frame: Option<(context::Current, usize)>,
}

/// Push `address` on the current unit's shadow stack
///
/// Profile samples of the unit carry every frame pushed and not yet popped.
/// Outside a unit this does nothing.
pub fn enter_frame(address: Address) -> FrameGuard {
    let frame = context::current().map(|cur| {
        let depth = {
            let mut rec = cur.cell.lock();
            rec.frames.push(address);
            rec.frames.len() - 1
        };
        (cur, depth)
    });
    FrameGuard { frame }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if let Some((cur, depth)) = self.frame.take() {
            cur.cell.lock().frames.truncate(depth);
        }
    }
}
