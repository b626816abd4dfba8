//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent common bugs like passing a worker index where
//! a unit identity is expected, and keep every value that crosses the agent
//! boundary an opaque, comparable identity rather than a reference.

use std::fmt;
use std::num::NonZeroU64;

use tether_common::BlockReason;

/// Code address (function entry point or instruction inside a function)
pub type Address = usize;

/// Execution unit identity
///
/// Allocated by the host when a unit is created and never reused, so an
/// identity stays valid to compare against after the unit is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(NonZeroU64);

impl UnitId {
    /// Create an identity from its raw value (`None` for zero)
    #[must_use]
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// Raw numeric value, e.g. for foreign agents or trace export
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unit#{}", self.0)
    }
}

/// Worker ID (0-indexed)
///
/// Represents a host worker thread's logical ID (0, 1, 2, ...) in creation order.
/// This is NOT the same as the OS thread ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Worker#{}", self.0)
    }
}

/// User task ID from diagnostic annotations (0 = no task / background)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct UserTaskId(pub u64);

impl UserTaskId {
    pub const NONE: UserTaskId = UserTaskId(0);
}

/// Timestamp in nanoseconds
///
/// Nanoseconds since the host clock was created. Monotonic and non-decreasing
/// across all threads of one host; two events may carry the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Convert to seconds (f64)
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn as_seconds(self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    /// Convert to microseconds (f64, for trace export)
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn as_micros_f64(self) -> f64 {
        self.0 as f64 / 1_000.0
    }

    /// Nanoseconds elapsed since `earlier` (zero if `earlier` is later)
    #[must_use]
    pub fn saturating_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

/// Scheduling state of an execution unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitState {
    /// Created or woken, waiting for a worker
    Runnable,
    /// Currently being polled by a worker
    Running,
    /// Waiting on a synchronization primitive
    Blocked(BlockReason),
    /// Waiting on a timer
    Sleeping,
    /// Inside a blocking system call
    InSyscall,
    /// Finished or stopped
    Done,
}

impl UnitState {
    /// Whether a wakeup moves this unit back to `Runnable`
    #[must_use]
    pub fn is_parked(self) -> bool {
        matches!(self, UnitState::Blocked(_) | UnitState::Sleeping)
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitState::Runnable => write!(f, "runnable"),
            UnitState::Running => write!(f, "running"),
            UnitState::Blocked(reason) => write!(f, "blocked({reason:?})"),
            UnitState::Sleeping => write!(f, "sleeping"),
            UnitState::InSyscall => write!(f, "in-syscall"),
            UnitState::Done => write!(f, "done"),
        }
    }
}

/// Read-only snapshot of an execution unit, safe to hand to an agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitInfo {
    pub id: UnitId,
    pub state: UnitState,
    pub label: Option<String>,
}
