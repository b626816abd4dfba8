//! # Shared Interface Constants (Host ↔ Agent)
//!
//! Plain enums and constants shared between the instrumented host and any agent,
//! including agents written outside Rust that only see numeric codes. Every enum
//! is `#[repr(u8)]` with stable discriminants so the codes can cross an FFI
//! boundary unchanged.
//!
//! ## Key Types
//!
//! - [`EventKind`] - Every event the host can deliver, with its family and payload shape
//! - [`PayloadShape`] - The callback signature a kind is delivered with
//! - [`BlockReason`] - Why an execution unit stopped running
//! - [`StwKind`] - Which stop-the-world phase of a reclamation cycle started
//! - [`ProfileKind`] - Profile families and how their rate argument is interpreted

#![no_std]

/// Version of the instrumentation interface implemented by this crate.
pub const INTERFACE_VERSION: &str = "1.0";

/// Build-version marker for agents that are not compiled against the host
/// (foreign/native agents). Such agents are compatible with every host build.
pub const NATIVE_BUILD: &str = "native";

/// Exit code used when the host terminates because of an unrecovered failure.
pub const EXIT_UNRECOVERED_FAILURE: i32 = 2;

/// Number of distinct [`EventKind`]s.
pub const EVENT_KIND_COUNT: usize = 44;

// ============================================================================
// Event kinds
// ============================================================================

/// Event family, used for filtering and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventFamily {
    /// Workers and execution units.
    Scheduler = 0,
    /// Memory reclaimer cycles and heap accounting.
    Reclaimer = 1,
    /// Agent-visible custom markers (interned strings, user tasks, regions, logs).
    Diagnostic = 2,
}

/// The signature an event kind is delivered with.
///
/// A handler registered for a kind must accept exactly this shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PayloadShape {
    /// Timestamp only
    Bare = 0,
    /// Timestamp + worker identity
    Worker = 1,
    /// Timestamp + execution unit identity
    Unit = 2,
    /// Timestamp + execution unit identity + label
    LabeledUnit = 3,
    /// Timestamp + stop-the-world kind
    StwStart = 4,
    /// Timestamp + bytes swept + bytes reclaimed
    Sweep = 5,
    /// Timestamp + a single counter value
    Counter = 6,
    /// Timestamp + interned string
    Text = 7,
    /// Timestamp + user task id + parent id + name
    UserTaskCreate = 8,
    /// Timestamp + user task id
    UserTaskEnd = 9,
    /// Timestamp + user task id + region mode + name
    UserRegion = 10,
    /// Timestamp + user task id + key + value
    UserLog = 11,
}

/// Every event the host can deliver to a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum EventKind {
    // --- scheduler ---
    /// A worker thread started running
    WorkerStart = 0,
    /// A worker thread stopped
    WorkerStop = 1,
    /// A new execution unit was created
    TaskCreate = 2,
    /// A unit started running
    TaskStart = 3,
    /// A unit ran to completion
    TaskEnd = 4,
    /// A unit was stopped for good before completing
    TaskStop = 5,
    /// A unit yielded voluntarily and stays runnable
    TaskSched = 6,
    /// A unit was descheduled after exceeding its time slice
    TaskPreempt = 7,
    /// A unit went to sleep on a timer
    TaskSleep = 8,
    /// A unit blocked for an unspecified reason
    TaskBlock = 9,
    /// A blocked unit became runnable again
    TaskUnblock = 10,
    /// A unit blocked on a channel send
    TaskBlockSend = 11,
    /// A unit blocked on a channel receive
    TaskBlockRecv = 12,
    /// A unit blocked on a select over several operations
    TaskBlockSelect = 13,
    /// A unit blocked on a mutex or rwlock
    TaskBlockSync = 14,
    /// A unit blocked on a condition
    TaskBlockCond = 15,
    /// A unit blocked on network readiness
    TaskBlockNet = 16,
    /// A unit entered a blocking system call
    TaskSyscall = 17,
    /// A unit returned from a blocking system call
    TaskSyscallExit = 18,
    /// A system call blocked and the worker was handed off
    TaskSyscallBlock = 19,
    /// A unit that was already blocked when tracing of this kind started
    TaskWaiting = 20,
    /// A unit that was already in a system call when tracing of this kind started
    TaskInSyscall = 21,
    /// A unit started running on the same worker as its previous event
    TaskStartLocal = 22,
    /// A unit was unblocked from the same worker it last ran on
    TaskUnblockLocal = 23,
    /// A system call exited on the same worker as the previous event
    TaskSyscallExitLocal = 24,
    /// A labeled unit started running
    TaskStartLabel = 25,
    /// A unit blocked waiting for a reclamation cycle it had to assist
    TaskBlockReclaim = 26,
    /// A unit dedicated to timers was created
    TimerTask = 27,
    /// The previous wakeup of a unit turned out to be futile
    FutileWakeup = 28,
    // --- reclaimer ---
    /// A reclamation cycle started
    ReclaimStart = 29,
    /// A reclamation cycle finished marking
    ReclaimDone = 30,
    /// A stop-the-world phase started
    StwStart = 31,
    /// A stop-the-world phase finished
    StwDone = 32,
    /// The sweep phase started
    SweepStart = 33,
    /// The sweep phase finished
    SweepDone = 34,
    /// The live heap size changed
    HeapSize = 35,
    /// The heap size that triggers the next cycle changed
    NextThreshold = 36,
    /// An allocating unit started assisting the marker
    MarkAssistStart = 37,
    /// An allocating unit finished assisting the marker
    MarkAssistDone = 38,
    // --- diagnostic ---
    /// A new string was interned by the tracing framework
    String = 39,
    /// A user task was created
    UserTaskCreate = 40,
    /// A user task ended
    UserTaskEnd = 41,
    /// A user region started or ended
    UserRegion = 42,
    /// A user log entry was written
    UserLog = 43,
}

impl EventKind {
    /// All kinds in code order.
    pub const ALL: [EventKind; EVENT_KIND_COUNT] = [
        EventKind::WorkerStart,
        EventKind::WorkerStop,
        EventKind::TaskCreate,
        EventKind::TaskStart,
        EventKind::TaskEnd,
        EventKind::TaskStop,
        EventKind::TaskSched,
        EventKind::TaskPreempt,
        EventKind::TaskSleep,
        EventKind::TaskBlock,
        EventKind::TaskUnblock,
        EventKind::TaskBlockSend,
        EventKind::TaskBlockRecv,
        EventKind::TaskBlockSelect,
        EventKind::TaskBlockSync,
        EventKind::TaskBlockCond,
        EventKind::TaskBlockNet,
        EventKind::TaskSyscall,
        EventKind::TaskSyscallExit,
        EventKind::TaskSyscallBlock,
        EventKind::TaskWaiting,
        EventKind::TaskInSyscall,
        EventKind::TaskStartLocal,
        EventKind::TaskUnblockLocal,
        EventKind::TaskSyscallExitLocal,
        EventKind::TaskStartLabel,
        EventKind::TaskBlockReclaim,
        EventKind::TimerTask,
        EventKind::FutileWakeup,
        EventKind::ReclaimStart,
        EventKind::ReclaimDone,
        EventKind::StwStart,
        EventKind::StwDone,
        EventKind::SweepStart,
        EventKind::SweepDone,
        EventKind::HeapSize,
        EventKind::NextThreshold,
        EventKind::MarkAssistStart,
        EventKind::MarkAssistDone,
        EventKind::String,
        EventKind::UserTaskCreate,
        EventKind::UserTaskEnd,
        EventKind::UserRegion,
        EventKind::UserLog,
    ];

    /// Numeric code of this kind (stable across builds).
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Index into per-kind tables.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Look up a kind by its numeric code.
    #[must_use]
    pub fn from_code(code: u8) -> Option<EventKind> {
        EventKind::ALL.get(code as usize).copied()
    }

    /// Family this kind belongs to.
    #[must_use]
    pub const fn family(self) -> EventFamily {
        match self as u8 {
            0..=28 => EventFamily::Scheduler,
            29..=38 => EventFamily::Reclaimer,
            _ => EventFamily::Diagnostic,
        }
    }

    /// Payload shape this kind is delivered with.
    #[must_use]
    pub const fn shape(self) -> PayloadShape {
        match self {
            EventKind::WorkerStart | EventKind::WorkerStop => PayloadShape::Worker,
            EventKind::TaskStartLabel => PayloadShape::LabeledUnit,
            EventKind::TaskSyscallExitLocal
            | EventKind::ReclaimStart
            | EventKind::ReclaimDone
            | EventKind::StwDone
            | EventKind::SweepStart
            | EventKind::MarkAssistStart
            | EventKind::MarkAssistDone => PayloadShape::Bare,
            EventKind::StwStart => PayloadShape::StwStart,
            EventKind::SweepDone => PayloadShape::Sweep,
            EventKind::HeapSize | EventKind::NextThreshold => PayloadShape::Counter,
            EventKind::String => PayloadShape::Text,
            EventKind::UserTaskCreate => PayloadShape::UserTaskCreate,
            EventKind::UserTaskEnd => PayloadShape::UserTaskEnd,
            EventKind::UserRegion => PayloadShape::UserRegion,
            EventKind::UserLog => PayloadShape::UserLog,
            _ => PayloadShape::Unit,
        }
    }

    /// Reason tag for the blocking kinds.
    #[must_use]
    pub const fn block_reason(self) -> Option<BlockReason> {
        match self {
            EventKind::TaskBlock => Some(BlockReason::Other),
            EventKind::TaskBlockSend => Some(BlockReason::Send),
            EventKind::TaskBlockRecv => Some(BlockReason::Receive),
            EventKind::TaskBlockSelect => Some(BlockReason::Select),
            EventKind::TaskBlockSync => Some(BlockReason::Sync),
            EventKind::TaskBlockCond => Some(BlockReason::Cond),
            EventKind::TaskBlockNet => Some(BlockReason::Net),
            EventKind::TaskSyscallBlock => Some(BlockReason::Syscall),
            EventKind::TaskBlockReclaim => Some(BlockReason::Reclaim),
            _ => None,
        }
    }

    /// Short stable name, used in logs and exported traces.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            EventKind::WorkerStart => "worker_start",
            EventKind::WorkerStop => "worker_stop",
            EventKind::TaskCreate => "task_create",
            EventKind::TaskStart => "task_start",
            EventKind::TaskEnd => "task_end",
            EventKind::TaskStop => "task_stop",
            EventKind::TaskSched => "task_sched",
            EventKind::TaskPreempt => "task_preempt",
            EventKind::TaskSleep => "task_sleep",
            EventKind::TaskBlock => "task_block",
            EventKind::TaskUnblock => "task_unblock",
            EventKind::TaskBlockSend => "task_block_send",
            EventKind::TaskBlockRecv => "task_block_recv",
            EventKind::TaskBlockSelect => "task_block_select",
            EventKind::TaskBlockSync => "task_block_sync",
            EventKind::TaskBlockCond => "task_block_cond",
            EventKind::TaskBlockNet => "task_block_net",
            EventKind::TaskSyscall => "task_syscall",
            EventKind::TaskSyscallExit => "task_syscall_exit",
            EventKind::TaskSyscallBlock => "task_syscall_block",
            EventKind::TaskWaiting => "task_waiting",
            EventKind::TaskInSyscall => "task_in_syscall",
            EventKind::TaskStartLocal => "task_start_local",
            EventKind::TaskUnblockLocal => "task_unblock_local",
            EventKind::TaskSyscallExitLocal => "task_syscall_exit_local",
            EventKind::TaskStartLabel => "task_start_label",
            EventKind::TaskBlockReclaim => "task_block_reclaim",
            EventKind::TimerTask => "timer_task",
            EventKind::FutileWakeup => "futile_wakeup",
            EventKind::ReclaimStart => "reclaim_start",
            EventKind::ReclaimDone => "reclaim_done",
            EventKind::StwStart => "stw_start",
            EventKind::StwDone => "stw_done",
            EventKind::SweepStart => "sweep_start",
            EventKind::SweepDone => "sweep_done",
            EventKind::HeapSize => "heap_size",
            EventKind::NextThreshold => "next_threshold",
            EventKind::MarkAssistStart => "mark_assist_start",
            EventKind::MarkAssistDone => "mark_assist_done",
            EventKind::String => "string",
            EventKind::UserTaskCreate => "user_task_create",
            EventKind::UserTaskEnd => "user_task_end",
            EventKind::UserRegion => "user_region",
            EventKind::UserLog => "user_log",
        }
    }
}

// ============================================================================
// Payload tags
// ============================================================================

/// Why an execution unit stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum BlockReason {
    /// Not attributed to a specific primitive
    #[default]
    Other = 0,
    /// Channel send
    Send = 1,
    /// Channel receive
    Receive = 2,
    /// Select over several operations
    Select = 3,
    /// Mutex / rwlock
    Sync = 4,
    /// Condition variable / notify
    Cond = 5,
    /// Network readiness
    Net = 6,
    /// Blocking system call
    Syscall = 7,
    /// Waiting for a reclamation cycle
    Reclaim = 8,
}

impl BlockReason {
    /// The event kind emitted when a unit blocks for this reason.
    #[must_use]
    pub const fn event_kind(self) -> EventKind {
        match self {
            BlockReason::Other => EventKind::TaskBlock,
            BlockReason::Send => EventKind::TaskBlockSend,
            BlockReason::Receive => EventKind::TaskBlockRecv,
            BlockReason::Select => EventKind::TaskBlockSelect,
            BlockReason::Sync => EventKind::TaskBlockSync,
            BlockReason::Cond => EventKind::TaskBlockCond,
            BlockReason::Net => EventKind::TaskBlockNet,
            BlockReason::Syscall => EventKind::TaskSyscallBlock,
            BlockReason::Reclaim => EventKind::TaskBlockReclaim,
        }
    }
}

/// Stop-the-world phase of a reclamation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StwKind {
    /// Pause that terminates the previous sweep and enables marking
    SweepTermination = 0,
    /// Pause that terminates marking
    MarkTermination = 1,
}

/// Whether a user region event opens or closes the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RegionMode {
    Start = 0,
    End = 1,
}

// ============================================================================
// Profiles
// ============================================================================

/// Profile families offered by the profiling registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProfileKind {
    /// Periodic stacks of running units
    Cpu = 0,
    /// Allocation samples
    Heap = 1,
    /// Stacks at worker thread creation
    WorkerCreation = 2,
    /// Snapshot of every live unit's stack
    Task = 3,
    /// Blocking waits on synchronization primitives
    Block = 4,
    /// Lock contentions
    Contention = 5,
}

/// How a profile's rate argument is interpreted. Deliberately differs per family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateUnit {
    /// Samples per second
    Hertz,
    /// One sample every N occurrences
    OneInN,
    /// One sample per N nanoseconds spent blocked
    NanosBlocked,
}

impl ProfileKind {
    /// Unit of the rate argument for this profile.
    #[must_use]
    pub const fn rate_unit(self) -> RateUnit {
        match self {
            ProfileKind::Cpu | ProfileKind::Task => RateUnit::Hertz,
            ProfileKind::Heap | ProfileKind::WorkerCreation | ProfileKind::Contention => {
                RateUnit::OneInN
            }
            ProfileKind::Block => RateUnit::NanosBlocked,
        }
    }

    /// Short stable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ProfileKind::Cpu => "cpu",
            ProfileKind::Heap => "heap",
            ProfileKind::WorkerCreation => "worker_creation",
            ProfileKind::Task => "task",
            ProfileKind::Block => "block",
            ProfileKind::Contention => "contention",
        }
    }
}
