//! Records delivered to profile callbacks
//!
//! Every record owns a copy of the sampled stack. Addresses resolve to
//! functions through [`crate::symbolization::SymbolResolver::function_at`].

use crate::domain::{Address, Timestamp, UnitId, WorkerId};

/// A sampled stack (CPU, task and worker-creation profiles)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackRecord {
    pub ts: Timestamp,
    pub unit: Option<UnitId>,
    /// Worker the unit was running on, when known
    pub worker: Option<WorkerId>,
    /// Innermost frame last
    pub stack: Vec<Address>,
}

/// A sampled allocation (heap profile)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemProfileRecord {
    pub ts: Timestamp,
    pub unit: Option<UnitId>,
    pub bytes: u64,
    /// Live managed bytes right after the allocation
    pub live_bytes: u64,
    pub stack: Vec<Address>,
}

/// A sampled blocking wait or lock contention (block and contention profiles)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockProfileRecord {
    pub ts: Timestamp,
    pub unit: Option<UnitId>,
    /// Number of waits this record stands for
    pub count: u64,
    /// Duration of the sampled wait
    pub nanos: u64,
    pub stack: Vec<Address>,
}

impl StackRecord {
    /// Innermost frame, if the stack is not empty
    #[must_use]
    pub fn leaf(&self) -> Option<Address> {
        self.stack.last().copied()
    }
}
