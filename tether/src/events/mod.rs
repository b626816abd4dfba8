//! # Event Subscription
//!
//! Typed channels for scheduler, reclaimer and diagnostic events. The agent
//! registers at most one [`Handler`] per [`EventKind`]; the host publishes an
//! [`EventRecord`] whenever the corresponding occurrence happens.
//!
//! ## Delivery
//!
//! - Synchronous and inline on the thread that observed the occurrence
//! - Events of one execution unit arrive in the order the host observed them
//! - Timestamps never decrease across the whole process (ties are possible)
//! - A kind with no handler costs one atomic load per occurrence
//!
//! Handler panics are not contained: a panicking handler unwinds into the
//! host code that emitted the event.

mod bus;
mod handler;

pub use bus::{EventBus, Registration};
pub use handler::Handler;

use std::sync::Arc;

use tether_common::{EventKind, PayloadShape, RegionMode, StwKind};

use crate::domain::{Timestamp, UnitId, UserTaskId, WorkerId};

/// Event payload; the variant is fixed per [`EventKind`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Bare,
    Worker(WorkerId),
    Unit(UnitId),
    LabeledUnit { unit: UnitId, label: Arc<str> },
    StwStart(StwKind),
    Sweep { swept: u64, reclaimed: u64 },
    Counter(u64),
    Text(Arc<str>),
    UserTaskCreate { task: UserTaskId, parent: UserTaskId, name: Arc<str> },
    UserTaskEnd(UserTaskId),
    UserRegion { task: UserTaskId, mode: RegionMode, name: Arc<str> },
    UserLog { task: UserTaskId, key: Arc<str>, value: Arc<str> },
}

impl Payload {
    #[must_use]
    pub fn shape(&self) -> PayloadShape {
        match self {
            Payload::Bare => PayloadShape::Bare,
            Payload::Worker(_) => PayloadShape::Worker,
            Payload::Unit(_) => PayloadShape::Unit,
            Payload::LabeledUnit { .. } => PayloadShape::LabeledUnit,
            Payload::StwStart(_) => PayloadShape::StwStart,
            Payload::Sweep { .. } => PayloadShape::Sweep,
            Payload::Counter(_) => PayloadShape::Counter,
            Payload::Text(_) => PayloadShape::Text,
            Payload::UserTaskCreate { .. } => PayloadShape::UserTaskCreate,
            Payload::UserTaskEnd(_) => PayloadShape::UserTaskEnd,
            Payload::UserRegion { .. } => PayloadShape::UserRegion,
            Payload::UserLog { .. } => PayloadShape::UserLog,
        }
    }

    /// Execution unit the event is about, if any
    #[must_use]
    pub fn unit(&self) -> Option<UnitId> {
        match self {
            Payload::Unit(unit) | Payload::LabeledUnit { unit, .. } => Some(*unit),
            _ => None,
        }
    }
}

/// One delivered occurrence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub kind: EventKind,
    pub ts: Timestamp,
    pub payload: Payload,
}

impl EventRecord {
    #[must_use]
    pub fn new(kind: EventKind, ts: Timestamp, payload: Payload) -> Self {
        Self { kind, ts, payload }
    }

    #[must_use]
    pub fn unit(&self) -> Option<UnitId> {
        self.payload.unit()
    }
}
