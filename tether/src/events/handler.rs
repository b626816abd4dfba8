use tether_common::{PayloadShape, RegionMode, StwKind};

use super::{EventRecord, Payload};
use crate::domain::{InterfaceError, Timestamp, UnitId, UserTaskId, WorkerId};

/// An agent callback, tagged with the payload shape it accepts
///
/// Build one with the constructor matching the event kind's shape, e.g.
/// [`Handler::unit`] for `TaskCreate` or [`Handler::sweep`] for `SweepDone`.
/// [`Handler::record`] accepts every kind.
pub enum Handler {
    Bare(Box<dyn Fn(Timestamp) + Send + Sync>),
    Worker(Box<dyn Fn(Timestamp, WorkerId) + Send + Sync>),
    Unit(Box<dyn Fn(Timestamp, UnitId) + Send + Sync>),
    LabeledUnit(Box<dyn Fn(Timestamp, UnitId, &str) + Send + Sync>),
    StwStart(Box<dyn Fn(Timestamp, StwKind) + Send + Sync>),
    Sweep(Box<dyn Fn(Timestamp, u64, u64) + Send + Sync>),
    Counter(Box<dyn Fn(Timestamp, u64) + Send + Sync>),
    Text(Box<dyn Fn(Timestamp, &str) + Send + Sync>),
    UserTaskCreate(Box<dyn Fn(Timestamp, UserTaskId, UserTaskId, &str) + Send + Sync>),
    UserTaskEnd(Box<dyn Fn(Timestamp, UserTaskId) + Send + Sync>),
    UserRegion(Box<dyn Fn(Timestamp, UserTaskId, RegionMode, &str) + Send + Sync>),
    UserLog(Box<dyn Fn(Timestamp, UserTaskId, &str, &str) + Send + Sync>),
    Record(Box<dyn Fn(&EventRecord) + Send + Sync>),
}

impl Handler {
    pub fn bare(f: impl Fn(Timestamp) + Send + Sync + 'static) -> Self {
        Handler::Bare(Box::new(f))
    }

    pub fn worker(f: impl Fn(Timestamp, WorkerId) + Send + Sync + 'static) -> Self {
        Handler::Worker(Box::new(f))
    }

    pub fn unit(f: impl Fn(Timestamp, UnitId) + Send + Sync + 'static) -> Self {
        Handler::Unit(Box::new(f))
    }

    pub fn labeled_unit(f: impl Fn(Timestamp, UnitId, &str) + Send + Sync + 'static) -> Self {
        Handler::LabeledUnit(Box::new(f))
    }

    pub fn stw_start(f: impl Fn(Timestamp, StwKind) + Send + Sync + 'static) -> Self {
        Handler::StwStart(Box::new(f))
    }

    /// `f(ts, bytes_swept, bytes_reclaimed)`
    pub fn sweep(f: impl Fn(Timestamp, u64, u64) + Send + Sync + 'static) -> Self {
        Handler::Sweep(Box::new(f))
    }

    pub fn counter(f: impl Fn(Timestamp, u64) + Send + Sync + 'static) -> Self {
        Handler::Counter(Box::new(f))
    }

    pub fn text(f: impl Fn(Timestamp, &str) + Send + Sync + 'static) -> Self {
        Handler::Text(Box::new(f))
    }

    /// `f(ts, task, parent, name)`
    pub fn user_task_create(
        f: impl Fn(Timestamp, UserTaskId, UserTaskId, &str) + Send + Sync + 'static,
    ) -> Self {
        Handler::UserTaskCreate(Box::new(f))
    }

    pub fn user_task_end(f: impl Fn(Timestamp, UserTaskId) + Send + Sync + 'static) -> Self {
        Handler::UserTaskEnd(Box::new(f))
    }

    pub fn user_region(
        f: impl Fn(Timestamp, UserTaskId, RegionMode, &str) + Send + Sync + 'static,
    ) -> Self {
        Handler::UserRegion(Box::new(f))
    }

    /// `f(ts, task, key, value)`
    pub fn user_log(f: impl Fn(Timestamp, UserTaskId, &str, &str) + Send + Sync + 'static) -> Self {
        Handler::UserLog(Box::new(f))
    }

    /// Receive the whole record; accepted for every kind
    pub fn record(f: impl Fn(&EventRecord) + Send + Sync + 'static) -> Self {
        Handler::Record(Box::new(f))
    }

    /// Shape this handler accepts (`None` accepts every shape)
    #[must_use]
    pub fn shape(&self) -> Option<PayloadShape> {
        Some(match self {
            Handler::Bare(_) => PayloadShape::Bare,
            Handler::Worker(_) => PayloadShape::Worker,
            Handler::Unit(_) => PayloadShape::Unit,
            Handler::LabeledUnit(_) => PayloadShape::LabeledUnit,
            Handler::StwStart(_) => PayloadShape::StwStart,
            Handler::Sweep(_) => PayloadShape::Sweep,
            Handler::Counter(_) => PayloadShape::Counter,
            Handler::Text(_) => PayloadShape::Text,
            Handler::UserTaskCreate(_) => PayloadShape::UserTaskCreate,
            Handler::UserTaskEnd(_) => PayloadShape::UserTaskEnd,
            Handler::UserRegion(_) => PayloadShape::UserRegion,
            Handler::UserLog(_) => PayloadShape::UserLog,
            Handler::Record(_) => return None,
        })
    }

    /// Whether this handler can receive payloads of `shape`
    #[must_use]
    pub fn accepts(&self, shape: PayloadShape) -> bool {
        match self.shape() {
            Some(own) => own == shape,
            None => true,
        }
    }

    /// Invoke the callback with `record`
    pub(crate) fn deliver(&self, record: &EventRecord) -> Result<(), InterfaceError> {
        let ts = record.ts;
        match (self, &record.payload) {
            (Handler::Record(f), _) => f(record),
            (Handler::Bare(f), Payload::Bare) => f(ts),
            (Handler::Worker(f), Payload::Worker(w)) => f(ts, *w),
            (Handler::Unit(f), Payload::Unit(u)) => f(ts, *u),
            (Handler::LabeledUnit(f), Payload::LabeledUnit { unit, label }) => f(ts, *unit, label),
            (Handler::StwStart(f), Payload::StwStart(kind)) => f(ts, *kind),
            (Handler::Sweep(f), Payload::Sweep { swept, reclaimed }) => f(ts, *swept, *reclaimed),
            (Handler::Counter(f), Payload::Counter(v)) => f(ts, *v),
            (Handler::Text(f), Payload::Text(s)) => f(ts, s),
            (Handler::UserTaskCreate(f), Payload::UserTaskCreate { task, parent, name }) => {
                f(ts, *task, *parent, name);
            }
            (Handler::UserTaskEnd(f), Payload::UserTaskEnd(task)) => f(ts, *task),
            (Handler::UserRegion(f), Payload::UserRegion { task, mode, name }) => {
                f(ts, *task, *mode, name);
            }
            (Handler::UserLog(f), Payload::UserLog { task, key, value }) => {
                f(ts, *task, key, value);
            }
            (_, payload) => {
                return Err(InterfaceError::WrongPayload {
                    kind: record.kind,
                    actual: payload.shape(),
                })
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.shape() {
            Some(shape) => write!(f, "Handler({shape:?})"),
            None => write!(f, "Handler(Record)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tether_common::EventKind;

    #[test]
    fn test_record_handler_accepts_everything() {
        let handler = Handler::record(|_| {});
        assert!(handler.shape().is_none());
        assert!(handler.accepts(PayloadShape::Sweep));
        assert!(handler.accepts(PayloadShape::UserLog));
    }

    #[test]
    fn test_deliver_unpacks_sweep() {
        let total = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&total);
        let handler = Handler::sweep(move |_, swept, reclaimed| {
            seen.store(swept * 1000 + reclaimed, Ordering::Relaxed);
        });
        let record = EventRecord::new(
            EventKind::SweepDone,
            Timestamp(5),
            Payload::Sweep { swept: 4, reclaimed: 2 },
        );
        handler.deliver(&record).unwrap();
        assert_eq!(total.load(Ordering::Relaxed), 4002);
    }

    #[test]
    fn test_deliver_rejects_mismatched_payload() {
        let handler = Handler::counter(|_, _| {});
        let record = EventRecord::new(EventKind::HeapSize, Timestamp(1), Payload::Bare);
        assert_eq!(
            handler.deliver(&record),
            Err(InterfaceError::WrongPayload {
                kind: EventKind::HeapSize,
                actual: PayloadShape::Bare,
            })
        );
    }
}
