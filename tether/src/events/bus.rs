use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, trace, warn};
use tether_common::{EventKind, EVENT_KIND_COUNT};

use super::{EventRecord, Handler, Payload};
use crate::domain::InterfaceError;
use crate::host::clock::Clock;

/// Outcome of a successful [`EventBus::register_handler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub kind: EventKind,
    /// Whether an earlier handler for the same kind was replaced
    pub replaced: bool,
}

type RegistrationObserver = Arc<dyn Fn(EventKind) + Send + Sync>;

#[derive(Default)]
struct Slot {
    /// Fast-path check, mirrors `handler.is_some()`
    enabled: AtomicBool,
    handler: RwLock<Option<Arc<Handler>>>,
}

/// One handler slot per event kind
pub struct EventBus {
    clock: Arc<Clock>,
    slots: [Slot; EVENT_KIND_COUNT],
    observer: RwLock<Option<RegistrationObserver>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl EventBus {
    #[must_use]
    pub(crate) fn new(clock: Arc<Clock>) -> Self {
        Self {
            clock,
            slots: std::array::from_fn(|_| Slot::default()),
            observer: RwLock::new(None),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Subscribe `handler` to `kind`, replacing any earlier handler
    ///
    /// # Errors
    /// Returns [`InterfaceError::Incompatible`] if `handler` does not accept the
    /// payload shape of `kind`. No slot is modified in that case.
    pub fn register_handler(
        &self,
        kind: EventKind,
        handler: Handler,
    ) -> Result<Registration, InterfaceError> {
        let expected = kind.shape();
        if !handler.accepts(expected) {
            let actual = handler.shape().unwrap_or(expected);
            return Err(InterfaceError::Incompatible { kind, expected, actual });
        }

        let slot = &self.slots[kind.index()];
        let replaced = {
            let mut guard = slot.handler.write().unwrap_or_else(PoisonError::into_inner);
            let previous = guard.replace(Arc::new(handler));
            slot.enabled.store(true, Ordering::Release);
            previous.is_some()
        };
        debug!("Handler registered for {} (replaced: {replaced})", kind.name());

        let observer = self.observer.read().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(observer) = observer {
            observer(kind);
        }

        Ok(Registration { kind, replaced })
    }

    /// Remove the handler for `kind`; returns whether one was registered
    pub fn unregister(&self, kind: EventKind) -> bool {
        let slot = &self.slots[kind.index()];
        let mut guard = slot.handler.write().unwrap_or_else(PoisonError::into_inner);
        slot.enabled.store(false, Ordering::Release);
        let removed = guard.take().is_some();
        if removed {
            debug!("Handler removed for {}", kind.name());
        }
        removed
    }

    #[must_use]
    pub fn is_registered(&self, kind: EventKind) -> bool {
        self.slots[kind.index()].enabled.load(Ordering::Acquire)
    }

    /// Timestamp and deliver an occurrence of `kind`
    ///
    /// `payload` is only built when a handler is registered.
    pub fn emit_with(&self, kind: EventKind, payload: impl FnOnce() -> Payload) {
        if !self.is_registered(kind) {
            return;
        }
        let record = EventRecord::new(kind, self.clock.now(), payload());
        self.publish(&record);
    }

    /// Timestamp and deliver an occurrence of `kind`
    pub fn emit(&self, kind: EventKind, payload: Payload) {
        self.emit_with(kind, || payload);
    }

    /// Deliver an already timestamped record
    ///
    /// A record whose payload does not match its kind is dropped with a warning.
    pub fn publish(&self, record: &EventRecord) {
        let slot = &self.slots[record.kind.index()];
        if !slot.enabled.load(Ordering::Acquire) {
            return;
        }
        // Clone out of the lock so a handler may re-register or unregister
        let handler = slot.handler.read().unwrap_or_else(PoisonError::into_inner).clone();
        let Some(handler) = handler else { return };

        trace!("Delivering {} at {}", record.kind.name(), record.ts.0);
        match handler.deliver(record) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Dropped event: {e}");
            }
        }
    }

    /// Called after every successful registration, outside the slot lock
    pub(crate) fn set_registration_observer(
        &self,
        observer: impl Fn(EventKind) + Send + Sync + 'static,
    ) {
        *self.observer.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(observer));
    }

    /// Kinds that currently have a handler
    #[must_use]
    pub fn registered_kinds(&self) -> Vec<EventKind> {
        EventKind::ALL.into_iter().filter(|k| self.is_registered(*k)).collect()
    }

    /// Number of events handed to handlers so far
    #[must_use]
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Number of events dropped because their payload did not match the kind
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn clock(&self) -> &Arc<Clock> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Timestamp, UnitId};
    use std::sync::Mutex;
    use tether_common::PayloadShape;

    fn bus() -> EventBus {
        EventBus::new(Arc::new(Clock::new()))
    }

    #[test]
    fn test_incompatible_registration_leaves_slots_untouched() {
        let bus = bus();
        bus.register_handler(EventKind::TaskCreate, Handler::unit(|_, _| {})).unwrap();

        let err = bus
            .register_handler(EventKind::SweepDone, Handler::unit(|_, _| {}))
            .unwrap_err();
        assert_eq!(
            err,
            InterfaceError::Incompatible {
                kind: EventKind::SweepDone,
                expected: PayloadShape::Sweep,
                actual: PayloadShape::Unit,
            }
        );
        assert!(!bus.is_registered(EventKind::SweepDone));
        assert!(bus.is_registered(EventKind::TaskCreate));
    }

    #[test]
    fn test_reregistration_replaces() {
        let bus = bus();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        let handler = Handler::counter(move |_, v| first.lock().unwrap().push(("first", v)));
        let reg = bus.register_handler(EventKind::HeapSize, handler).unwrap();
        assert!(!reg.replaced);

        let second = Arc::clone(&seen);
        let handler = Handler::counter(move |_, v| second.lock().unwrap().push(("second", v)));
        let reg = bus.register_handler(EventKind::HeapSize, handler).unwrap();
        assert!(reg.replaced);

        bus.emit(EventKind::HeapSize, Payload::Counter(64));
        assert_eq!(*seen.lock().unwrap(), vec![("second", 64)]);
    }

    #[test]
    fn test_unregister_stops_delivery() {
        let bus = bus();
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        bus.register_handler(EventKind::ReclaimStart, Handler::bare(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        }))
        .unwrap();

        bus.emit(EventKind::ReclaimStart, Payload::Bare);
        assert!(bus.unregister(EventKind::ReclaimStart));
        assert!(!bus.unregister(EventKind::ReclaimStart));
        bus.emit(EventKind::ReclaimStart, Payload::Bare);
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_wrong_payload_is_dropped() {
        let bus = bus();
        bus.register_handler(EventKind::TaskStart, Handler::unit(|_, _| panic!("must not run")))
            .unwrap();
        bus.publish(&EventRecord::new(EventKind::TaskStart, Timestamp(1), Payload::Counter(3)));
        assert_eq!(bus.dropped_count(), 1);
        assert_eq!(bus.delivered_count(), 0);
    }

    #[test]
    fn test_unregistered_kind_never_builds_payload() {
        let bus = bus();
        bus.emit_with(EventKind::TaskEnd, || panic!("payload built for a disabled kind"));
    }

    #[test]
    fn test_record_handler_and_observer() {
        let bus = bus();
        let observed = Arc::new(Mutex::new(Vec::new()));
        let o = Arc::clone(&observed);
        bus.set_registration_observer(move |kind| o.lock().unwrap().push(kind));

        let records = Arc::new(Mutex::new(Vec::new()));
        let r = Arc::clone(&records);
        let handler = Handler::record(move |rec| r.lock().unwrap().push(rec.clone()));
        bus.register_handler(EventKind::TaskWaiting, handler).unwrap();

        let unit = UnitId::from_raw(9).unwrap();
        bus.emit(EventKind::TaskWaiting, Payload::Unit(unit));

        assert_eq!(*observed.lock().unwrap(), vec![EventKind::TaskWaiting]);
        let records = records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].unit(), Some(unit));
        assert_eq!(bus.registered_kinds(), vec![EventKind::TaskWaiting]);
    }
}
