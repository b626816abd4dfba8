//! Panic capture and containment
//!
//! A process-wide panic hook records the message and location of every panic
//! in a thread-local slot before unwinding starts. Code that catches the unwind
//! turns that record into a [`FailureReport`].
//!
//! Inside a containment scope ([`contain`]) the hook stays silent, so a
//! recovered panic leaves no trace on stderr and never reaches the
//! unhandled-failure handler.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once, PoisonError, RwLock};

use log::debug;

thread_local! {
    static CONTAINMENT_DEPTH: Cell<u32> = const { Cell::new(0) };
    static LAST_PANIC: RefCell<Option<FailureReport>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Description of a panic, as handed to failure handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub message: String,
    /// `file:line:column`, when the panic carried a location
    pub location: Option<String>,
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{} at {loc}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for FailureReport {}

/// Install the recording hook in front of whatever hook is already set
///
/// Idempotent.
pub fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let report = FailureReport {
                message: payload_message(info.payload()),
                location: info
                    .location()
                    .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column())),
            };
            LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(report));

            if CONTAINMENT_DEPTH.with(Cell::get) == 0 {
                previous(info);
            }
        }));
        debug!("Panic hook installed");
    });
}

/// Extract the message of a panic payload
#[must_use]
pub fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

/// Whether the current thread is inside a containment scope
#[must_use]
pub fn is_contained() -> bool {
    CONTAINMENT_DEPTH.with(Cell::get) > 0
}

/// Run `f`, turning a panic into `Err` without printing it
///
/// # Errors
/// Returns the report of the panic that unwound out of `f`
pub fn contain<R>(f: impl FnOnce() -> R) -> Result<R, FailureReport> {
    CONTAINMENT_DEPTH.with(|d| d.set(d.get() + 1));
    let _depth = DepthGuard;
    capture(f)
}

struct DepthGuard;

impl Drop for DepthGuard {
    fn drop(&mut self) {
        CONTAINMENT_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// Run `f`, turning a panic into `Err`
///
/// Unlike [`contain`], the panic is still reported by the previous hook.
///
/// # Errors
/// Returns the report of the panic that unwound out of `f`
pub fn capture<R>(f: impl FnOnce() -> R) -> Result<R, FailureReport> {
    install_panic_hook();
    LAST_PANIC.with(|slot| slot.borrow_mut().take());

    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        LAST_PANIC.with(|slot| slot.borrow_mut().take()).unwrap_or_else(|| FailureReport {
            message: payload_message(payload.as_ref()),
            location: None,
        })
    })
}

pub(crate) type FailureHandler = Arc<dyn Fn(&FailureReport) + Send + Sync>;

/// The agent's unhandled-failure handler; fires at most once per host
#[derive(Default)]
pub(crate) struct FailureHook {
    handler: RwLock<Option<FailureHandler>>,
    fired: AtomicBool,
}

impl FailureHook {
    pub(crate) fn set(&self, handler: FailureHandler) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Hand `report` to the handler unless it already fired
    ///
    /// Returns whether the handler ran. A failure seen before any handler is
    /// registered does not use up the single delivery.
    pub(crate) fn fire(&self, report: &FailureReport) -> bool {
        let handler = self.handler.read().unwrap_or_else(PoisonError::into_inner).clone();
        let Some(handler) = handler else { return false };
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        handler(report);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_hook_fires_once() {
        let hook = FailureHook::default();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        hook.set(Arc::new(move |r: &FailureReport| sink.lock().unwrap().push(r.message.clone())));

        let report = FailureReport { message: "fatal".to_string(), location: None };
        assert!(hook.fire(&report));
        assert!(!hook.fire(&report));
        assert_eq!(*seen.lock().unwrap(), vec!["fatal".to_string()]);
    }

    #[test]
    fn test_failure_before_registration_keeps_hook_armed() {
        let hook = FailureHook::default();
        let report = FailureReport { message: "early".to_string(), location: None };
        assert!(!hook.fire(&report));

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        hook.set(Arc::new(move |r: &FailureReport| sink.lock().unwrap().push(r.message.clone())));
        let report = FailureReport { message: "late".to_string(), location: None };
        assert!(hook.fire(&report));
        assert!(!hook.fire(&report));
        assert_eq!(*seen.lock().unwrap(), vec!["late".to_string()]);
    }

    #[test]
    fn test_contain_returns_value() {
        assert_eq!(contain(|| 7).unwrap(), 7);
        assert!(!is_contained());
    }

    #[test]
    fn test_contain_reports_message_and_location() {
        let report = contain(|| panic!("bad frame {}", 3)).unwrap_err();
        assert_eq!(report.message, "bad frame 3");
        assert!(report.location.unwrap().contains("failure.rs"));
        assert!(!is_contained());
    }

    #[test]
    fn test_nested_containment_unwinds_depth() {
        let outer = contain(|| {
            let inner = contain(|| panic!("inner"));
            assert!(is_contained());
            inner.unwrap_err().message
        });
        assert_eq!(outer.unwrap(), "inner");
        assert!(!is_contained());
    }

    #[test]
    fn test_payload_message_variants() {
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(payload_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(5u8);
        assert_eq!(payload_message(boxed.as_ref()), "Box<dyn Any>");
    }
}
