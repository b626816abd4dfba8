//! The agent's handle to a running host

use std::sync::Arc;

use tether_common::INTERFACE_VERSION;

use crate::agent::failure::FailureReport;
use crate::domain::{UnitId, UnitInfo};
use crate::events::EventBus;
use crate::host::{context, Shared};
use crate::invoke::ReflectiveInvoker;
use crate::profiling::ProfilingRegistry;
use crate::symbolization::SymbolResolver;
use crate::task_local::TaskLocalStore;

/// Build string of this host; agents built for another host are rejected
pub const HOST_BUILD: &str = concat!(env!("CARGO_PKG_NAME"), "-", env!("CARGO_PKG_VERSION"));

/// Everything an agent may touch
///
/// Cheap to clone and valid for the whole life of the host. Nothing reachable
/// from here points into host structures.
#[derive(Clone)]
pub struct Env {
    shared: Arc<Shared>,
}

impl Env {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    #[must_use]
    pub fn symbols(&self) -> &SymbolResolver {
        &self.shared.resolver
    }

    #[must_use]
    pub fn task_local(&self) -> &TaskLocalStore {
        &self.shared.task_locals
    }

    #[must_use]
    pub fn invoker(&self) -> &ReflectiveInvoker {
        &self.shared.invoker
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.shared.bus
    }

    #[must_use]
    pub fn profiler(&self) -> &ProfilingRegistry {
        &self.shared.profiler
    }

    /// Install the handler called once, synchronously, when the host is about
    /// to exit on an unrecovered failure
    ///
    /// A later registration replaces an earlier one.
    pub fn register_unhandled_failure_handler(
        &self,
        handler: impl Fn(&FailureReport) + Send + Sync + 'static,
    ) {
        self.shared.failure.set(Arc::new(handler));
    }

    /// Unit being polled on the calling thread, if any
    #[must_use]
    pub fn current_unit(&self) -> Option<UnitId> {
        context::current_unit()
    }

    /// State and label of a live unit
    #[must_use]
    pub fn unit_info(&self, unit: UnitId) -> Option<UnitInfo> {
        self.shared.units.info(unit)
    }

    #[must_use]
    pub fn interface_version(&self) -> &'static str {
        INTERFACE_VERSION
    }

    #[must_use]
    pub fn host_version(&self) -> &'static str {
        HOST_BUILD
    }

    pub(crate) fn fire_failure(&self, report: &FailureReport) -> bool {
        self.shared.failure.fire(report)
    }
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env")
            .field("interface", &INTERFACE_VERSION)
            .field("host", &HOST_BUILD)
            .field("live_units", &self.shared.units.live_count())
            .finish_non_exhaustive()
    }
}
