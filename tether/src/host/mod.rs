//! # Instrumented host runtime
//!
//! The host is a tokio multi-thread runtime whose tasks (execution units) run
//! inside an instrumenting wrapper. It owns the five agent-facing components
//! and produces every event and profile sample the agent observes.
//!
//! ```text
//! HostBuilder ── register_fn / register_global / register_type
//!     │
//!     ▼ build()
//! Host ── block_on(root) ── runtime workers ── on_thread_start → WorkerStart
//!   │                                       └─ on_thread_stop  → WorkerStop
//!   └── HostHandle ── spawn / spawn_labeled / spawn_timer
//!                  ├─ alloc / collect       (managed heap, reclaimer events)
//!                  └─ user_task / log       (diagnostic events)
//! ```
//!
//! Waiting code reports why it waits through [`tag`], [`sleep`], [`Mutex`],
//! [`blocking`] and [`syscall`]; profile stacks come from [`enter_frame`].

pub(crate) mod annotations;
pub(crate) mod clock;
pub(crate) mod context;
mod heap;
mod instrument;
mod sync;
pub(crate) mod units;

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{debug, info, warn};
use tether_common::EventKind;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

pub use annotations::{Region, UserTask};
pub use heap::{Allocation, HeapStats};
pub use sync::{
    blocking, enter_frame, sleep, syscall, tag, yield_now, FrameGuard, Mutex, Tagged, YieldNow,
};

use self::clock::Clock;
use self::heap::Reclaimer;
use self::instrument::Instrumented;
use self::units::UnitTable;
use crate::agent::failure::FailureHook;
use crate::config::HostConfig;
use crate::domain::{Address, HostError, UserTaskId, WorkerId};
use crate::env::Env;
use crate::events::{EventBus, Payload};
use crate::invoke::{RawFn, ReflectiveInvoker};
use crate::profiling::{ProfilingRegistry, StackSource};
use crate::symbolization::{
    AbiVersion, SymbolIndexBuilder, SymbolResolver, TypeDescriptor, TypeRegistry,
};
use crate::task_local::TaskLocalStore;

/// State shared by the runtime threads, the units and the agent's [`Env`]
pub(crate) struct Shared {
    pub config: HostConfig,
    pub bus: EventBus,
    pub profiler: ProfilingRegistry,
    pub units: Arc<UnitTable>,
    pub task_locals: Arc<TaskLocalStore>,
    pub resolver: SymbolResolver,
    pub invoker: ReflectiveInvoker,
    pub heap: Reclaimer,
    pub annotations: annotations::Annotations,
    pub failure: FailureHook,
    next_worker: AtomicU32,
}

/// Runs on every new runtime thread
///
/// Its address is the leaf frame of worker-creation samples.
fn worker_started(shared: &Shared) {
    let worker = WorkerId(shared.next_worker.fetch_add(1, Ordering::Relaxed));
    context::set_worker(Some(worker));
    shared.bus.emit(EventKind::WorkerStart, Payload::Worker(worker));
    shared.profiler.on_worker_start(worker, vec![worker_started as fn(&Shared) as Address]);
    debug!("{worker} started");
}

fn worker_stopped(shared: &Shared) {
    if let Some(worker) = context::current_worker() {
        shared.bus.emit(EventKind::WorkerStop, Payload::Worker(worker));
        context::set_worker(None);
        debug!("{worker} stopped");
    }
}

/// Collects host functions, globals and types before the host starts
pub struct HostBuilder {
    config: HostConfig,
    symbols: SymbolIndexBuilder,
    types: TypeRegistry,
    invoker: ReflectiveInvoker,
}

impl HostBuilder {
    #[must_use]
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            symbols: SymbolIndexBuilder::new(),
            types: TypeRegistry::new(),
            invoker: ReflectiveInvoker::new(),
        }
    }

    /// Make `func` resolvable and reflectively callable under `name`
    ///
    /// `frame_size` is the number of bytes its argument frame needs.
    pub fn register_fn(&mut self, name: &str, func: RawFn, frame_size: usize) -> &mut Self {
        let address = self.invoker.register(name, func, frame_size);
        self.symbols.function(name, address, 0, AbiVersion::FRAME_V1);
        self
    }

    /// Make a host global resolvable by name
    pub fn register_global<T: Sync>(&mut self, name: &str, value: &'static T) -> &mut Self {
        let address = std::ptr::from_ref(value) as Address;
        self.symbols.global(name, address, std::mem::size_of::<T>());
        self
    }

    /// Give `T` a descriptor with fields and methods
    pub fn register_type<T: 'static>(&mut self, descriptor: TypeDescriptor) -> &mut Self {
        self.types.register::<T>(descriptor);
        self
    }

    /// Add the symbols of an ELF file, shifted by `bias`
    ///
    /// # Errors
    /// Returns [`HostError::SymbolLoadFailed`] if the file cannot be read or parsed
    pub fn load_elf(&mut self, path: &Path, bias: Address) -> Result<usize, HostError> {
        self.symbols.load_elf(path, bias).map_err(|e| HostError::SymbolLoadFailed(format!("{e:#}")))
    }

    /// Start the runtime
    ///
    /// # Errors
    /// Returns [`HostError::InvalidConfig`] for a configuration with no workers
    /// and [`HostError::RuntimeBuildFailed`] if tokio cannot start its threads
    pub fn build(mut self) -> Result<Host, HostError> {
        if self.config.workers == 0 {
            return Err(HostError::InvalidConfig("workers must be at least 1".to_string()));
        }
        let entry = worker_started as fn(&Shared) as Address;
        self.symbols.function("tether::host::worker_started", entry, 0, AbiVersion::PLATFORM);

        let mut dwarf = None;
        if self.config.exe_symbols {
            match self.symbols.load_current_exe() {
                Ok((_, frames)) => dwarf = frames,
                Err(e) => warn!("Executable symbols unavailable: {e:#}"),
            }
        }

        let mut resolver =
            SymbolResolver::new(Arc::new(self.symbols.build()), Arc::new(self.types));
        if let Some((symbolizer, bias)) = dwarf {
            resolver = resolver.with_dwarf(symbolizer, bias);
        }

        let clock = Arc::new(Clock::new());
        let units = Arc::new(UnitTable::default());
        let stacks: Arc<dyn StackSource> = Arc::clone(&units) as _;
        let shared = Arc::new(Shared {
            bus: EventBus::new(Arc::clone(&clock)),
            profiler: ProfilingRegistry::new(clock, stacks),
            units,
            task_locals: Arc::new(TaskLocalStore::new()),
            resolver,
            invoker: self.invoker,
            heap: Reclaimer::new(self.config.reclaim_percent, self.config.min_heap_goal),
            annotations: annotations::Annotations::default(),
            failure: FailureHook::default(),
            next_worker: AtomicU32::new(0),
            config: self.config,
        });

        // Weak: the bus lives inside `Shared`
        let observed = Arc::downgrade(&shared);
        shared.bus.set_registration_observer(move |kind| {
            if let Some(shared) = Weak::upgrade(&observed) {
                instrument::announce_waiting(&shared, kind);
            }
        });

        let on_start = Arc::clone(&shared);
        let on_stop = Arc::clone(&shared);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(shared.config.workers)
            .thread_name(shared.config.thread_name.clone())
            .enable_all()
            .on_thread_start(move || worker_started(&on_start))
            .on_thread_stop(move || worker_stopped(&on_stop))
            .build()
            .map_err(HostError::RuntimeBuildFailed)?;

        info!(
            "Host started: {} workers, {} symbols, {} invocable functions",
            shared.config.workers,
            shared.resolver.symbol_count(),
            shared.invoker.len()
        );

        let handle = HostHandle { runtime: runtime.handle().clone(), shared };
        Ok(Host { runtime: Some(runtime), handle })
    }
}

/// A running instrumented host
pub struct Host {
    runtime: Option<Runtime>,
    handle: HostHandle,
}

impl Host {
    #[must_use]
    pub fn builder(config: HostConfig) -> HostBuilder {
        HostBuilder::new(config)
    }

    /// The agent-facing environment
    #[must_use]
    pub fn env(&self) -> Env {
        self.handle.env()
    }

    #[must_use]
    pub fn handle(&self) -> HostHandle {
        self.handle.clone()
    }

    /// Run `future` to completion as the root unit, labeled `main`
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        let root =
            Instrumented::new(Arc::clone(&self.handle.shared), Some(Arc::from("main")), future);
        match &self.runtime {
            Some(runtime) => runtime.block_on(root),
            None => self.handle.runtime.block_on(root),
        }
    }

    /// Stop the samplers and the runtime, waiting up to `timeout` for workers
    pub fn shutdown(mut self, timeout: Duration) {
        self.handle.shared.profiler.stop_samplers();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(timeout);
        }
        info!("Host stopped after {} units", self.handle.shared.units.created_count());
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.handle.shared.profiler.stop_samplers();
    }
}

/// Cloneable access to a running host, usable from any thread
#[derive(Clone)]
pub struct HostHandle {
    runtime: tokio::runtime::Handle,
    shared: Arc<Shared>,
}

impl HostHandle {
    #[must_use]
    pub fn env(&self) -> Env {
        Env::new(Arc::clone(&self.shared))
    }

    /// Spawn an unlabeled unit
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(Instrumented::new(Arc::clone(&self.shared), None, future))
    }

    /// Spawn a unit whose starts are reported with `label`
    pub fn spawn_labeled<F>(&self, label: &str, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let unit = Instrumented::new(Arc::clone(&self.shared), Some(Arc::from(label)), future);
        debug!("Spawning {} as `{label}`", unit.unit());
        self.runtime.spawn(unit)
    }

    /// Spawn a unit that runs `future` after `delay`
    ///
    /// Reported as `TaskCreate` followed by `TimerTask`.
    pub fn spawn_timer<F>(&self, delay: Duration, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let unit = Instrumented::new(Arc::clone(&self.shared), None, async move {
            sleep(delay).await;
            future.await
        });
        unit.announce(EventKind::TimerTask);
        self.runtime.spawn(unit)
    }

    /// Allocate `bytes` of managed memory
    ///
    /// May run a reclamation cycle on the calling thread.
    pub fn alloc(&self, bytes: u64) -> Allocation {
        heap::allocate(&self.shared, bytes)
    }

    /// Run a reclamation cycle now
    pub fn collect(&self) {
        heap::collect(&self.shared);
    }

    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.shared.heap.stats()
    }

    /// Publish a host-defined event
    pub fn emit(&self, kind: EventKind, payload: Payload) {
        self.shared.bus.emit(kind, payload);
    }

    /// Open a user task, optionally nested under `parent`
    pub fn user_task(&self, name: &str, parent: Option<&UserTask>) -> UserTask {
        UserTask::create(&self.shared, name, parent)
    }

    /// Log a key/value message outside any user task
    pub fn log(&self, key: &str, value: &str) {
        annotations::log_message(&self.shared, UserTaskId::NONE, key, value);
    }

    /// Units currently alive
    #[must_use]
    pub fn live_units(&self) -> usize {
        self.shared.units.live_count()
    }

    /// Units created since start
    #[must_use]
    pub fn created_units(&self) -> u64 {
        self.shared.units.created_count()
    }
}
