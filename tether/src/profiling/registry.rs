use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use log::{debug, info};
use tether_common::ProfileKind;

use super::records::{BlockProfileRecord, MemProfileRecord, StackRecord};
use super::sampler::{Sampler, StackSource};
use crate::domain::{Address, InterfaceError, UnitId, WorkerId};
use crate::host::clock::Clock;

/// Highest accepted frequency for the periodic profiles
pub const MAX_SAMPLING_HZ: u64 = 10_000;

/// Profile callback; receives an owned batch of records
pub type ProfileCallback<R> = Arc<dyn Fn(Vec<R>) + Send + Sync>;

/// 1-in-N sampling of a stream of occurrences
struct OneInN<R> {
    every: AtomicU64,
    seen: AtomicU64,
    callback: RwLock<Option<ProfileCallback<R>>>,
}

impl<R> Default for OneInN<R> {
    fn default() -> Self {
        Self { every: AtomicU64::new(0), seen: AtomicU64::new(0), callback: RwLock::new(None) }
    }
}

impl<R> OneInN<R> {
    fn set(&self, every: u64, callback: Option<ProfileCallback<R>>) {
        let mut slot = self.callback.write().unwrap_or_else(PoisonError::into_inner);
        *slot = callback;
        self.seen.store(0, Ordering::Relaxed);
        self.every.store(every, Ordering::Release);
    }

    /// Callback to fire if this occurrence is sampled
    fn observe(&self) -> Option<ProfileCallback<R>> {
        let every = self.every.load(Ordering::Acquire);
        if every == 0 {
            return None;
        }
        let n = self.seen.fetch_add(1, Ordering::Relaxed) + 1;
        if n % every != 0 {
            return None;
        }
        self.callback.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Accumulates blocked time; one sample per `rate` nanoseconds
#[derive(Default)]
struct BlockedTime {
    rate: AtomicU64,
    accumulated: Mutex<u64>,
    callback: RwLock<Option<ProfileCallback<BlockProfileRecord>>>,
}

/// A periodic profile: its sampler thread and callback
#[derive(Default)]
struct Periodic {
    sampler: Mutex<Option<Sampler>>,
    callback: RwLock<Option<ProfileCallback<StackRecord>>>,
}

/// Registry of agent profile callbacks
///
/// Each profile family interprets its rate argument in its own unit (see
/// [`ProfileKind::rate_unit`]). A rate of 0 disables the family and drops its
/// callback; registering again replaces the previous callback.
pub struct ProfilingRegistry {
    clock: Arc<Clock>,
    stacks: Arc<dyn StackSource>,
    cpu: Periodic,
    task: Periodic,
    heap: OneInN<MemProfileRecord>,
    worker_creation: OneInN<StackRecord>,
    contention: OneInN<BlockProfileRecord>,
    block: BlockedTime,
    delivered: AtomicU64,
}

impl ProfilingRegistry {
    pub(crate) fn new(clock: Arc<Clock>, stacks: Arc<dyn StackSource>) -> Self {
        Self {
            clock,
            stacks,
            cpu: Periodic::default(),
            task: Periodic::default(),
            heap: OneInN::default(),
            worker_creation: OneInN::default(),
            contention: OneInN::default(),
            block: BlockedTime::default(),
            delivered: AtomicU64::new(0),
        }
    }

    /// Sample the stacks of running units `hz` times per second
    ///
    /// Callbacks run on a dedicated sampler thread.
    ///
    /// # Errors
    /// [`InterfaceError::InvalidRate`] above [`MAX_SAMPLING_HZ`],
    /// [`InterfaceError::SamplerSpawnFailed`] if the thread cannot start
    pub fn register_cpu_profile(
        &self,
        hz: u64,
        callback: impl Fn(Vec<StackRecord>) + Send + Sync + 'static,
    ) -> Result<(), InterfaceError> {
        self.register_periodic(ProfileKind::Cpu, hz, Arc::new(callback))
    }

    /// Snapshot the stacks of every live unit `hz` times per second
    ///
    /// # Errors
    /// Same as [`ProfilingRegistry::register_cpu_profile`]
    pub fn register_task_profile(
        &self,
        hz: u64,
        callback: impl Fn(Vec<StackRecord>) + Send + Sync + 'static,
    ) -> Result<(), InterfaceError> {
        self.register_periodic(ProfileKind::Task, hz, Arc::new(callback))
    }

    /// Sample one in every `n` managed allocations
    ///
    /// Callbacks run on the allocating thread with a batch of one record.
    pub fn register_heap_profile(
        &self,
        n: u64,
        callback: impl Fn(Vec<MemProfileRecord>) + Send + Sync + 'static,
    ) {
        self.heap.set(n, (n > 0).then(|| Arc::new(callback) as ProfileCallback<_>));
        log_rate(ProfileKind::Heap, n);
    }

    /// Sample one in every `n` worker thread creations
    pub fn register_worker_creation_profile(
        &self,
        n: u64,
        callback: impl Fn(Vec<StackRecord>) + Send + Sync + 'static,
    ) {
        self.worker_creation.set(n, (n > 0).then(|| Arc::new(callback) as ProfileCallback<_>));
        log_rate(ProfileKind::WorkerCreation, n);
    }

    /// Sample blocking waits: one record each time `nanos` of blocked time accumulate
    ///
    /// A rate of 1 samples every wait.
    pub fn register_block_profile(
        &self,
        nanos: u64,
        callback: impl Fn(Vec<BlockProfileRecord>) + Send + Sync + 'static,
    ) {
        let mut slot = self.block.callback.write().unwrap_or_else(PoisonError::into_inner);
        *slot = (nanos > 0).then(|| Arc::new(callback) as ProfileCallback<_>);
        *self.block.accumulated.lock().unwrap_or_else(PoisonError::into_inner) = 0;
        self.block.rate.store(nanos, Ordering::Release);
        log_rate(ProfileKind::Block, nanos);
    }

    /// Sample one in every `fraction` lock contentions
    pub fn register_contention_profile(
        &self,
        fraction: u64,
        callback: impl Fn(Vec<BlockProfileRecord>) + Send + Sync + 'static,
    ) {
        self.contention
            .set(fraction, (fraction > 0).then(|| Arc::new(callback) as ProfileCallback<_>));
        log_rate(ProfileKind::Contention, fraction);
    }

    /// Deliver one task profile snapshot now, on the calling thread
    ///
    /// Returns `false` if no task profile callback is registered.
    pub fn snapshot_tasks(&self) -> bool {
        let callback = self.task.callback.read().unwrap_or_else(PoisonError::into_inner).clone();
        let Some(callback) = callback else { return false };
        let records = stack_records(&self.clock, self.stacks.live_stacks());
        self.delivered.fetch_add(1, Ordering::Relaxed);
        callback(records);
        true
    }

    /// Number of batches handed to callbacks on non-sampler threads
    #[must_use]
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    fn register_periodic(
        &self,
        kind: ProfileKind,
        hz: u64,
        callback: ProfileCallback<StackRecord>,
    ) -> Result<(), InterfaceError> {
        if hz > MAX_SAMPLING_HZ {
            return Err(InterfaceError::InvalidRate {
                profile: kind,
                rate: hz,
                max: MAX_SAMPLING_HZ,
            });
        }
        let periodic = match kind {
            ProfileKind::Task => &self.task,
            _ => &self.cpu,
        };

        // Stop the old sampler outside the lock so a sampler replacing its own
        // profile from a callback cannot deadlock
        let previous = periodic.sampler.lock().unwrap_or_else(PoisonError::into_inner).take();
        drop(previous);

        if hz == 0 {
            *periodic.callback.write().unwrap_or_else(PoisonError::into_inner) = None;
            log_rate(kind, 0);
            return Ok(());
        }
        *periodic.callback.write().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::clone(&callback));

        let clock = Arc::clone(&self.clock);
        let stacks = Arc::clone(&self.stacks);
        let running_only = kind == ProfileKind::Cpu;
        let sampler = Sampler::spawn(kind.name(), hz, move || {
            let units =
                if running_only { stacks.running_stacks() } else { stacks.live_stacks() };
            if units.is_empty() {
                return;
            }
            callback(stack_records(&clock, units));
        })
        .map_err(|e| {
            debug!("Failed to spawn {} sampler: {e}", kind.name());
            InterfaceError::SamplerSpawnFailed(kind.name())
        })?;

        *periodic.sampler.lock().unwrap_or_else(PoisonError::into_inner) = Some(sampler);
        log_rate(kind, hz);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Host-side hooks
    // ------------------------------------------------------------------

    pub(crate) fn on_alloc(
        &self,
        unit: Option<UnitId>,
        bytes: u64,
        live_bytes: u64,
        stack: impl FnOnce() -> Vec<Address>,
    ) {
        let Some(callback) = self.heap.observe() else { return };
        let record =
            MemProfileRecord { ts: self.clock.now(), unit, bytes, live_bytes, stack: stack() };
        self.delivered.fetch_add(1, Ordering::Relaxed);
        callback(vec![record]);
    }

    pub(crate) fn on_worker_start(&self, worker: WorkerId, stack: Vec<Address>) {
        let Some(callback) = self.worker_creation.observe() else { return };
        let record = StackRecord { ts: self.clock.now(), unit: None, worker: Some(worker), stack };
        self.delivered.fetch_add(1, Ordering::Relaxed);
        callback(vec![record]);
    }

    pub(crate) fn on_contention(
        &self,
        unit: Option<UnitId>,
        nanos: u64,
        stack: impl FnOnce() -> Vec<Address>,
    ) {
        let Some(callback) = self.contention.observe() else { return };
        let record =
            BlockProfileRecord { ts: self.clock.now(), unit, count: 1, nanos, stack: stack() };
        self.delivered.fetch_add(1, Ordering::Relaxed);
        callback(vec![record]);
    }

    pub(crate) fn on_blocked(
        &self,
        unit: Option<UnitId>,
        nanos: u64,
        stack: impl FnOnce() -> Vec<Address>,
    ) {
        let rate = self.block.rate.load(Ordering::Acquire);
        if rate == 0 {
            return;
        }
        {
            let mut acc = self.block.accumulated.lock().unwrap_or_else(PoisonError::into_inner);
            *acc = acc.saturating_add(nanos.max(1));
            if *acc < rate {
                return;
            }
            *acc %= rate;
        }
        let callback = self.block.callback.read().unwrap_or_else(PoisonError::into_inner).clone();
        let Some(callback) = callback else { return };
        let record =
            BlockProfileRecord { ts: self.clock.now(), unit, count: 1, nanos, stack: stack() };
        self.delivered.fetch_add(1, Ordering::Relaxed);
        callback(vec![record]);
    }

    pub(crate) fn stop_samplers(&self) {
        for periodic in [&self.cpu, &self.task] {
            let sampler = periodic.sampler.lock().unwrap_or_else(PoisonError::into_inner).take();
            drop(sampler);
        }
    }
}

impl Drop for ProfilingRegistry {
    fn drop(&mut self) {
        self.stop_samplers();
    }
}

fn stack_records(
    clock: &Clock,
    units: Vec<(UnitId, Option<WorkerId>, Vec<Address>)>,
) -> Vec<StackRecord> {
    let ts = clock.now();
    units
        .into_iter()
        .map(|(unit, worker, stack)| StackRecord { ts, unit: Some(unit), worker, stack })
        .collect()
}

fn log_rate(kind: ProfileKind, rate: u64) {
    if rate == 0 {
        info!("{} profile disabled", kind.name());
    } else {
        info!("{} profile enabled (rate {rate} {:?})", kind.name(), kind.rate_unit());
    }
}
