//! Recording agent
//!
//! Subscribes to every event kind and to the profiles it was configured with,
//! and keeps everything in memory for export and analysis once the host is
//! done.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};
use tether_common::EventKind;

use super::failure::FailureReport;
use super::Agent;
use crate::env::Env;
use crate::events::{EventRecord, Handler};
use crate::profiling::{BlockProfileRecord, MemProfileRecord, StackRecord};

#[derive(Debug, Default)]
struct Recording {
    events: Vec<EventRecord>,
    cpu: Vec<StackRecord>,
    tasks: Vec<StackRecord>,
    workers: Vec<StackRecord>,
    heap: Vec<MemProfileRecord>,
    block: Vec<BlockProfileRecord>,
    contention: Vec<BlockProfileRecord>,
    failure: Option<FailureReport>,
    exit_code: Option<i32>,
}

/// Shared view of what a [`RecordingAgent`] collected
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    inner: Arc<Mutex<Recording>>,
}

impl Recorder {
    fn lock(&self) -> MutexGuard<'_, Recording> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Events in delivery order
    #[must_use]
    pub fn events(&self) -> Vec<EventRecord> {
        self.lock().events.clone()
    }

    #[must_use]
    pub fn event_count(&self) -> usize {
        self.lock().events.len()
    }

    /// Number of recorded events per kind
    #[must_use]
    pub fn counts(&self) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for record in &self.lock().events {
            *counts.entry(record.kind).or_insert(0) += 1;
        }
        counts
    }

    #[must_use]
    pub fn cpu_samples(&self) -> Vec<StackRecord> {
        self.lock().cpu.clone()
    }

    #[must_use]
    pub fn task_samples(&self) -> Vec<StackRecord> {
        self.lock().tasks.clone()
    }

    #[must_use]
    pub fn worker_samples(&self) -> Vec<StackRecord> {
        self.lock().workers.clone()
    }

    #[must_use]
    pub fn heap_samples(&self) -> Vec<MemProfileRecord> {
        self.lock().heap.clone()
    }

    #[must_use]
    pub fn block_samples(&self) -> Vec<BlockProfileRecord> {
        self.lock().block.clone()
    }

    #[must_use]
    pub fn contention_samples(&self) -> Vec<BlockProfileRecord> {
        self.lock().contention.clone()
    }

    /// Report handed to the unhandled-failure handler, if it fired
    #[must_use]
    pub fn failure(&self) -> Option<FailureReport> {
        self.lock().failure.clone()
    }

    /// Exit code passed to `shutdown`, if it was called
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.lock().exit_code
    }
}

/// Profile rates a [`RecordingAgent`] registers; 0 leaves a profile off
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileRates {
    pub cpu_hz: u64,
    pub task_hz: u64,
    pub heap_one_in: u64,
    pub worker_one_in: u64,
    pub block_nanos: u64,
    pub contention_one_in: u64,
}

/// Agent that records everything it is told
#[derive(Debug, Default)]
pub struct RecordingAgent {
    recorder: Recorder,
    rates: ProfileRates,
}

impl RecordingAgent {
    #[must_use]
    pub fn new(rates: ProfileRates) -> Self {
        Self { recorder: Recorder::default(), rates }
    }

    /// Handle that stays valid after the agent is moved into a session
    #[must_use]
    pub fn recorder(&self) -> Recorder {
        self.recorder.clone()
    }

    fn register_profiles(&self, env: &Env) {
        let profiler = env.profiler();
        let rates = self.rates;

        if rates.cpu_hz > 0 {
            let rec = self.recorder.clone();
            if let Err(e) = profiler
                .register_cpu_profile(rates.cpu_hz, move |batch| rec.lock().cpu.extend(batch))
            {
                warn!("CPU profile not registered: {e}");
            }
        }
        if rates.task_hz > 0 {
            let rec = self.recorder.clone();
            if let Err(e) = profiler
                .register_task_profile(rates.task_hz, move |batch| rec.lock().tasks.extend(batch))
            {
                warn!("Task profile not registered: {e}");
            }
        }
        if rates.heap_one_in > 0 {
            let rec = self.recorder.clone();
            profiler.register_heap_profile(rates.heap_one_in, move |batch| {
                rec.lock().heap.extend(batch);
            });
        }
        if rates.worker_one_in > 0 {
            let rec = self.recorder.clone();
            profiler.register_worker_creation_profile(rates.worker_one_in, move |batch| {
                rec.lock().workers.extend(batch);
            });
        }
        if rates.block_nanos > 0 {
            let rec = self.recorder.clone();
            profiler.register_block_profile(rates.block_nanos, move |batch| {
                rec.lock().block.extend(batch);
            });
        }
        if rates.contention_one_in > 0 {
            let rec = self.recorder.clone();
            profiler.register_contention_profile(rates.contention_one_in, move |batch| {
                rec.lock().contention.extend(batch);
            });
        }
    }
}

impl Agent for RecordingAgent {
    fn initialize(&mut self, env: &Env) {
        for kind in EventKind::ALL {
            let rec = self.recorder.clone();
            let handler = Handler::record(move |record| rec.lock().events.push(record.clone()));
            if let Err(e) = env.events().register_handler(kind, handler) {
                warn!("Not recording {}: {e}", kind.name());
            }
        }
        self.register_profiles(env);

        let rec = self.recorder.clone();
        env.register_unhandled_failure_handler(move |report| {
            rec.lock().failure = Some(report.clone());
        });
        debug!("Recording agent initialized");
    }

    fn shutdown(&mut self, exit_code: i32) {
        self.recorder.lock().exit_code = Some(exit_code);
    }
}
