//! Demo workload for the `tether` binary
//!
//! A small producer/consumer pipeline that touches every instrumented path of
//! the host: channel waits, lock contention, sleeps, timers, blocking calls,
//! managed allocations and user annotations. Its hot functions are registered
//! with the host so profile stacks resolve to readable names.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};
use tether_common::BlockReason;
use tokio::sync::mpsc;

use crate::domain::Address;
use crate::host::{self, Allocation, HostBuilder, HostHandle};
use crate::invoke::{frame, RawFn};

pub const CRUNCH: &str = "workload::crunch";
pub const PRODUCE: &str = "workload::produce";
pub const CHECKSUM: &str = "workload::checksum";
pub const EXPLODE: &str = "workload::explode";

/// Frame of [`CHECKSUM`] and [`CRUNCH`]: input at 0, result at 8
pub const FRAME_SIZE: usize = 16;

const ALLOC_BYTES: u64 = 4096;
const LIVE_ALLOCATIONS: usize = 8;

#[inline(never)]
fn crunch(frame: &mut [u8]) {
    let rounds = frame::read_u64(frame, 0);
    let mut acc = 0u64;
    for i in 0..rounds {
        acc = acc.wrapping_mul(31).wrapping_add(std::hint::black_box(i));
    }
    frame::write_u64(frame, 8, acc);
}

#[inline(never)]
fn produce(frame: &mut [u8]) {
    let seq = frame::read_u64(frame, 0);
    frame::write_u64(frame, 8, seq.rotate_left(7) ^ 0x9e37_79b9);
}

#[inline(never)]
fn checksum(frame: &mut [u8]) {
    let value = frame::read_u64(frame, 0);
    frame::write_u64(frame, 8, value.count_ones().into());
}

fn explode(frame: &mut [u8]) {
    let code = frame::read_u64(frame, 0);
    panic!("workload::explode called with {code}");
}

/// Register the workload's functions with the host
pub fn register(builder: &mut HostBuilder) {
    let functions: [(&str, RawFn); 4] =
        [(CRUNCH, crunch), (PRODUCE, produce), (CHECKSUM, checksum), (EXPLODE, explode)];
    for (name, func) in functions {
        builder.register_fn(name, func, FRAME_SIZE);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkloadOptions {
    /// Producer units; one consumer drains them all
    pub units: usize,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkloadSummary {
    pub produced: u64,
    pub consumed: u64,
    /// Running total kept behind the contended lock
    pub total: u64,
    pub ticks: u64,
}

fn call_raw(func: RawFn, input: u64) -> u64 {
    let _frame = host::enter_frame(func as Address);
    let mut buf = [0u8; FRAME_SIZE];
    frame::write_u64(&mut buf, 0, input);
    func(&mut buf);
    frame::read_u64(&buf, 8)
}

/// Run the pipeline until `options.duration` has passed and every unit finished
pub async fn run(handle: HostHandle, options: WorkloadOptions) -> WorkloadSummary {
    let job = handle.user_task("workload", None);
    let deadline = Instant::now() + options.duration;
    let (tx, mut rx) = mpsc::channel::<u64>(16);
    let total = Arc::new(host::Mutex::new(0u64));
    let produced = Arc::new(AtomicU64::new(0));
    let ticks = Arc::new(AtomicU64::new(0));

    let setup = job.region("spawn");
    let mut producers = Vec::with_capacity(options.units);
    for id in 0..options.units.max(1) {
        let tx = tx.clone();
        let handle_for_unit = handle.clone();
        let produced = Arc::clone(&produced);
        producers.push(handle.spawn_labeled(&format!("producer-{id}"), async move {
            let mut live: Vec<Allocation> = Vec::with_capacity(LIVE_ALLOCATIONS);
            let mut seq = 0u64;
            while Instant::now() < deadline {
                let item = call_raw(produce, seq);
                if live.len() == LIVE_ALLOCATIONS {
                    drop(live.remove(0));
                }
                live.push(handle_for_unit.alloc(ALLOC_BYTES));
                if host::tag(BlockReason::Send, tx.send(item)).await.is_err() {
                    break;
                }
                seq += 1;
                produced.fetch_add(1, Ordering::Relaxed);
                if seq % 8 == 0 {
                    host::yield_now().await;
                }
            }
            debug!("producer-{id} done after {seq} items");
        }));
    }
    drop(tx);

    let consumer_total = Arc::clone(&total);
    let consumer = handle.spawn_labeled("consumer", async move {
        let mut consumed = 0u64;
        while let Some(item) = host::tag(BlockReason::Receive, rx.recv()).await {
            let digest = call_raw(crunch, 2_000 + item % 512);
            let mut running = consumer_total.lock().await;
            *running = running.wrapping_add(digest);
            drop(running);
            consumed += 1;
        }
        consumed
    });

    // Contends with the consumer for the running total
    let auditor_total = Arc::clone(&total);
    let auditor = handle.spawn(async move {
        while Instant::now() < deadline {
            {
                let guard = auditor_total.lock().await;
                host::syscall(|| std::hint::black_box(std::process::id()));
                drop(guard);
            }
            host::sleep(Duration::from_millis(2)).await;
        }
    });

    let ticker = {
        let ticks = Arc::clone(&ticks);
        handle.spawn(async move {
            while Instant::now() < deadline {
                tick(&ticks).await;
                host::blocking(|| std::thread::sleep(Duration::from_millis(1)));
            }
        })
    };
    let timer_ticks = Arc::clone(&ticks);
    let timer = handle.spawn_timer(options.duration / 2, async move {
        timer_ticks.fetch_add(1, Ordering::Relaxed);
    });
    drop(setup);

    for producer in producers {
        let _ = producer.await;
    }
    let consumed = consumer.await.unwrap_or(0);
    let _ = auditor.await;
    let _ = ticker.await;
    let _ = timer.await;

    handle.collect();
    let total = *total.lock().await;
    let summary = WorkloadSummary {
        produced: produced.load(Ordering::Relaxed),
        consumed,
        total,
        ticks: ticks.load(Ordering::Relaxed),
    };
    job.log("summary", &format!("{summary:?}"));
    info!("Workload finished: {} produced, {} consumed", summary.produced, summary.consumed);
    summary
}

async fn tick(ticks: &AtomicU64) {
    host::sleep(Duration::from_millis(3)).await;
    ticks.fetch_add(1, Ordering::Relaxed);
}
