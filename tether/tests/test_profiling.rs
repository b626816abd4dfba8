use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tether::domain::{InterfaceError, UnitId};
use tether::host::{self, Host};
use tether::invoke::frame;
use tether::profiling::{BlockProfileRecord, MemProfileRecord, StackRecord, MAX_SAMPLING_HZ};
use tether::{HostBuilder, HostConfig};
use tether_common::{BlockReason, ProfileKind};

const SPIN: &str = "profiling_test::spin";

fn spin(buf: &mut [u8]) {
    let rounds = frame::read_u64(buf, 0);
    let mut acc = 0u64;
    for i in 0..rounds {
        acc = acc.wrapping_add(std::hint::black_box(i));
    }
    frame::write_u64(buf, 8, acc);
}

fn test_host() -> Host {
    let mut builder =
        HostBuilder::new(HostConfig::default().with_workers(2).with_exe_symbols(false));
    builder.register_fn(SPIN, spin, 16);
    builder.build().expect("Failed to build host")
}

fn collector<R: Send + 'static>() -> (Arc<Mutex<Vec<R>>>, impl Fn(Vec<R>) + Send + Sync + 'static) {
    let samples = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&samples);
    (samples, move |batch: Vec<R>| sink.lock().unwrap().extend(batch))
}

#[test]
fn test_heap_profile_samples_one_in_n() {
    let host = test_host();
    let (samples, callback) = collector::<MemProfileRecord>();
    host.env().profiler().register_heap_profile(4, callback);

    let handle = host.handle();
    let (root, live) = host.block_on(async move {
        let root = handle.env().current_unit().unwrap();
        let live: Vec<_> = (0..40).map(|_| handle.alloc(64)).collect();
        (root, live)
    });

    let samples = samples.lock().unwrap();
    assert_eq!(samples.len(), 10);
    assert!(samples.iter().all(|s| s.bytes == 64 && s.unit == Some(root)));
    // Every fourth allocation: live bytes at 4, 8, ... allocations
    assert_eq!(samples[0].live_bytes, 4 * 64);
    assert_eq!(samples[9].live_bytes, 40 * 64);
    drop(live);
}

#[test]
fn test_heap_samples_outside_units_have_no_owner() {
    let host = test_host();
    let (samples, callback) = collector::<MemProfileRecord>();
    host.env().profiler().register_heap_profile(1, callback);

    let allocation = host.handle().alloc(32);
    let samples = samples.lock().unwrap();
    assert_eq!(samples.len(), 1);
    assert!(samples[0].unit.is_none());
    drop(allocation);
}

#[test]
fn test_rate_zero_removes_callback() {
    let host = test_host();
    let (samples, callback) = collector::<MemProfileRecord>();
    let env = host.env();
    env.profiler().register_heap_profile(1, callback);
    env.profiler().register_heap_profile(0, |_| panic!("disabled profile delivered"));

    let allocation = host.handle().alloc(128);
    assert!(samples.lock().unwrap().is_empty());
    drop(allocation);
}

#[test]
fn test_sampling_rate_is_bounded() {
    let host = test_host();
    let err = host.env().profiler().register_cpu_profile(MAX_SAMPLING_HZ + 1, |_| {}).unwrap_err();
    match err {
        InterfaceError::InvalidRate { profile, rate, max } => {
            assert_eq!(profile, ProfileKind::Cpu);
            assert_eq!(rate, MAX_SAMPLING_HZ + 1);
            assert_eq!(max, MAX_SAMPLING_HZ);
        }
        other => panic!("unexpected error: {other}"),
    }

    // Stopping a profile that never ran is fine
    host.env().profiler().register_task_profile(0, |_| {}).unwrap();
}

#[test]
fn test_cpu_profile_attributes_samples_to_entered_frame() {
    let host = test_host();
    let env = host.env();
    let spin_addr = env.symbols().resolve_symbol(SPIN).unwrap();
    let (samples, callback) = collector::<StackRecord>();
    env.profiler().register_cpu_profile(1_000, callback).unwrap();

    let handle = host.handle();
    let unit = host.block_on(async move {
        let unit_env = handle.env();
        handle
            .spawn(async move {
                let _frame = host::enter_frame(spin_addr);
                let deadline = Instant::now() + Duration::from_millis(100);
                let mut buf = [0u8; 16];
                while Instant::now() < deadline {
                    frame::write_u64(&mut buf, 0, 10_000);
                    spin(&mut buf);
                }
                unit_env.current_unit().unwrap()
            })
            .await
            .unwrap()
    });
    env.profiler().register_cpu_profile(0, |_| {}).unwrap();

    let samples = samples.lock().unwrap();
    let ours: Vec<&StackRecord> = samples.iter().filter(|s| s.unit == Some(unit)).collect();
    assert!(!ours.is_empty(), "no samples of the spinning unit");
    assert!(ours.iter().any(|s| s.leaf() == Some(spin_addr)));
    // Samples taken before the frame was entered carry an empty stack
    assert!(ours.iter().filter_map(|s| s.leaf()).all(|leaf| leaf == spin_addr));
    assert!(ours.iter().all(|s| s.worker.is_some()));
    assert_eq!(env.symbols().function_at(spin_addr).unwrap().name(), SPIN);
}

#[test]
fn test_task_snapshot_on_demand() {
    let host = test_host();
    let env = host.env();
    assert!(!env.profiler().snapshot_tasks());

    let (samples, callback) = collector::<StackRecord>();
    env.profiler().register_task_profile(1, callback).unwrap();

    let handle = host.handle();
    let snapshot_env = env.clone();
    let root: UnitId = host.block_on(async move {
        assert!(snapshot_env.profiler().snapshot_tasks());
        handle.env().current_unit().unwrap()
    });
    env.profiler().register_task_profile(0, |_| {}).unwrap();

    assert!(samples.lock().unwrap().iter().any(|s| s.unit == Some(root)));
}

#[test]
fn test_block_profile_records_wait() {
    let host = test_host();
    let (samples, callback) = collector::<BlockProfileRecord>();
    host.env().profiler().register_block_profile(1, callback);

    let handle = host.handle();
    let waiter = host.block_on(async move {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let env = handle.env();
        let waiter = handle.spawn(async move {
            host::tag(BlockReason::Receive, rx).await.unwrap();
            env.current_unit().unwrap()
        });
        host::sleep(Duration::from_millis(5)).await;
        tx.send(()).unwrap();
        waiter.await.unwrap()
    });

    let samples = samples.lock().unwrap();
    let wait = samples.iter().find(|s| s.unit == Some(waiter)).expect("wait not sampled");
    assert_eq!(wait.count, 1);
    assert!(wait.nanos >= 1_000_000, "wait of {} ns", wait.nanos);
}

#[test]
fn test_contention_profile_records_contended_lock() {
    let host = test_host();
    let (samples, callback) = collector::<BlockProfileRecord>();
    host.env().profiler().register_contention_profile(1, callback);

    let handle = host.handle();
    host.block_on(async move {
        let lock = Arc::new(host::Mutex::new(0u32));
        let (held_tx, held_rx) = tokio::sync::oneshot::channel::<()>();

        let holder_lock = Arc::clone(&lock);
        let holder = handle.spawn(async move {
            let mut guard = holder_lock.lock().await;
            held_tx.send(()).unwrap();
            host::sleep(Duration::from_millis(20)).await;
            *guard += 1;
        });

        held_rx.await.unwrap();
        let contender_lock = Arc::clone(&lock);
        let contender = handle.spawn(async move {
            *contender_lock.lock().await += 1;
        });

        holder.await.unwrap();
        contender.await.unwrap();
        assert_eq!(*lock.lock().await, 2);
    });

    let samples = samples.lock().unwrap();
    assert_eq!(samples.len(), 1);
    assert!(samples[0].nanos > 0);
    assert!(samples[0].unit.is_some());
}

#[test]
fn test_worker_creation_profile_names_start_routine() {
    let host = test_host();
    let env = host.env();
    let (samples, callback) = collector::<StackRecord>();
    env.profiler().register_worker_creation_profile(1, callback);

    // Handing a worker off to a blocking call brings up a new thread
    let handle = host.handle();
    host.block_on(async move {
        handle
            .spawn(async {
                host::blocking(|| std::thread::sleep(Duration::from_millis(5)));
            })
            .await
            .unwrap();
    });

    let samples = samples.lock().unwrap();
    assert!(!samples.is_empty(), "no worker creation sampled");
    let leaf = samples[0].leaf().unwrap();
    assert_eq!(env.symbols().frame_name(leaf), "tether::host::worker_started");
}
