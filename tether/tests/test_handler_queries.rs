use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tether::domain::{UnitId, UnitInfo, UnitState};
use tether::events::Handler;
use tether::host::{self, Host};
use tether::{HostBuilder, HostConfig};
use tether_common::{BlockReason, EventKind};

fn test_host() -> Host {
    HostBuilder::new(HostConfig::default().with_workers(2).with_exe_symbols(false))
        .build()
        .expect("Failed to build host")
}

/// Run `f` on its own thread, failing the test if it does not finish
fn finishes_within<T: Send + 'static>(
    limit: Duration,
    f: impl FnOnce() -> T + Send + 'static,
) -> T {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(limit).expect("host hung while a handler queried it")
}

#[test]
fn test_unit_info_from_create_handler() {
    let seen: Arc<Mutex<Vec<UnitInfo>>> = Arc::new(Mutex::new(Vec::new()));
    let out = Arc::clone(&seen);

    let value = finishes_within(Duration::from_secs(5), move || {
        let host = test_host();
        let env = host.env();
        let query = env.clone();
        env.events()
            .register_handler(
                EventKind::TaskCreate,
                Handler::unit(move |_, unit| {
                    if let Some(info) = query.unit_info(unit) {
                        out.lock().unwrap().push(info);
                    }
                }),
            )
            .unwrap();

        let handle = host.handle();
        host.block_on(async move { handle.spawn(async { 1 }).await.unwrap() })
    });

    assert_eq!(value, 1);
    let seen = seen.lock().unwrap();
    // Root unit and the spawned one
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|info| info.state == UnitState::Runnable));
    assert_eq!(seen[0].label.as_deref(), Some("main"));
}

#[test]
fn test_unit_info_from_start_and_end_handlers() {
    let states = Arc::new(Mutex::new(Vec::new()));

    let out = Arc::clone(&states);
    finishes_within(Duration::from_secs(5), move || {
        let host = test_host();
        let env = host.env();
        for kind in [EventKind::TaskStart, EventKind::TaskSleep, EventKind::TaskEnd] {
            let query = env.clone();
            let out = Arc::clone(&out);
            env.events()
                .register_handler(
                    kind,
                    Handler::unit(move |_, unit| {
                        let state = query.unit_info(unit).map(|info| info.state);
                        out.lock().unwrap().push((kind, state));
                    }),
                )
                .unwrap();
        }

        let handle = host.handle();
        host.block_on(async move {
            handle.spawn(host::sleep(Duration::from_millis(1))).await.unwrap();
        });
    });

    let states = states.lock().unwrap();
    assert!(states.contains(&(EventKind::TaskStart, Some(UnitState::Running))));
    assert!(states.contains(&(EventKind::TaskSleep, Some(UnitState::Sleeping))));
    assert!(states.contains(&(EventKind::TaskEnd, Some(UnitState::Done))));
}

#[test]
fn test_snapshot_tasks_from_end_handler() {
    let snapshots = Arc::new(Mutex::new(Vec::new()));

    let out = Arc::clone(&snapshots);
    finishes_within(Duration::from_secs(5), move || {
        let host = test_host();
        let env = host.env();
        let batches = Arc::clone(&out);
        env.profiler()
            .register_task_profile(1, move |batch| {
                batches.lock().unwrap().push(batch.iter().map(|s| s.unit).collect::<Vec<_>>());
            })
            .unwrap();

        let query = env.clone();
        env.events()
            .register_handler(
                EventKind::TaskEnd,
                Handler::unit(move |_, _| {
                    query.profiler().snapshot_tasks();
                }),
            )
            .unwrap();

        let handle = host.handle();
        host.block_on(async move {
            handle.spawn(async {}).await.unwrap();
        });
        env.profiler().register_task_profile(0, |_| {}).unwrap();
    });

    let snapshots = snapshots.lock().unwrap();
    let ended: Vec<&Vec<Option<UnitId>>> =
        snapshots.iter().filter(|units| units.iter().any(Option::is_some)).collect();
    assert!(!ended.is_empty(), "no snapshot taken from the end handler");
}

#[test]
fn test_registering_waiting_handler_from_a_handler() {
    let waiting = Arc::new(Mutex::new(Vec::new()));

    let out = Arc::clone(&waiting);
    let parked = finishes_within(Duration::from_secs(5), move || {
        let host = test_host();
        let env = host.env();
        let handle = host.handle();

        host.block_on(async move {
            let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
            let (id_tx, id_rx) = tokio::sync::oneshot::channel::<UnitId>();
            let unit_env = handle.env();
            let parked = handle.spawn(async move {
                id_tx.send(unit_env.current_unit().unwrap()).unwrap();
                host::tag(BlockReason::Receive, release_rx).await.unwrap();
            });
            let parked_id = id_rx.await.unwrap();
            host::sleep(Duration::from_millis(5)).await;

            // The first TaskStart after this point turns on TaskWaiting tracing
            let registered = Arc::new(AtomicBool::new(false));
            let inner = env.clone();
            let waiting = Arc::clone(&out);
            env.events()
                .register_handler(
                    EventKind::TaskStart,
                    Handler::unit(move |_, _| {
                        if registered.swap(true, Ordering::SeqCst) {
                            return;
                        }
                        let waiting = Arc::clone(&waiting);
                        inner
                            .events()
                            .register_handler(
                                EventKind::TaskWaiting,
                                Handler::unit(move |_, unit| waiting.lock().unwrap().push(unit)),
                            )
                            .unwrap();
                    }),
                )
                .unwrap();

            handle.spawn(async {}).await.unwrap();
            release_tx.send(()).unwrap();
            parked.await.unwrap();
            parked_id
        })
    });

    assert!(waiting.lock().unwrap().contains(&parked));
}
