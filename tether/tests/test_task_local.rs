use std::sync::{Arc, Mutex};
use std::time::Duration;

use tether::domain::UnitId;
use tether::events::Handler;
use tether::host::{self, Host};
use tether::{HostBuilder, HostConfig};
use tether_common::{BlockReason, EventKind};

#[derive(Debug, PartialEq, Eq)]
struct RequestTag(&'static str);

fn test_host() -> Host {
    HostBuilder::new(HostConfig::default().with_workers(2).with_exe_symbols(false))
        .build()
        .expect("Failed to build host")
}

#[test]
fn test_value_visible_from_other_threads_while_unit_lives() {
    let host = test_host();
    let env = host.env();
    let handle = host.handle();

    host.block_on(async move {
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let (id_tx, id_rx) = tokio::sync::oneshot::channel::<UnitId>();
        let unit_env = handle.env();
        let unit = handle.spawn(async move {
            let id = unit_env.current_unit().unwrap();
            unit_env.task_local().set(id, RequestTag("checkout"));
            id_tx.send(id).unwrap();
            host::tag(BlockReason::Receive, release_rx).await.unwrap();
        });

        let id = id_rx.await.unwrap();
        // Read from a plain thread, outside the runtime
        let reader = env.clone();
        let seen = std::thread::spawn(move || reader.task_local().get_as::<RequestTag>(id))
            .join()
            .unwrap();
        assert_eq!(seen.as_deref(), Some(&RequestTag("checkout")));
        // Wrong type reads as absent
        assert!(env.task_local().get_as::<String>(id).is_none());

        release_tx.send(()).unwrap();
        unit.await.unwrap();
        assert!(env.task_local().get(id).is_none());
    });
}

#[test]
fn test_value_readable_from_end_handler_then_evicted() {
    let host = test_host();
    let env = host.env();
    let at_end = Arc::new(Mutex::new(Vec::new()));

    let store_env = env.clone();
    let seen = Arc::clone(&at_end);
    env.events()
        .register_handler(
            EventKind::TaskEnd,
            Handler::unit(move |_, unit| {
                if let Some(tag) = store_env.task_local().get_as::<RequestTag>(unit) {
                    seen.lock().unwrap().push(tag.0);
                }
            }),
        )
        .unwrap();

    let handle = host.handle();
    let id = host.block_on(async move {
        let unit_env = handle.env();
        handle
            .spawn(async move {
                let id = unit_env.current_unit().unwrap();
                unit_env.task_local().set(id, RequestTag("search"));
                host::sleep(Duration::from_millis(1)).await;
                id
            })
            .await
            .unwrap()
    });

    assert_eq!(*at_end.lock().unwrap(), vec!["search"]);
    assert!(env.task_local().get(id).is_none());
    assert!(env.task_local().get_ptr(id).is_none());
}

#[test]
fn test_pointer_slot_is_independent_of_value_slot() {
    let host = test_host();
    let env = host.env();
    let handle = host.handle();

    host.block_on(async move {
        let id = handle.env().current_unit().unwrap();
        let store = env.task_local();
        store.set_ptr(id, 0xdead_0000);
        store.set(id, 7u64);
        assert_eq!(store.get_ptr(id), Some(0xdead_0000));
        assert_eq!(store.take(id).and_then(|v| v.downcast::<u64>().ok()).as_deref(), Some(&7));
        // The pointer survives taking the value
        assert_eq!(store.get_ptr(id), Some(0xdead_0000));
    });
}
