use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tether::domain::{InterfaceError, InvokeError};
use tether::host::Host;
use tether::invoke::frame;
use tether::symbolization::{AbiVersion, SymbolDescriptor, SymbolKind, TypeDescriptor};
use tether::{HostBuilder, HostConfig};

const ADD: &str = "reflection_test::add";
const FAIL: &str = "reflection_test::fail";
const SCALE: &str = "reflection_test::scale";

static REQUESTS: AtomicU64 = AtomicU64::new(0);

struct LoginSession {
    _user: String,
    _expires: u64,
}

fn add(buf: &mut [u8]) {
    let sum = frame::read_u64(buf, 0).wrapping_add(frame::read_u64(buf, 8));
    frame::write_u64(buf, 16, sum);
}

fn fail(buf: &mut [u8]) {
    panic!("fail called with {}", frame::read_u64(buf, 0));
}

fn scale(buf: &mut [u8]) {
    let value = frame::read_u64(buf, 0);
    frame::write_u64(buf, 0, value * 3);
}

fn test_host() -> Host {
    let mut builder =
        HostBuilder::new(HostConfig::default().with_workers(1).with_exe_symbols(false));
    builder
        .register_fn(ADD, add, 24)
        .register_fn(FAIL, fail, 8)
        .register_fn(SCALE, scale, 8)
        .register_global("reflection_test::REQUESTS", &REQUESTS)
        .register_type::<LoginSession>(
            TypeDescriptor::of::<LoginSession>()
                .field::<String>("user")
                .field::<u64>("expires")
                .method("renew"),
        );
    builder.build().expect("Failed to build host")
}

#[test]
fn test_resolve_symbol_round_trips_through_function_at() {
    let host = test_host();
    let symbols = host.env().symbols().clone();

    for name in [ADD, FAIL, SCALE] {
        let address = symbols.resolve_symbol(name).unwrap();
        let desc = symbols.function_at(address).expect("registered function not found");
        assert_eq!(desc.name(), name);
        assert_eq!(desc.kind(), SymbolKind::Function);
        assert_eq!(desc.abi(), AbiVersion::FRAME_V1);
        assert_eq!(symbols.frame_name(address), name);
    }

    let err = symbols.resolve_symbol("reflection_test::missing").unwrap_err();
    assert!(
        matches!(err, InterfaceError::NotFound(ref name) if name == "reflection_test::missing")
    );
}

#[test]
fn test_globals_resolve_to_their_address() {
    let host = test_host();
    let symbols = host.env().symbols().clone();

    let address = symbols.resolve_symbol("reflection_test::REQUESTS").unwrap();
    assert_eq!(address, std::ptr::from_ref(&REQUESTS) as usize);
    // Globals are not functions
    assert!(symbols.function_by_name("reflection_test::REQUESTS").is_none());
    REQUESTS.fetch_add(1, Ordering::Relaxed);
}

#[test]
fn test_type_descriptors() {
    let host = test_host();
    let env = host.env();

    let session = LoginSession { _user: "ada".to_string(), _expires: 0 };
    let desc = env.symbols().resolve_type(&session);
    assert!(desc.name.ends_with("LoginSession"));
    assert_eq!(desc.size, std::mem::size_of::<LoginSession>());
    let fields: Vec<&str> = desc.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(fields, vec!["user", "expires"]);
    assert_eq!(desc.methods, vec!["renew".to_string()]);

    // Unregistered types still report name and layout
    let desc = env.symbols().resolve_type(&42u32);
    assert_eq!(desc.name, "u32");
    assert_eq!(desc.size, 4);
    assert!(desc.fields.is_empty());

    let erased: Box<dyn std::any::Any> =
        Box::new(LoginSession { _user: String::new(), _expires: 1 });
    assert_eq!(env.symbols().resolve_dyn_type(&*erased).fields.len(), 2);
}

#[test]
fn test_invoke_by_descriptor() {
    let host = test_host();
    let env = host.env();
    let desc = env.symbols().function_by_name(ADD).unwrap();

    let mut buf = [0u8; 24];
    frame::write_u64(&mut buf, 0, 40);
    frame::write_u64(&mut buf, 8, 2);
    env.invoker().call(&desc, &mut buf).unwrap();
    assert_eq!(frame::read_u64(&buf, 16), 42);
}

#[test]
fn test_invoke_rejects_short_frame() {
    let host = test_host();
    let env = host.env();
    let desc = env.symbols().function_by_name(ADD).unwrap();

    let mut buf = [0u8; 8];
    let err = env.invoker().call(&desc, &mut buf).unwrap_err();
    assert!(matches!(err, InvokeError::FrameTooSmall { required: 24, actual: 8, .. }));
}

#[test]
fn test_invoke_rejects_foreign_abi_and_unknown_address() {
    let host = test_host();
    let env = host.env();

    let platform =
        SymbolDescriptor::new("native", 0x1000, 16, SymbolKind::Function, AbiVersion::PLATFORM);
    let err = env.invoker().call(&platform, &mut [0u8; 8]).unwrap_err();
    assert!(matches!(err, InvokeError::UnsupportedAbi { abi: 0, .. }));

    let global = SymbolDescriptor::new("data", 0x2000, 8, SymbolKind::Global, AbiVersion::FRAME_V1);
    assert!(matches!(
        env.invoker().call(&global, &mut [0u8; 8]).unwrap_err(),
        InvokeError::UnsupportedAbi { .. }
    ));

    let unknown =
        SymbolDescriptor::new("gone", 0x3000, 8, SymbolKind::Function, AbiVersion::FRAME_V1);
    assert!(matches!(
        env.invoker().call(&unknown, &mut [0u8; 8]).unwrap_err(),
        InvokeError::NotFound(0x3000)
    ));
}

#[test]
fn test_panic_in_callee_is_contained() {
    let host = test_host();
    let env = host.env();
    let failures = Arc::new(Mutex::new(0));
    let count = Arc::clone(&failures);
    env.register_unhandled_failure_handler(move |_| *count.lock().unwrap() += 1);

    let fail_desc = env.symbols().function_by_name(FAIL).unwrap();
    let mut buf = [0u8; 8];
    frame::write_u64(&mut buf, 0, 9);
    let err = env.invoker().call(&fail_desc, &mut buf).unwrap_err();
    match err {
        InvokeError::RecoveredPanic { function, message } => {
            assert_eq!(function, FAIL);
            assert_eq!(message, "fail called with 9");
        }
        other => panic!("unexpected error: {other}"),
    }

    // The caller keeps going and later calls behave normally
    let scale_desc = env.symbols().function_by_name(SCALE).unwrap();
    frame::write_u64(&mut buf, 0, 5);
    env.invoker().call(&scale_desc, &mut buf).unwrap();
    assert_eq!(frame::read_u64(&buf, 0), 15);

    assert_eq!(*failures.lock().unwrap(), 0);
}

#[test]
fn test_contained_panic_inside_unit() {
    let host = test_host();
    let handle = host.handle();

    let result = host.block_on(async move {
        let env = handle.env();
        handle
            .spawn(async move {
                let desc = env.symbols().function_by_name(FAIL).unwrap();
                let contained = env.invoker().call(&desc, &mut [0u8; 8]).is_err();
                let desc = env.symbols().function_by_name(SCALE).unwrap();
                let mut buf = [0u8; 8];
                frame::write_u64(&mut buf, 0, 2);
                env.invoker().call(&desc, &mut buf).unwrap();
                (contained, frame::read_u64(&buf, 0))
            })
            .await
            .unwrap()
    });
    assert_eq!(result, (true, 6));
}

#[test]
fn test_interface_version() {
    let host = test_host();
    let env = host.env();
    assert_eq!(env.interface_version(), tether_common::INTERFACE_VERSION);
    assert!(env.host_version().starts_with("tether-"));
}
