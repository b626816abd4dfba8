//! Structured error types for tether
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Lookup and registration failures are returned synchronously and never
//! unwind into host control flow.

use tether_common::{EventKind, PayloadShape, ProfileKind};
use thiserror::Error;

/// Failures of the query and registration operations on [`crate::Env`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("Symbol `{0}` not found")]
    NotFound(String),

    #[error("Handler for {kind:?} must accept {expected:?} payloads, got {actual:?}")]
    Incompatible { kind: EventKind, expected: PayloadShape, actual: PayloadShape },

    #[error("Rate {rate} is out of range for the {profile:?} profile (max {max})")]
    InvalidRate { profile: ProfileKind, rate: u64, max: u64 },

    #[error("Host published a {actual:?} payload for {kind:?}")]
    WrongPayload { kind: EventKind, actual: PayloadShape },

    #[error("Failed to start {0} sampler thread")]
    SamplerSpawnFailed(&'static str),
}

/// Failures of [`crate::invoke::ReflectiveInvoker::call`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    #[error("No invocable function at 0x{0:x}")]
    NotFound(usize),

    #[error("Argument frame for `{function}` needs {required} bytes, got {actual}")]
    FrameTooSmall { function: String, required: usize, actual: usize },

    #[error("`{function}` uses ABI version {abi}, which this invoker cannot call")]
    UnsupportedAbi { function: String, abi: u32 },

    #[error("`{function}` panicked: {message}")]
    RecoveredPanic { function: String, message: String },
}

/// Failures attaching an agent to a host
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttachError {
    #[error("Agent built for {agent} cannot attach to host build {host}")]
    VersionMismatch { agent: String, host: String },
}

/// Failures building or running the instrumented host
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Failed to build the task runtime: {0}")]
    RuntimeBuildFailed(#[source] std::io::Error),

    #[error("Failed to load executable symbols: {0}")]
    SymbolLoadFailed(String),

    #[error("Invalid host configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Interface(#[from] InterfaceError),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to serialize trace data: {0}")]
    SerializationFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
