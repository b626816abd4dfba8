//! Domain model for tether
//!
//! This module contains core domain types and errors that provide:
//! - Opaque identities that never point into host memory
//! - Self-documenting function signatures
//! - Structured error handling

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{Address, Timestamp, UnitId, UnitInfo, UnitState, UserTaskId, WorkerId};

pub use errors::{AttachError, ExportError, HostError, InterfaceError, InvokeError};
