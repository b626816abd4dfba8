//! Reflective invocation of host functions
//!
//! Only functions the host registered as [`RawFn`]s are invocable. A raw
//! function receives one byte frame holding its arguments and the space for its
//! results; the layout inside the frame is a contract between the function and
//! its caller that the invoker does not check.
//!
//! A panic inside the callee is caught at this boundary and returned as
//! [`InvokeError::RecoveredPanic`]. The caller keeps running.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, trace};

use crate::agent::failure;
use crate::domain::{Address, InvokeError};
use crate::symbolization::{AbiVersion, SymbolDescriptor, SymbolKind};

/// Signature of every reflectively callable host function
pub type RawFn = fn(&mut [u8]);

#[derive(Clone)]
struct Invocable {
    name: Arc<str>,
    func: RawFn,
    frame_size: usize,
}

/// Calls registered host functions by descriptor
#[derive(Default)]
pub struct ReflectiveInvoker {
    by_address: HashMap<Address, Invocable>,
}

impl ReflectiveInvoker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `func` invocable under `name`
    ///
    /// Returns the function's address, which is also its symbol address.
    pub fn register(&mut self, name: &str, func: RawFn, frame_size: usize) -> Address {
        let address = func as Address;
        debug!("Invocable `{name}` at 0x{address:x} (frame {frame_size} bytes)");
        self.by_address.insert(address, Invocable { name: Arc::from(name), func, frame_size });
        address
    }

    /// Call the function described by `desc` with `frame`
    ///
    /// # Errors
    /// - [`InvokeError::UnsupportedAbi`] if `desc` is not a frame-ABI function
    /// - [`InvokeError::NotFound`] if nothing invocable lives at its address
    /// - [`InvokeError::FrameTooSmall`] if `frame` is shorter than declared
    /// - [`InvokeError::RecoveredPanic`] if the callee panicked
    pub fn call(&self, desc: &SymbolDescriptor, frame: &mut [u8]) -> Result<(), InvokeError> {
        if desc.kind() != SymbolKind::Function || desc.abi() != AbiVersion::FRAME_V1 {
            return Err(InvokeError::UnsupportedAbi {
                function: desc.name().to_string(),
                abi: desc.abi().0,
            });
        }
        self.call_at(desc.address(), frame)
    }

    /// Call the registered function at `address` with `frame`
    ///
    /// # Errors
    /// Same as [`ReflectiveInvoker::call`], minus the ABI check
    pub fn call_at(&self, address: Address, frame: &mut [u8]) -> Result<(), InvokeError> {
        let target = self.by_address.get(&address).ok_or(InvokeError::NotFound(address))?;
        if frame.len() < target.frame_size {
            return Err(InvokeError::FrameTooSmall {
                function: target.name.to_string(),
                required: target.frame_size,
                actual: frame.len(),
            });
        }

        trace!("Invoking `{}`", target.name);
        let func = target.func;
        failure::contain(|| func(frame)).map_err(|report| {
            debug!("Recovered panic in `{}`: {report}", target.name);
            InvokeError::RecoveredPanic {
                function: target.name.to_string(),
                message: report.message,
            }
        })
    }

    /// Declared frame size of the function at `address`
    #[must_use]
    pub fn frame_size(&self, address: Address) -> Option<usize> {
        self.by_address.get(&address).map(|i| i.frame_size)
    }

    /// Registered functions as `(name, address)` pairs
    pub fn functions(&self) -> impl Iterator<Item = (&str, Address)> {
        self.by_address.iter().map(|(addr, i)| (&*i.name, *addr))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}

/// Little-endian accessors for argument frames
///
/// Helpers for writing raw functions; out-of-range reads yield zero and
/// out-of-range writes are ignored.
pub mod frame {
    #[must_use]
    pub fn read_u64(frame: &[u8], offset: usize) -> u64 {
        frame
            .get(offset..offset + 8)
            .and_then(|b| b.try_into().ok())
            .map_or(0, u64::from_le_bytes)
    }

    pub fn write_u64(frame: &mut [u8], offset: usize, value: u64) {
        if let Some(slot) = frame.get_mut(offset..offset + 8) {
            slot.copy_from_slice(&value.to_le_bytes());
        }
    }
}
