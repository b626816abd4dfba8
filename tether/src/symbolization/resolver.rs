use std::any::Any;
use std::sync::Arc;

use super::index::{SymbolDescriptor, SymbolIndex};
use super::symbolizer::{ResolvedFrame, Symbolizer};
use super::types::{TypeDescriptor, TypeRegistry};
use crate::domain::{Address, InterfaceError};

/// Agent-facing symbol and type resolver
///
/// Pure reads over data frozen at startup; safe to call from any thread and
/// from inside event handlers.
#[derive(Clone)]
pub struct SymbolResolver {
    index: Arc<SymbolIndex>,
    types: Arc<TypeRegistry>,
    dwarf: Option<Arc<DwarfFrames>>,
}

struct DwarfFrames {
    symbolizer: Symbolizer,
    bias: Address,
}

impl SymbolResolver {
    #[must_use]
    pub fn new(index: Arc<SymbolIndex>, types: Arc<TypeRegistry>) -> Self {
        Self { index, types, dwarf: None }
    }

    /// Attach a DWARF symbolizer whose file addresses sit `bias` below runtime addresses
    #[must_use]
    pub fn with_dwarf(mut self, symbolizer: Symbolizer, bias: Address) -> Self {
        self.dwarf = Some(Arc::new(DwarfFrames { symbolizer, bias }));
        self
    }

    /// Address of the function or global called `name`
    ///
    /// # Errors
    /// Returns [`InterfaceError::NotFound`] if no such symbol exists
    pub fn resolve_symbol(&self, name: &str) -> Result<Address, InterfaceError> {
        self.index.address_of(name).ok_or_else(|| InterfaceError::NotFound(name.to_string()))
    }

    /// Concrete type descriptor of `value`
    #[must_use]
    pub fn resolve_type<T: ?Sized + 'static>(&self, value: &T) -> TypeDescriptor {
        self.types.describe(value)
    }

    /// Concrete type descriptor of a type-erased value
    #[must_use]
    pub fn resolve_dyn_type(&self, value: &dyn Any) -> TypeDescriptor {
        self.types.describe_dyn(value)
    }

    /// Function called `name`, without invoking it
    #[must_use]
    pub fn function_by_name(&self, name: &str) -> Option<SymbolDescriptor> {
        self.index.function_by_name(name).cloned()
    }

    /// Function whose code contains `address`, e.g. a sampled stack frame
    #[must_use]
    pub fn function_at(&self, address: Address) -> Option<SymbolDescriptor> {
        self.index.function_at(address).cloned()
    }

    /// Source-level frame(s) for `address` when DWARF debug info was loaded
    #[must_use]
    pub fn frame_at(&self, address: Address) -> Option<ResolvedFrame> {
        let dwarf = self.dwarf.as_ref()?;
        let file_addr = address.checked_sub(dwarf.bias)?;
        let resolved = dwarf.symbolizer.resolve(file_addr as u64);
        (!resolved.is_unknown()).then_some(resolved)
    }

    /// Human-readable name for a stack frame address
    #[must_use]
    pub fn frame_name(&self, address: Address) -> String {
        self.index
            .function_at(address)
            .map_or_else(|| format!("0x{address:x}"), |f| f.name().to_string())
    }

    /// Number of functions the resolver knows about
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.index.function_count() + self.index.global_count()
    }
}
