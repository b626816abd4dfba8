//! # Symbol and Type Resolution
//!
//! Translates between names, addresses and descriptors without handing the agent
//! any view of the host's internal tables. Everything here is read-only after
//! the host starts: the index is assembled once by [`SymbolIndexBuilder`] and
//! frozen into an [`Arc`](std::sync::Arc)-shared [`SymbolIndex`].
//!
//! ## Sources
//!
//! ```text
//! host registrations ──┐
//!  (invocable fns,     │      ┌──────────────┐      ┌────────────────┐
//!   globals)           ├────▶ │ SymbolIndex  │ ───▶ │ SymbolResolver │ ◀── agent
//! executable ELF ──────┘      │ name → desc  │      │  + TypeRegistry│
//!  (symtab, relocated         │ addr → desc  │      │  + DWARF frames│
//!   by PIE load bias)         └──────────────┘      └────────────────┘
//! ```
//!
//! ### PIE (Position Independent Executable)
//!
//! ELF symbol tables and DWARF use **file virtual addresses**, while function
//! pointers and sampled stacks hold **runtime addresses**. For PIE executables
//! the two differ by the load bias, read from `/proc/self/maps`:
//!
//! ```text
//! Runtime Address = Load Bias + File Address
//! ```
//!
//! ### Names
//!
//! ELF names are demangled with `rustc-demangle` (alternate form, no hash).
//! When two symbols share a start address (aliases) only the first is kept, and
//! host registrations win over ELF names, so `resolve_symbol(name)` followed by
//! `function_at(address)` always yields `name` again.
//!
//! ## Module Structure
//!
//! - **`index`**: the immutable name/address index and its builder
//! - **`resolver`**: the agent-facing [`SymbolResolver`]
//! - **`symbolizer`**: DWARF file/line enrichment via `addr2line`
//! - **`memory_maps`**: `/proc/<pid>/maps` parsing for the load bias
//! - **`types`**: structural [`TypeDescriptor`]s and their registry

pub mod index;
pub mod memory_maps;
pub mod resolver;
pub mod symbolizer;
pub mod types;

pub use index::{AbiVersion, SymbolDescriptor, SymbolIndex, SymbolIndexBuilder, SymbolKind};
pub use memory_maps::{parse_memory_maps, MemoryRange};
pub use resolver::SymbolResolver;
pub use symbolizer::{ResolvedFrame, Symbolizer};
pub use types::{FieldDescriptor, TypeDescriptor, TypeRegistry};
