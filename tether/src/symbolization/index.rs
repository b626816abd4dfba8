//! Immutable symbol index
//!
//! Built once at host startup, then shared read-only. Functions are kept in a
//! vector sorted by start address with unique starts, so containment lookups
//! are a binary search.

use anyhow::{Context, Result};
use log::{debug, info};
use object::{Object, ObjectKind, ObjectSymbol};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use super::memory_maps::parse_memory_maps;
use super::symbolizer::Symbolizer;
use crate::domain::Address;

/// Calling convention tag carried by every descriptor
///
/// Only [`AbiVersion::FRAME_V1`] functions can be called reflectively. The tag
/// leaves room for additional conventions without changing descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AbiVersion(pub u32);

impl AbiVersion {
    /// Platform calling convention (discovered in the executable, not invocable)
    pub const PLATFORM: AbiVersion = AbiVersion(0);
    /// `fn(&mut [u8])`: arguments and results share one byte frame
    pub const FRAME_V1: AbiVersion = AbiVersion(1);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Function,
    Global,
}

/// Resolved reference to a function or global
///
/// Cheap to clone; the name is shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolDescriptor {
    name: Arc<str>,
    address: Address,
    size: usize,
    kind: SymbolKind,
    abi: AbiVersion,
}

impl SymbolDescriptor {
    #[must_use]
    pub fn new(
        name: &str,
        address: Address,
        size: usize,
        kind: SymbolKind,
        abi: AbiVersion,
    ) -> Self {
        Self { name: Arc::from(name), address, size, kind, abi }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    /// Size in bytes as recorded by the source (0 when unknown)
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn kind(&self) -> SymbolKind {
        self.kind
    }

    #[must_use]
    pub fn abi(&self) -> AbiVersion {
        self.abi
    }
}

/// Where a builder entry came from; lower wins on conflicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Origin {
    Host,
    Executable,
}

#[derive(Debug, Clone, Copy)]
enum NameSlot {
    Function(usize),
    Global(usize),
}

/// Read-only name/address index
#[derive(Debug, Default)]
pub struct SymbolIndex {
    /// Sorted by address, unique start addresses
    functions: Vec<SymbolDescriptor>,
    /// Exclusive end address of each function (parallel to `functions`)
    ends: Vec<Address>,
    globals: Vec<SymbolDescriptor>,
    by_name: HashMap<Arc<str>, NameSlot>,
}

impl SymbolIndex {
    /// Address of the function or global called `name`
    #[must_use]
    pub fn address_of(&self, name: &str) -> Option<Address> {
        self.lookup(name).map(SymbolDescriptor::address)
    }

    /// Descriptor of the function or global called `name`
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&SymbolDescriptor> {
        match self.by_name.get(name)? {
            NameSlot::Function(idx) => self.functions.get(*idx),
            NameSlot::Global(idx) => self.globals.get(*idx),
        }
    }

    /// Descriptor of the function called `name`
    #[must_use]
    pub fn function_by_name(&self, name: &str) -> Option<&SymbolDescriptor> {
        match self.by_name.get(name)? {
            NameSlot::Function(idx) => self.functions.get(*idx),
            NameSlot::Global(_) => None,
        }
    }

    /// Descriptor of the function whose range contains `address`
    ///
    /// Functions without a recorded size extend up to the next function.
    #[must_use]
    pub fn function_at(&self, address: Address) -> Option<&SymbolDescriptor> {
        let idx = self.functions.partition_point(|f| f.address <= address).checked_sub(1)?;
        (address < self.ends[idx]).then(|| &self.functions[idx])
    }

    /// Number of functions in the index
    #[must_use]
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Number of globals in the index
    #[must_use]
    pub fn global_count(&self) -> usize {
        self.globals.len()
    }

    /// Iterate over functions in address order
    pub fn functions(&self) -> impl Iterator<Item = &SymbolDescriptor> {
        self.functions.iter()
    }
}

/// Collects symbols during host startup, then freezes them into a [`SymbolIndex`]
#[derive(Debug, Default)]
pub struct SymbolIndexBuilder {
    entries: Vec<(Origin, SymbolDescriptor)>,
}

impl SymbolIndexBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host function
    pub fn function(
        &mut self,
        name: &str,
        address: Address,
        size: usize,
        abi: AbiVersion,
    ) -> &mut Self {
        let desc = SymbolDescriptor::new(name, address, size, SymbolKind::Function, abi);
        self.entries.push((Origin::Host, desc));
        self
    }

    /// Register a host global
    pub fn global(&mut self, name: &str, address: Address, size: usize) -> &mut Self {
        let desc =
            SymbolDescriptor::new(name, address, size, SymbolKind::Global, AbiVersion::PLATFORM);
        self.entries.push((Origin::Host, desc));
        self
    }

    /// Add the defined text and data symbols of an ELF file, shifted by `bias`
    ///
    /// Returns the number of symbols added.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed
    pub fn load_elf(&mut self, path: &Path, bias: Address) -> Result<usize> {
        let data = fs::read(path).context(format!("Failed to read {}", path.display()))?;
        let file = object::File::parse(&*data).context("Failed to parse object file")?;
        Ok(self.add_object_symbols(&file, bias))
    }

    /// Add the running executable's symbols, relocated to runtime addresses
    ///
    /// Also returns a DWARF symbolizer for the executable when debug info is
    /// present, together with the bias to subtract before querying it.
    ///
    /// # Errors
    /// Returns an error if the executable cannot be located, read or parsed
    pub fn load_current_exe(&mut self) -> Result<(usize, Option<(Symbolizer, Address)>)> {
        let exe = std::env::current_exe().context("Failed to locate current executable")?;
        let data = fs::read(&exe).context(format!("Failed to read {}", exe.display()))?;
        let file = object::File::parse(&*data).context("Failed to parse object file")?;

        // Position-independent executables are ET_DYN; their symbols need the load bias
        let bias = if file.kind() == ObjectKind::Dynamic {
            let path = exe.to_string_lossy();
            let range = parse_memory_maps(std::process::id(), &path)?;
            Address::try_from(range.start).context("Load address does not fit a pointer")?
        } else {
            0
        };

        let added = self.add_object_symbols(&file, bias);
        info!("Loaded {added} symbols from {} (bias 0x{bias:x})", exe.display());

        let dwarf = match Symbolizer::new(&exe) {
            Ok(symbolizer) => Some((symbolizer, bias)),
            Err(e) => {
                debug!("No DWARF symbolizer for {}: {e:#}", exe.display());
                None
            }
        };

        Ok((added, dwarf))
    }

    fn add_object_symbols(&mut self, file: &object::File<'_>, bias: Address) -> usize {
        let mut added = 0;
        for sym in file.symbols() {
            if !sym.is_definition() {
                continue;
            }
            let kind = match sym.kind() {
                object::SymbolKind::Text => SymbolKind::Function,
                object::SymbolKind::Data => SymbolKind::Global,
                _ => continue,
            };
            let Ok(raw_name) = sym.name() else { continue };
            if raw_name.is_empty() {
                continue;
            }
            let (Ok(address), Ok(size)) =
                (Address::try_from(sym.address()), usize::try_from(sym.size()))
            else {
                continue;
            };
            if address == 0 {
                continue;
            }

            let name = Symbolizer::demangle_symbol(raw_name);
            let desc = SymbolDescriptor::new(
                &name,
                address.wrapping_add(bias),
                size,
                kind,
                AbiVersion::PLATFORM,
            );
            self.entries.push((Origin::Executable, desc));
            added += 1;
        }
        added
    }

    /// Freeze the collected symbols
    #[must_use]
    pub fn build(self) -> SymbolIndex {
        let (mut functions, mut globals): (Vec<_>, Vec<_>) =
            self.entries.into_iter().partition(|(_, d)| d.kind == SymbolKind::Function);

        // Unique start addresses; host registrations first at equal addresses
        functions.sort_by(|(oa, a), (ob, b)| a.address.cmp(&b.address).then(oa.cmp(ob)));
        functions.dedup_by(|later, first| later.1.address == first.1.address);

        globals.sort_by(|(oa, a), (ob, b)| a.address.cmp(&b.address).then(oa.cmp(ob)));
        globals.dedup_by(|later, first| later.1.address == first.1.address);

        let ends = functions
            .iter()
            .enumerate()
            .map(|(idx, (_, f))| {
                let next = functions.get(idx + 1).map_or(Address::MAX, |(_, n)| n.address);
                if f.size > 0 {
                    f.address.saturating_add(f.size).min(next)
                } else {
                    next
                }
            })
            .collect();

        // Names: host entries claim first, then functions before globals
        let mut by_name: HashMap<Arc<str>, NameSlot> = HashMap::new();
        for origin in [Origin::Host, Origin::Executable] {
            for (idx, (o, f)) in functions.iter().enumerate() {
                if *o == origin {
                    by_name.entry(f.name.clone()).or_insert(NameSlot::Function(idx));
                }
            }
            for (idx, (o, g)) in globals.iter().enumerate() {
                if *o == origin {
                    by_name.entry(g.name.clone()).or_insert(NameSlot::Global(idx));
                }
            }
        }

        let index = SymbolIndex {
            functions: functions.into_iter().map(|(_, f)| f).collect(),
            ends,
            globals: globals.into_iter().map(|(_, g)| g).collect(),
            by_name,
        };
        debug!(
            "Symbol index frozen: {} functions, {} globals",
            index.function_count(),
            index.global_count()
        );
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> SymbolIndex {
        let mut builder = SymbolIndexBuilder::new();
        builder
            .function("demo::parse", 0x1000, 0x100, AbiVersion::FRAME_V1)
            .function("demo::render", 0x2000, 0, AbiVersion::FRAME_V1)
            .function("demo::flush", 0x3000, 0x10, AbiVersion::PLATFORM)
            .global("demo::COUNTER", 0x9000, 8);
        builder.build()
    }

    #[test]
    fn test_resolve_then_function_at_round_trips() {
        let index = sample_index();
        for name in ["demo::parse", "demo::render", "demo::flush"] {
            let addr = index.address_of(name).unwrap();
            assert_eq!(index.function_at(addr).unwrap().name(), name);
        }
    }

    #[test]
    fn test_function_at_respects_sizes() {
        let index = sample_index();
        assert_eq!(index.function_at(0x10ff).unwrap().name(), "demo::parse");
        assert!(index.function_at(0x1100).is_none());
        assert!(index.function_at(0x0fff).is_none());
        // Zero-sized symbols extend to the next start
        assert_eq!(index.function_at(0x2fff).unwrap().name(), "demo::render");
        assert!(index.function_at(0x3010).is_none());
    }

    #[test]
    fn test_globals_resolve_but_are_not_functions() {
        let index = sample_index();
        assert_eq!(index.address_of("demo::COUNTER"), Some(0x9000));
        assert!(index.function_by_name("demo::COUNTER").is_none());
        assert!(index.function_at(0x9000).is_none());
        assert!(index.address_of("demo::missing").is_none());
    }

    #[test]
    fn test_aliases_are_dropped_and_host_names_win() {
        let mut builder = SymbolIndexBuilder::new();
        builder.entries.push((
            Origin::Executable,
            SymbolDescriptor::new(
                "elf_name",
                0x4000,
                0x20,
                SymbolKind::Function,
                AbiVersion::PLATFORM,
            ),
        ));
        builder.function("host_name", 0x4000, 0, AbiVersion::FRAME_V1);
        let index = builder.build();

        assert_eq!(index.function_count(), 1);
        assert_eq!(index.function_at(0x4000).unwrap().name(), "host_name");
        assert!(index.address_of("elf_name").is_none());
        // The dropped alias's size does not survive
        assert_eq!(index.function_at(0x4000).unwrap().abi(), AbiVersion::FRAME_V1);
    }

    #[test]
    fn test_load_current_exe_round_trips() {
        let mut builder = SymbolIndexBuilder::new();
        // /proc may be unavailable in some sandboxes
        let Ok((added, _dwarf)) = builder.load_current_exe() else {
            return;
        };
        let index = builder.build();
        assert!(added > 0);

        for desc in index.functions().take(200) {
            let addr = index.address_of(desc.name()).unwrap();
            assert_eq!(index.function_at(addr).unwrap().name(), desc.name());
        }
    }
}
