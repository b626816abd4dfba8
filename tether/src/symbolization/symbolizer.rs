// String formatting intentionally uses format! for clarity
#![allow(clippy::format_push_string)]

use addr2line::Context;
use anyhow::{Context as _, Result};
use gimli::{EndianArcSlice, RunTimeEndian};
use object::{Object, ObjectSection};
use rustc_demangle::demangle;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// DWARF symbolizer for resolving file addresses to source locations
///
/// Shared between the agent-facing resolver and the sampler threads, so both
/// the DWARF context and the cache live behind a mutex.
pub struct Symbolizer {
    inner: Mutex<Inner>,
}

struct Inner {
    ctx: Context<EndianArcSlice<RunTimeEndian>>,
    /// Cache of resolved frames by address
    cache: HashMap<u64, ResolvedFrame>,
}

impl Symbolizer {
    /// Create a new symbolizer for the given binary
    ///
    /// # Errors
    /// Returns an error if the binary file cannot be read or parsed, or if DWARF debug info is
    /// missing
    pub fn new<P: AsRef<Path>>(binary_path: P) -> Result<Self> {
        let binary_data = fs::read(binary_path.as_ref()).context("Failed to read binary file")?;

        let obj_file = object::File::parse(&*binary_data).context("Failed to parse object file")?;

        let endian =
            if obj_file.is_little_endian() { RunTimeEndian::Little } else { RunTimeEndian::Big };

        let load_section =
            |id: gimli::SectionId| -> Result<EndianArcSlice<RunTimeEndian>, gimli::Error> {
                let data = obj_file
                    .section_by_name(id.name())
                    .and_then(|section| section.uncompressed_data().ok())
                    .unwrap_or(std::borrow::Cow::Borrowed(&[][..]));
                Ok(EndianArcSlice::new(Arc::from(&*data), endian))
            };

        let dwarf = gimli::Dwarf::load(&load_section)?;
        let ctx = Context::from_dwarf(dwarf).context("Failed to load DWARF debug information")?;

        Ok(Self { inner: Mutex::new(Inner { ctx, cache: HashMap::new() }) })
    }

    /// Resolve a file address to source location information
    ///
    /// Uses a cache to avoid re-resolving the same address multiple times.
    pub fn resolve(&self, addr: u64) -> ResolvedFrame {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(cached) = inner.cache.get(&addr) {
            return cached.clone();
        }

        let mut result = Vec::new();

        if let Ok(mut frame_iter) = inner.ctx.find_frames(addr).skip_all_loads() {
            while let Ok(Some(frame)) = frame_iter.next() {
                let function = frame
                    .function
                    .and_then(|f| f.demangle().ok().map(|s| s.to_string()))
                    .unwrap_or_else(|| "<unknown>".to_string());

                let location = frame.location.map(|loc| SourceLocation {
                    file: loc.file.map(std::string::ToString::to_string),
                    line: loc.line,
                    column: loc.column,
                });

                result.push(InlinedFrame { function, location });
            }
        }

        let resolved = ResolvedFrame {
            addr,
            frames: if result.is_empty() {
                vec![InlinedFrame { function: "<unknown>".to_string(), location: None }]
            } else {
                result
            },
        };

        inner.cache.insert(addr, resolved.clone());

        resolved
    }

    /// Demangle a Rust symbol name
    #[must_use]
    pub fn demangle_symbol(symbol: &str) -> String {
        format!("{:#}", demangle(symbol))
    }
}

/// A resolved stack frame (may contain multiple inlined frames)
#[derive(Debug, Clone)]
pub struct ResolvedFrame {
    pub addr: u64,
    pub frames: Vec<InlinedFrame>,
}

/// An inlined frame within a resolved frame
#[derive(Debug, Clone)]
pub struct InlinedFrame {
    pub function: String,
    pub location: Option<SourceLocation>,
}

/// Source code location
#[derive(Debug, Clone)]
pub struct SourceLocation {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl ResolvedFrame {
    /// Whether DWARF knew nothing about this address
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.frames.iter().all(|f| f.function == "<unknown>")
    }

    /// Format the frame for display
    #[must_use]
    pub fn format(&self, frame_num: usize) -> String {
        let mut output = String::new();

        for (idx, inlined) in self.frames.iter().enumerate() {
            let prefix = if idx == 0 { format!("#{frame_num:<2}") } else { "    ".to_string() };

            output.push_str(&format!("{} 0x{:016x} {}", prefix, self.addr, inlined.function));

            if let Some(SourceLocation { file: Some(file), line, column }) = &inlined.location {
                output.push_str(&format!("\n                      at {file}"));
                if let Some(line) = line {
                    output.push_str(&format!(":{line}"));
                    if let Some(col) = column {
                        output.push_str(&format!(":{col}"));
                    }
                }
            }

            if idx < self.frames.len() - 1 {
                output.push('\n');
            }
        }

        output
    }
}
