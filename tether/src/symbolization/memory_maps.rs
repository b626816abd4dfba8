//! Memory mapping utilities for process address space analysis
//!
//! Parses /proc/pid/maps to find where a binary is mapped, which gives the load
//! bias needed to relocate ELF symbol addresses of position-independent
//! executables (PIE) to runtime addresses.

use anyhow::{Context, Result};
use log::info;
use std::fs;

/// Memory range of a loaded binary in a process's address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRange {
    pub start: u64,
    pub end: u64,
}

impl MemoryRange {
    /// Check if an address falls within this memory range
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// Parse /proc/pid/maps to find the memory range of a specific binary
///
/// Returns the range from the lowest start address to the highest end address
/// over every mapping whose path is exactly `binary_path`.
///
/// # Errors
/// Returns an error if /proc/pid/maps cannot be read or if the binary is not mapped
pub fn parse_memory_maps(pid: u32, binary_path: &str) -> Result<MemoryRange> {
    let maps_path = format!("/proc/{pid}/maps");
    let maps = fs::read_to_string(&maps_path).context(format!("Failed to read {maps_path}"))?;

    let range = find_range(&maps, binary_path)?
        .ok_or_else(|| anyhow::anyhow!("Could not find memory range for {binary_path}"))?;

    info!(
        "Executable memory range: 0x{:x} - 0x{:x} (size: {} KB)",
        range.start,
        range.end,
        (range.end - range.start) / 1024
    );
    Ok(range)
}

/// Scan the text of a maps file for `binary_path`
fn find_range(maps: &str, binary_path: &str) -> Result<Option<MemoryRange>> {
    let mut found: Option<MemoryRange> = None;

    // Line format: "start-end perms offset dev inode pathname"
    for line in maps.lines() {
        let Some((range, path)) = split_line(line) else {
            continue;
        };
        if path != binary_path {
            continue;
        }
        let Some((start, end)) = range.split_once('-') else {
            continue;
        };
        let start = u64::from_str_radix(start, 16).context("Failed to parse range start")?;
        let end = u64::from_str_radix(end, 16).context("Failed to parse range end")?;

        found = Some(match found {
            Some(range) => MemoryRange { start: range.start.min(start), end: range.end.max(end) },
            None => MemoryRange { start, end },
        });
    }

    Ok(found)
}

/// Split a maps line into its address range and pathname
///
/// The pathname is everything after the inode and may contain spaces.
fn split_line(line: &str) -> Option<(&str, &str)> {
    let mut rest = line;
    let mut range = "";
    for field in 0..5 {
        let trimmed = rest.trim_start();
        let end = trimmed.find(char::is_whitespace)?;
        if field == 0 {
            range = &trimmed[..end];
        }
        rest = &trimmed[end..];
    }
    let path = rest.trim_start();
    (!path.is_empty()).then_some((range, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_MAPS: &str = "\
55d0c4a00000-55d0c4a42000 r--p 00000000 fd:01 1234 /opt/app/host
55d0c4a42000-55d0c4c10000 r-xp 00042000 fd:01 1234 /opt/app/host
55d0c4c10000-55d0c4c80000 r--p 00210000 fd:01 1234 /opt/app/host
7f1e2a000000-7f1e2a022000 r--p 00000000 fd:01 99 /usr/lib/libc.so.6
7ffd1c9e0000-7ffd1ca01000 rw-p 00000000 00:00 0 [stack]
";

    #[test]
    fn test_memory_range_contains() {
        let range = MemoryRange { start: 0x1000, end: 0x2000 };

        assert!(range.contains(0x1000));
        assert!(range.contains(0x1500));
        assert!(range.contains(0x1FFF));
        assert!(!range.contains(0x0FFF));
        assert!(!range.contains(0x2000));
    }

    #[test]
    fn test_find_range_spans_all_mappings() {
        let range = find_range(SAMPLE_MAPS, "/opt/app/host").unwrap().unwrap();
        assert_eq!(range.start, 0x55d0_c4a0_0000);
        assert_eq!(range.end, 0x55d0_c4c8_0000);
    }

    #[test]
    fn test_find_range_requires_exact_path() {
        assert!(find_range(SAMPLE_MAPS, "/opt/app/hos").unwrap().is_none());
        assert!(find_range(SAMPLE_MAPS, "/opt/app/host2").unwrap().is_none());
    }

    #[test]
    fn test_find_range_with_spaces_in_path() {
        let maps = "\
5600aa000000-5600aa010000 r--p 00000000 fd:01 77     /home/dev/My Builds/host
5600aa010000-5600aa030000 r-xp 00010000 fd:01 77     /home/dev/My Builds/host
7f00bb000000-7f00bb001000 r--p 00000000 fd:01 78     /home/dev/My
";
        let range = find_range(maps, "/home/dev/My Builds/host").unwrap().unwrap();
        assert_eq!(range, MemoryRange { start: 0x5600_aa00_0000, end: 0x5600_aa03_0000 });
        assert!(find_range(maps, "/home/dev/My").unwrap().is_some());
        assert!(find_range(maps, "/home/dev/My Builds").unwrap().is_none());
    }

    #[test]
    fn test_anonymous_mappings_have_no_path() {
        assert!(split_line("7ffd1c9e0000-7ffd1ca01000 rw-p 00000000 00:00 0").is_none());
        assert_eq!(
            split_line("7ffd1c9e0000-7ffd1ca01000 rw-p 00000000 00:00 0 [stack]"),
            Some(("7ffd1c9e0000-7ffd1ca01000", "[stack]"))
        );
    }

    #[test]
    fn test_parse_memory_maps_self() {
        // Depends on the test environment exposing /proc; only check that the
        // current executable, when found, contains this function.
        let exe = std::env::current_exe().expect("Failed to get current exe");
        let exe_path = exe.to_str().expect("Failed to convert exe path to string");

        if let Ok(range) = parse_memory_maps(std::process::id(), exe_path) {
            let here = test_parse_memory_maps_self as usize as u64;
            assert!(range.contains(here));
        }
    }
}
