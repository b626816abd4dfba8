//! Host configuration
//!
//! Defaults suit the demo workload; every field has a `with_*` builder and the
//! common knobs can be overridden from the environment:
//!
//! | Variable                 | Field             |
//! |--------------------------|-------------------|
//! | `TETHER_WORKERS`         | `workers`         |
//! | `TETHER_RECLAIM_PERCENT` | `reclaim_percent` |
//! | `TETHER_EXE_SYMBOLS`     | `exe_symbols`     |

use std::time::Duration;

use log::warn;

/// Default growth of the heap goal over the live heap, in percent
pub const DEFAULT_RECLAIM_PERCENT: u64 = 100;

/// Heap goal floor (4 MiB)
pub const DEFAULT_MIN_HEAP_GOAL: u64 = 4 * 1024 * 1024;

/// Polls at least this long that end in a yield are reported as preemptions
pub const DEFAULT_PREEMPT_SLICE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Worker threads of the task runtime
    pub workers: usize,
    /// Heap goal = live bytes * (100 + percent) / 100
    pub reclaim_percent: u64,
    /// Lower bound for the heap goal, in bytes
    pub min_heap_goal: u64,
    pub preempt_slice: Duration,
    /// Index the running executable's ELF symbols
    pub exe_symbols: bool,
    pub thread_name: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get),
            reclaim_percent: DEFAULT_RECLAIM_PERCENT,
            min_heap_goal: DEFAULT_MIN_HEAP_GOAL,
            preempt_slice: DEFAULT_PREEMPT_SLICE,
            exe_symbols: true,
            thread_name: "tether-worker".to_string(),
        }
    }
}

impl HostConfig {
    /// Defaults, overridden by `TETHER_*` environment variables
    ///
    /// Unparsable values are ignored with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        match parse_var(&lookup, "TETHER_WORKERS") {
            Some(0) => warn!("Ignoring TETHER_WORKERS=0: at least one worker is required"),
            Some(workers) => self.workers = workers,
            None => {}
        }
        if let Some(percent) = parse_var(&lookup, "TETHER_RECLAIM_PERCENT") {
            self.reclaim_percent = percent;
        }
        if let Some(raw) = lookup("TETHER_EXE_SYMBOLS") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.exe_symbols = true,
                "0" | "false" | "no" | "off" => self.exe_symbols = false,
                other => warn!("Ignoring TETHER_EXE_SYMBOLS={other}"),
            }
        }
        self
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn with_reclaim_percent(mut self, percent: u64) -> Self {
        self.reclaim_percent = percent;
        self
    }

    #[must_use]
    pub fn with_min_heap_goal(mut self, bytes: u64) -> Self {
        self.min_heap_goal = bytes;
        self
    }

    #[must_use]
    pub fn with_preempt_slice(mut self, slice: Duration) -> Self {
        self.preempt_slice = slice;
        self
    }

    #[must_use]
    pub fn with_exe_symbols(mut self, enabled: bool) -> Self {
        self.exe_symbols = enabled;
        self
    }

    #[must_use]
    pub fn with_thread_name(mut self, name: &str) -> Self {
        self.thread_name = name.to_string();
        self
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {name}={raw}: not a number");
            None
        }
    }
}
