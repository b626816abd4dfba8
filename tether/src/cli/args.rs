//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "tether",
    about = "Run an instrumented demo workload with a recording agent attached",
    after_help = "\
EXAMPLES:
    tether                                   Run the workload, print statistics
    tether --export trace.json               Also write a Chrome trace
    tether --units 32 --duration 2000        Heavier, longer run
    RUST_LOG=debug tether --workers 2        Verbose host logging on two workers"
)]
pub struct Args {
    /// Export the recorded trace to FILE (Chrome Trace Event JSON)
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Run the workload for N milliseconds
    #[arg(long, default_value = "500")]
    pub duration: u64,

    /// Number of concurrent workload units
    #[arg(long, default_value = "8")]
    pub units: usize,

    /// Worker threads (defaults to TETHER_WORKERS or the available parallelism)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// CPU profile sampling rate in Hz (0 = off)
    #[arg(long, default_value = "99")]
    pub cpu_hz: u64,

    /// Sample one in N managed allocations (0 = off)
    #[arg(long, default_value = "16")]
    pub heap_rate: u64,

    /// Sample blocked waits every N nanoseconds of blocked time (0 = off)
    #[arg(long, default_value = "1")]
    pub block_rate: u64,

    /// Sample one in N lock contentions (0 = off)
    #[arg(long, default_value = "1")]
    pub contention_rate: u64,

    /// Number of hotspots to print
    #[arg(long, default_value = "10")]
    pub top: usize,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}
