//! # tether - Demo Entry Point
//!
//! Starts an instrumented host, attaches a recording agent, runs the demo
//! workload and reports what the agent saw:
//! - event counts per kind and profile sample counts
//! - CPU hotspots resolved through the symbol resolver
//! - a reflective call and a contained panic through the invoker
//! - optionally, a Chrome trace (`--export trace.json`)

// Statistics output converts counts for display
#![allow(clippy::cast_precision_loss)]

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::time::Duration;

use tether::agent::{ProfileRates, Recorder, RecordingAgent, Session};
use tether::analysis::HotspotStats;
use tether::cli::Args;
use tether::export::ChromeTraceExporter;
use tether::invoke::frame;
use tether::workload::{self, WorkloadOptions};
use tether::{Env, HostBuilder, HostConfig};
use tether_common::{EventKind, EXIT_UNRECOVERED_FAILURE};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_ERROR
        }
    });
}

fn run() -> Result<i32> {
    let args = Args::parse();

    let mut config = HostConfig::from_env();
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    let mut builder = HostBuilder::new(config);
    workload::register(&mut builder);
    let host = builder.build().context("Failed to start host")?;

    let agent = RecordingAgent::new(ProfileRates {
        cpu_hz: args.cpu_hz,
        task_hz: 0,
        heap_one_in: args.heap_rate,
        worker_one_in: 1,
        block_nanos: args.block_rate,
        contention_one_in: args.contention_rate,
    });
    let recorder = agent.recorder();
    let env = host.env();
    let mut session =
        Session::attach(env.clone(), Box::new(agent)).context("Failed to attach agent")?;

    let options =
        WorkloadOptions { units: args.units, duration: Duration::from_millis(args.duration) };
    let handle = host.handle();
    let summary = match session.run(|| host.block_on(workload::run(handle, options))) {
        Ok(summary) => summary,
        Err(report) => {
            eprintln!("error: workload failed: {report}");
            return Ok(EXIT_UNRECOVERED_FAILURE);
        }
    };
    info!("{summary:?}");

    // Stop sampling, then exercise the invoker from the agent side
    env.profiler().register_cpu_profile(0, |_| {}).context("Failed to stop CPU profile")?;
    demo_invoker(&env, args.quiet);

    host.shutdown(Duration::from_secs(1));
    session.shutdown(EXIT_SUCCESS);

    if !args.quiet {
        print_statistics(&recorder);
        print_hotspots(&recorder, &env, args.top);
    }

    if let Some(path) = &args.export {
        let mut exporter = ChromeTraceExporter::new(std::process::id());
        for record in recorder.events() {
            exporter.add_event(&record);
        }
        exporter.add_cpu_samples(&recorder.cpu_samples(), env.symbols());
        exporter
            .write_to_file(path)
            .with_context(|| format!("Failed to export {}", path.display()))?;
        if !args.quiet {
            println!("\nTrace written to {} ({} events)", path.display(), exporter.event_count());
        }
    }

    Ok(EXIT_SUCCESS)
}

fn demo_invoker(env: &Env, quiet: bool) {
    let mut buf = [0u8; workload::FRAME_SIZE];
    frame::write_u64(&mut buf, 0, 0xdead_beef);

    match env.symbols().function_by_name(workload::CHECKSUM) {
        Some(desc) => match env.invoker().call(&desc, &mut buf) {
            Ok(()) if !quiet => println!("{} -> {}", desc.name(), frame::read_u64(&buf, 8)),
            Ok(()) => {}
            Err(e) => warn!("Reflective call failed: {e}"),
        },
        None => warn!("{} is not registered", workload::CHECKSUM),
    }

    if let Some(desc) = env.symbols().function_by_name(workload::EXPLODE) {
        match env.invoker().call(&desc, &mut buf) {
            Err(e) if !quiet => println!("{e} (contained)"),
            Err(_) => {}
            Ok(()) => warn!("{} returned normally", desc.name()),
        }
    }
}

fn print_statistics(recorder: &Recorder) {
    let counts = recorder.counts();
    println!("\n=== Events ({} total) ===", recorder.event_count());
    for kind in EventKind::ALL {
        if let Some(count) = counts.get(&kind) {
            println!("  {:<26} {count:>8}", kind.name());
        }
    }

    println!("\n=== Profiles ===");
    println!("  {:<26} {:>8}", "cpu samples", recorder.cpu_samples().len());
    println!("  {:<26} {:>8}", "heap samples", recorder.heap_samples().len());
    println!("  {:<26} {:>8}", "worker creations", recorder.worker_samples().len());
    let block = recorder.block_samples();
    let blocked_ms = block.iter().map(|r| r.nanos).sum::<u64>() as f64 / 1e6;
    println!("  {:<26} {:>8} ({blocked_ms:.1} ms blocked)", "block samples", block.len());
    println!("  {:<26} {:>8}", "contention samples", recorder.contention_samples().len());
}

fn print_hotspots(recorder: &Recorder, env: &Env, top: usize) {
    let mut stats = HotspotStats::new();
    stats.record_samples(&recorder.cpu_samples(), env.symbols());
    if stats.total_samples() == 0 {
        return;
    }

    println!("\n=== Hotspots ({} samples) ===", stats.total_samples());
    for hotspot in stats.to_hotspots().into_iter().take(top) {
        let location = match (&hotspot.file, hotspot.line) {
            (Some(file), Some(line)) => format!("  {file}:{line}"),
            _ => String::new(),
        };
        println!("  {:>5.1}%  {:<32}{location}", hotspot.percentage, hotspot.name);
    }
}
