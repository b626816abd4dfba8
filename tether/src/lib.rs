//! # tether - Runtime Instrumentation Interface
//!
//! tether lets a monitoring agent attach to an instrumented async host and
//! observe its execution units, its managed-heap reclaimer and its
//! synchronization waits, without handing the agent any pointer into host
//! structures.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Host program                            │
//! │        units (async tasks), managed allocations, locks          │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ instrumented polls, wakes, cycles
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     host (tokio runtime)                        │
//! │  Instrumented futures • UnitTable • Reclaimer • annotations     │
//! └───────┬───────────────────┬───────────────────┬─────────────────┘
//!         │ EventRecord       │ profile records   │ queries / calls
//!         ▼                   ▼                   ▼
//! ┌──────────────┐   ┌──────────────────┐   ┌──────────────────────┐
//! │   EventBus   │   │ ProfilingRegistry│   │ SymbolResolver       │
//! │ (44 kinds)   │   │ (6 profiles)     │   │ TaskLocalStore       │
//! └──────┬───────┘   └────────┬─────────┘   │ ReflectiveInvoker    │
//!        │                    │             └──────────┬───────────┘
//!        └────────────────────┴────────── Env ─────────┘
//!                                          │
//!                                          ▼
//!                             Agent (initialize / shutdown)
//! ```
//!
//! ## Module Structure
//!
//! - [`host`]: the instrumented runtime, its builder and the waiting
//!   primitives host code uses to report why it waits
//! - [`env`]: the single handle an agent receives
//! - [`events`]: typed event channels, one handler slot per kind
//! - [`profiling`]: periodic and triggered profile delivery
//! - [`symbolization`]: symbol index, type descriptors, DWARF frames
//! - [`task_local`]: per-unit agent storage
//! - [`invoke`]: reflective calls with panic containment
//! - [`agent`]: the agent contract, sessions and the recording agent
//! - [`export`], [`analysis`]: Chrome trace output and hotspot aggregation
//! - [`config`], [`cli`], [`domain`]: configuration, arguments, shared types
//!
//! ## Typical Usage
//!
//! ```no_run
//! use tether::agent::{ProfileRates, RecordingAgent, Session};
//! use tether::{HostBuilder, HostConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let host = HostBuilder::new(HostConfig::from_env()).build()?;
//! let agent = RecordingAgent::new(ProfileRates { cpu_hz: 99, ..ProfileRates::default() });
//! let recorder = agent.recorder();
//! let mut session = Session::attach(host.env(), Box::new(agent))?;
//!
//! let handle = host.handle();
//! session.run(|| host.block_on(async move {
//!     handle.spawn(async { 1 + 1 }).await
//! }))?;
//! println!("{} events", recorder.event_count());
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod analysis;
pub mod cli;
pub mod config;
pub mod domain;
pub mod env;
pub mod events;
pub mod export;
pub mod host;
pub mod invoke;
pub mod profiling;
pub mod symbolization;
pub mod task_local;
pub mod workload;

pub use config::HostConfig;
pub use env::Env;
pub use host::{Host, HostBuilder, HostHandle};
