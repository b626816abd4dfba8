//! Trace export
//!
//! Turns what a [`crate::agent::RecordingAgent`] collected into Chrome Trace
//! Event JSON, viewable in `chrome://tracing` or Perfetto.

pub mod chrome_trace;

pub use chrome_trace::ChromeTraceExporter;
