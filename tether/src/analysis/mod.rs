//! Analysis of collected profiles
//!
//! Pure aggregation over recorded samples, kept apart from the demo binary's
//! presentation.

pub mod hotspot;

pub use hotspot::{FunctionHotspot, HotspotStats};
