//! # Profiling Registry
//!
//! Periodic and triggered profile delivery to agent callbacks.
//!
//! | Profile          | Rate argument            | Delivered from          |
//! |------------------|--------------------------|-------------------------|
//! | CPU              | Hz (max 10 000)          | sampler thread          |
//! | Task             | Hz, or `snapshot_tasks`  | sampler / caller thread |
//! | Heap             | 1 in N allocations       | allocating thread       |
//! | Worker creation  | 1 in N thread starts     | new worker thread       |
//! | Block            | N blocked nanoseconds    | waking thread           |
//! | Contention       | 1 in N contentions       | contending thread       |
//!
//! Stacks come from the per-unit shadow stack maintained by
//! [`crate::host::enter_frame`] guards.

mod records;
mod registry;
mod sampler;

pub use records::{BlockProfileRecord, MemProfileRecord, StackRecord};
pub use registry::{ProfileCallback, ProfilingRegistry, MAX_SAMPLING_HZ};
pub use sampler::StackSource;
