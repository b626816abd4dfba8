use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::domain::Timestamp;

/// Process-wide event clock
///
/// Readings are nanoseconds since the clock was created and never go backwards,
/// even when two threads read it concurrently.
#[derive(Debug)]
pub struct Clock {
    epoch: Instant,
    last: AtomicU64,
}

impl Default for Clock {
    fn default() -> Self {
        Self { epoch: Instant::now(), last: AtomicU64::new(0) }
    }
}

impl Clock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current reading, at least as large as every earlier one
    pub fn now(&self) -> Timestamp {
        let elapsed = u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX);
        let prev = self.last.fetch_max(elapsed, Ordering::AcqRel);
        Timestamp(prev.max(elapsed))
    }
}
