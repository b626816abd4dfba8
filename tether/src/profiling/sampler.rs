use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel::{select, tick, Sender};
use log::debug;

use crate::domain::{Address, UnitId, WorkerId};

/// Where periodic samplers read unit stacks from
pub trait StackSource: Send + Sync {
    /// Units currently being polled, with the worker polling them
    fn running_stacks(&self) -> Vec<(UnitId, Option<WorkerId>, Vec<Address>)>;

    /// Every live unit
    fn live_stacks(&self) -> Vec<(UnitId, Option<WorkerId>, Vec<Address>)>;
}

/// Background thread calling `tick` at a fixed frequency
///
/// Dropping the sampler stops the thread and waits for it, unless the drop
/// happens on the sampler thread itself (a callback replacing its own profile).
pub(crate) struct Sampler {
    name: &'static str,
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Sampler {
    pub(crate) fn spawn(
        name: &'static str,
        hz: u64,
        mut on_tick: impl FnMut() + Send + 'static,
    ) -> std::io::Result<Self> {
        let period = Duration::from_nanos(1_000_000_000 / hz.max(1));
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);

        let thread = thread::Builder::new().name(format!("tether-{name}-prof")).spawn(move || {
            let ticker = tick(period);
            loop {
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(ticker) -> _ => on_tick(),
                }
            }
        })?;
        debug!("Started {name} sampler at {hz} Hz");

        Ok(Self { name, stop: Some(stop_tx), thread: Some(thread) })
    }

    fn thread_id(&self) -> Option<ThreadId> {
        self.thread.as_ref().map(|t| t.thread().id())
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        // Disconnecting the channel wakes the select
        drop(self.stop.take());
        if self.thread_id() == Some(thread::current().id()) {
            debug!("Detaching {} sampler from its own thread", self.name);
            return;
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        debug!("Stopped {} sampler", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_sampler_ticks_until_dropped() {
        let ticks = Arc::new(AtomicU64::new(0));
        let t = Arc::clone(&ticks);
        let sampler = Sampler::spawn("test", 1000, move || {
            t.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();

        std::thread::sleep(Duration::from_millis(50));
        drop(sampler);
        let after_stop = ticks.load(Ordering::Relaxed);
        assert!(after_stop > 0);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(ticks.load(Ordering::Relaxed), after_stop);
    }
}
