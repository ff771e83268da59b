//! Monotonic time source, injectable for tests.

use std::sync::Arc;
use std::time::Instant;

/// Nanosecond monotonic clock shared by the tracker and its sensors.
pub trait Clock: Send + Sync {
    fn now_ns(&self) -> u64;
}

/// Wall monotonic clock anchored at construction.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            origin: Instant::now(),
        })
    }
}

impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}
