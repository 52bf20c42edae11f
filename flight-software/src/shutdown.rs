//! Cooperative shutdown flag checked between polls and ticks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep while pacing a loop.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Process-wide request to stop waiting loops.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep until `deadline`, waking early if shutdown is triggered.
    ///
    /// Returns `false` when interrupted by shutdown.
    pub fn sleep_until(&self, deadline: Instant) -> bool {
        loop {
            if self.is_triggered() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}
