//! Host wall-clock [`Clock`] adapter.

use std::time::Instant;

use crate::ports::Clock;

/// Monotonic seconds since construction, backed by [`std::time::Instant`].
pub struct SystemClock {
    started_at: Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self { started_at: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    fn sleep(&self, millis: u32) {
        std::thread::sleep(std::time::Duration::from_millis(u64::from(millis)));
    }
}
