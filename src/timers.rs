//! Periodic token emitters feeding the scheduler (§4.9, §9 "Interrupt-
//! driven token flags → event source").
//!
//! The original firmware raised volatile booleans from hardware-timer
//! ISRs (`fw/fw_ecowatt/main/src/peripheral/timers_util.c`); per the
//! spec's redesign note this becomes a host-clock-driven
//! [`TimerSource`] that the supervisor polls between task executions.
//! Ordering between distinct timer sources is not guaranteed; ordering
//! within one source is (since each source tracks its own elapsed
//! time independently).

use crate::ports::Clock;
use crate::scheduler::TaskKind;

/// One periodic timer bound to the task kind it requests.
struct Timer {
    kind: TaskKind,
    interval_secs: u64,
    last_fired_secs: u64,
}

/// A set of independent periodic timers, each emitting its bound
/// [`TaskKind`] once its interval elapses.
pub struct TimerSource {
    timers: Vec<Timer>,
}

impl TimerSource {
    #[must_use]
    pub fn new() -> Self {
        Self { timers: Vec::new() }
    }

    /// Register a periodic timer for `kind`, firing every
    /// `interval_secs` seconds starting from `now`.
    pub fn register(&mut self, kind: TaskKind, interval_secs: u64, now: &dyn Clock) {
        self.timers.push(Timer {
            kind,
            interval_secs: interval_secs.max(1),
            last_fired_secs: now.monotonic_secs(),
        });
    }

    /// Check every registered timer against the current monotonic time,
    /// returning the set of task kinds that fired since the last call.
    /// A timer that fires resets its own elapsed counter, so reads that
    /// are delayed past multiple intervals do not queue duplicate
    /// tokens (the scheduler dedups within a single `queue()` anyway,
    /// but this keeps per-timer bookkeeping honest).
    pub fn poll(&mut self, now: &dyn Clock) -> Vec<TaskKind> {
        let current = now.monotonic_secs();
        let mut fired = Vec::new();
        for timer in &mut self.timers {
            if current.saturating_sub(timer.last_fired_secs) >= timer.interval_secs {
                fired.push(timer.kind);
                timer.last_fired_secs = current;
            }
        }
        fired
    }
}

impl Default for TimerSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FakeClock(Cell<u64>);
    impl Clock for FakeClock {
        fn monotonic_secs(&self) -> u64 {
            self.0.get()
        }
        fn sleep(&self, _millis: u32) {}
    }

    #[test]
    fn fires_once_interval_elapses() {
        let clock = FakeClock(Cell::new(0));
        let mut timers = TimerSource::new();
        timers.register(TaskKind::PollSensors, 5, &clock);

        clock.0.set(3);
        assert!(timers.poll(&clock).is_empty());

        clock.0.set(5);
        assert_eq!(timers.poll(&clock), vec![TaskKind::PollSensors]);

        // Resets after firing; doesn't fire again immediately.
        assert!(timers.poll(&clock).is_empty());
    }

    #[test]
    fn independent_sources_fire_independently() {
        let clock = FakeClock(Cell::new(0));
        let mut timers = TimerSource::new();
        timers.register(TaskKind::PollSensors, 5, &clock);
        timers.register(TaskKind::UploadData, 10, &clock);

        clock.0.set(5);
        assert_eq!(timers.poll(&clock), vec![TaskKind::PollSensors]);

        clock.0.set(10);
        assert_eq!(timers.poll(&clock), vec![TaskKind::UploadData]);
    }
}
