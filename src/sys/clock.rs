use std::cell::Cell;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

/// Source of millisecond timestamps for tick bookkeeping.
pub trait Clock {
    fn now_ms(&self) -> u64;

    /// The timestamp of a timer deadline. Clocks that do not follow tokio's
    /// timer ignore the deadline and report the current time.
    fn at(&self, deadline: Instant) -> u64 {
        let _ = deadline;
        self.now_ms()
    }
}

/// Monotonic milliseconds on tokio's clock, offset so that timestamps start
/// at the wall-clock time of construction.
///
/// Timer-driven ticks are stamped with their scheduled deadline, so grace
/// periods are counted in exact poll periods. Follows paused time in tests.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: Instant,
    origin_ms: u64,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            origin_ms: SystemClock.now_ms(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self { Self::new() }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> u64 { self.at(Instant::now()) }

    fn at(&self, deadline: Instant) -> u64 {
        let elapsed = deadline.saturating_duration_since(self.origin).as_millis() as u64;
        self.origin_ms.saturating_add(elapsed)
    }
}

/// Wall-clock milliseconds since the unix epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// A clock that only moves when told to. Used by the simulator and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self { Self { now: Cell::new(start_ms) } }

    pub fn advance(&self, ms: u64) { self.now.set(self.now.get().saturating_add(ms)); }

    pub fn set(&self, ms: u64) { self.now.set(ms); }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 { self.now.get() }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn manual_clock_only_moves_when_advanced() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance(250);
        assert_eq!(clock.now_ms(), 1_250);
        clock.advance(u64::MAX);
        assert_eq!(clock.now_ms(), u64::MAX);
        clock.set(5);
        assert_eq!(clock.now_ms(), 5);
    }

    #[test]
    fn system_clock_is_after_epoch() {
        assert!(SystemClock.now_ms() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_follows_paused_time() {
        let clock = TokioClock::new();
        let start = clock.now_ms();
        tokio::time::sleep(Duration::from_millis(750)).await;
        assert_eq!(clock.now_ms(), start + 750);
        let deadline = Instant::now() + Duration::from_millis(250);
        assert_eq!(clock.at(deadline), start + 1_000);
    }
}
