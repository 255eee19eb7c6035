use std::ops::ControlFlow;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span};

/// Drives one tick per period until stopped. Each tick is handed the
/// deadline it was scheduled for, not the time it actually ran.
///
/// A manual watchdog has no task behind it; the host calls the controller's
/// `tick` itself. Either way the controller treats the presence of a
/// `Watchdog` as "polling is on".
#[derive(Debug)]
pub(super) struct Watchdog {
    cancel: Option<CancellationToken>,
}

impl Watchdog {
    pub(super) fn manual() -> Self { Self { cancel: None } }

    /// Spawns the polling task on the current `LocalSet`.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a `tokio::task::LocalSet`.
    pub(super) fn spawn(
        period: Duration,
        generation: u64,
        mut tick: impl FnMut(Instant) -> ControlFlow<()> + 'static,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = async move {
            // The first tick is one full period after open.
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    deadline = interval.tick() => {
                        if tick(deadline).is_break() {
                            break;
                        }
                    }
                }
            }
            debug!("watchdog exiting");
        };
        tokio::task::spawn_local(task.instrument(debug_span!("watchdog", generation)));
        Self { cancel: Some(cancel) }
    }

    pub(super) fn stop(&self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) { self.stop(); }
}
