//! The helper that runs inside the popup's own content.
//!
//! Once the popup navigates cross-origin its opener can no longer read much
//! of it. The companion keeps a cooperative channel open: it announces a
//! deliberate departure on page-hide and periodically reports its geometry.
//! Page-hide is used instead of unload, which does not fire reliably.

use std::cell::Cell;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::common::config::CompanionSettings;
use crate::model::Bounds;
use crate::supervisor::{MessageTarget, PopupMessage};

/// What the popup's content knows about itself.
pub trait SurfaceProbe {
    fn current_bounds(&self) -> Bounds;
    fn current_name(&self) -> Option<String>;
}

pub struct Companion<P, T> {
    probe: P,
    target: T,
    origin: String,
    settings: CompanionSettings,
    hidden: Cell<bool>,
}

impl<P: SurfaceProbe, T: MessageTarget> Companion<P, T> {
    pub fn new(probe: P, target: T, origin: impl Into<String>, settings: CompanionSettings) -> Self {
        Self {
            probe,
            target,
            origin: origin.into(),
            settings,
            hidden: Cell::new(false),
        }
    }

    /// Page-hide handler. Posts the exit signal the first time only and
    /// returns whether it did.
    pub fn on_page_hide(&self, reason: Option<&str>) -> bool {
        if self.hidden.replace(true) {
            return false;
        }
        debug!(?reason, "page hidden; announcing exit");
        self.post(&PopupMessage::Exit {
            reason: reason.map(str::to_string),
        });
        true
    }

    /// Posts the current geometry. Does nothing once the page is hidden or if
    /// reporting is disabled.
    pub fn report_ui_state(&self) -> bool {
        if self.is_hidden() || !self.settings.report_ui_state {
            return false;
        }
        self.post(&PopupMessage::UiState {
            bounds: self.probe.current_bounds(),
            name: self.probe.current_name(),
        });
        true
    }

    pub fn is_hidden(&self) -> bool { self.hidden.get() }

    /// Reports the UI state every `sync_interval_ms` until cancelled or the
    /// page is hidden.
    pub async fn run(&self, cancel: CancellationToken) {
        if !self.settings.report_ui_state {
            return;
        }
        let period = self.settings.sync_interval();
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if !self.report_ui_state() {
                        break;
                    }
                }
            }
        }
    }

    fn post(&self, message: &PopupMessage) {
        match serde_json::to_value(message) {
            Ok(data) => self.target.post_message(&self.origin, data),
            Err(err) => warn!(%err, "failed to encode popup message"),
        }
    }
}
