use tracing::trace;

use crate::model::RecoveryState;
use crate::sys::window::{self, WindowHandle};

/// Runs `read` and stores its value in `slot`. On failure the previous value
/// is kept. Returns whether the read succeeded.
pub fn guarded<T>(slot: &mut Option<T>, prop: &'static str, read: impl FnOnce() -> window::Result<T>) -> bool {
    match read() {
        Ok(value) => {
            *slot = Some(value);
            true
        }
        Err(err) => {
            trace!(prop, %err, "guarded read failed; keeping last value");
            false
        }
    }
}

/// Best-effort reads of a window's observable state.
pub struct StateTracker;

impl StateTracker {
    /// Refreshes `state` from `window` and reports whether the window is still
    /// accessible, which means its location could be read.
    pub fn snapshot(window: &dyn WindowHandle, state: &mut RecoveryState) -> bool {
        let bounds = &mut state.bounds;
        guarded(&mut bounds.x, "screen_x", || window.screen_x());
        guarded(&mut bounds.y, "screen_y", || window.screen_y());
        guarded(&mut bounds.w, "outer_width", || window.outer_width());
        guarded(&mut bounds.h, "outer_height", || window.outer_height());
        guarded(&mut state.name, "name", || window.name());
        guarded(&mut state.last_seen_href, "location_href", || window.location_href())
    }

    /// A failed read counts as open.
    pub fn is_closed(window: &dyn WindowHandle) -> bool {
        window.is_closed().unwrap_or_else(|err| {
            trace!(%err, "closed probe failed; assuming open");
            false
        })
    }
}
