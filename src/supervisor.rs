//! The recovery controller keeps one popup alive on behalf of the host.
//!
//! It opens the popup through a caller-supplied factory, polls it, and
//! recreates it once its location has been unreadable for longer than the
//! configured grace period. A cross-origin navigation, a slow page load and a
//! dead surface all look the same from the outside, so the grace period is the
//! only knob.
//!
//! Everything here is single threaded. No internal borrow is held while user
//! code (the factory, event handlers, window handles) runs, so handlers may
//! call back into the controller.

pub mod bridge;
pub mod error;
pub mod events;
pub mod record;
pub mod tracker;
mod watchdog;


use std::cell::RefCell;
use std::fmt;
use std::ops::ControlFlow;
use std::rc::{Rc, Weak};

pub use bridge::{Envelope, MessageTarget, OriginPolicy, PopupMessage};
use bridge::{Folded, MessageBridge};
pub use error::Error;
pub use events::{Event, EventEmitter, EventKind, Subscription};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use tracker::StateTracker;
use watchdog::Watchdog;

use crate::common::config::SupervisorSettings;
use crate::model::RecoveryState;
use crate::sys::clock::{Clock, TokioClock};
use crate::sys::window::{Window, WindowHandle};

pub const INITIAL_REASON: &str = "initial";
pub const RECOVERY_REASON: &str = "recovery";

/// Creates the popup. Receives the last tracked state so that a recreated
/// popup can be placed where the old one was. Returning `Ok(None)` is a
/// configuration error.
pub type Factory = Box<dyn Fn(&RecoveryState) -> anyhow::Result<Option<Window>>>;

type TickErrorHandler = Box<dyn Fn(&Error)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TickSource {
    /// A `tokio` interval on the current `LocalSet`.
    #[default]
    Timer,
    /// The host calls [`RecoveryController::tick`].
    Manual,
}

pub struct Builder {
    factory: Factory,
    settings: SupervisorSettings,
    clock: Rc<dyn Clock>,
    ticks: TickSource,
    origins: Option<OriginPolicy>,
    on_tick_error: Option<TickErrorHandler>,
}

impl Builder {
    pub fn settings(mut self, settings: SupervisorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ticks(mut self, ticks: TickSource) -> Self {
        self.ticks = ticks;
        self
    }

    /// Replaces the origin filter derived from the settings.
    pub fn allow_origin_if(mut self, predicate: impl Fn(&str) -> bool + 'static) -> Self {
        self.origins = Some(OriginPolicy::Custom(Rc::new(predicate)));
        self
    }

    /// Called when a timer-driven tick fails. Defaults to logging the error.
    pub fn on_tick_error(mut self, handler: impl Fn(&Error) + 'static) -> Self {
        self.on_tick_error = Some(Box::new(handler));
        self
    }

    pub fn build(self) -> RecoveryController {
        let origins = self.origins.unwrap_or_else(|| OriginPolicy::from_settings(&self.settings));
        if origins.is_unrestricted() {
            debug!("no origin filter configured; popup messages from any origin are accepted");
        }
        RecoveryController {
            shared: Rc::new(Shared {
                settings: self.settings,
                factory: self.factory,
                clock: self.clock,
                ticks: self.ticks,
                emitter: EventEmitter::new(),
                on_tick_error: self.on_tick_error,
                inner: RefCell::new(Inner {
                    window: None,
                    state: RecoveryState::default(),
                    generation: 0,
                    watchdog: None,
                    bridge: MessageBridge::new(origins),
                }),
            }),
        }
    }
}

struct Shared {
    settings: SupervisorSettings,
    factory: Factory,
    clock: Rc<dyn Clock>,
    ticks: TickSource,
    emitter: EventEmitter,
    on_tick_error: Option<TickErrorHandler>,
    inner: RefCell<Inner>,
}

struct Inner {
    window: Option<Window>,
    state: RecoveryState,
    // Bumped whenever polling starts or stops. Work tagged with an older
    // value is stale and must not touch the state.
    generation: u64,
    watchdog: Option<Watchdog>,
    bridge: MessageBridge,
}

impl Inner {
    fn is_polling(&self, generation: Option<u64>) -> bool {
        self.watchdog.is_some() && generation.is_none_or(|g| g == self.generation)
    }

    fn stop(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.stop();
        }
        self.bridge.stop();
        self.generation += 1;
    }
}

fn close_best_effort(window: &dyn WindowHandle) {
    if let Err(err) = window.close() {
        debug!(%err, "ignoring failure to close popup");
    }
}

impl Shared {
    fn open_window(self: &Rc<Self>, reason: &str, announce: bool) -> Result<Window, Error> {
        let (previous, state) = {
            let mut inner = self.inner.borrow_mut();
            inner.stop();
            inner.state.exit_signaled = false;
            (inner.window.take(), inner.state.clone())
        };
        if let Some(previous) = previous {
            close_best_effort(&*previous);
        }

        let window = match (self.factory)(&state) {
            Ok(Some(window)) => window,
            Ok(None) => return Err(Error::Configuration),
            Err(err) => return Err(Error::Factory(err)),
        };

        // `spawn_local` panics outside a `LocalSet`; nothing is installed yet.
        let generation = self.inner.borrow().generation + 1;
        let watchdog = self.start_watchdog(generation);

        let now = self.clock.now_ms();
        let state = {
            let mut inner = self.inner.borrow_mut();
            inner.window = Some(window.clone());
            inner.state.last_good_at = now;
            inner.state.last_loss_at = None;
            inner.generation = generation;
            inner.bridge.start();
            inner.watchdog = Some(watchdog);
            inner.state.clone()
        };
        info!(reason, generation, "popup opened");

        if announce {
            self.emitter.emit(&Event::Open {
                reason: reason.to_string(),
                window: window.clone(),
                state,
            });
        }
        Ok(window)
    }

    fn start_watchdog(self: &Rc<Self>, generation: u64) -> Watchdog {
        match self.ticks {
            TickSource::Manual => Watchdog::manual(),
            TickSource::Timer => {
                let weak: Weak<Shared> = Rc::downgrade(self);
                Watchdog::spawn(self.settings.poll_interval(), generation, move |deadline| {
                    let Some(shared) = weak.upgrade() else {
                        return ControlFlow::Break(());
                    };
                    let now = shared.clock.at(deadline);
                    match shared.tick(Some(generation), now) {
                        Ok(()) => ControlFlow::Continue(()),
                        Err(err) => {
                            shared.report_tick_error(&err);
                            ControlFlow::Break(())
                        }
                    }
                })
            }
        }
    }

    fn report_tick_error(&self, err: &Error) {
        match &self.on_tick_error {
            Some(handler) => handler(err),
            None => error!(%err, "watchdog tick failed"),
        }
    }

    fn tick(self: &Rc<Self>, generation: Option<u64>, now: u64) -> Result<(), Error> {
        let (window, mut snapshot, current) = {
            let inner = self.inner.borrow();
            if !inner.is_polling(generation) {
                return Ok(());
            }
            let Some(window) = inner.window.clone() else {
                return Ok(());
            };
            (window, inner.state.clone(), inner.generation)
        };

        if StateTracker::is_closed(&*window) {
            let event = {
                let mut inner = self.inner.borrow_mut();
                inner.stop();
                Event::Closed {
                    // Closing through the controller stops polling first.
                    by_manager: false,
                    exit_signaled: inner.state.exit_signaled,
                    state: inner.state.clone(),
                }
            };
            warn!(generation = current, "popup was closed");
            self.emitter.emit(&event);
            return Ok(());
        }

        let accessible = StateTracker::snapshot(&*window, &mut snapshot);
        let lost_for = {
            let mut inner = self.inner.borrow_mut();
            if inner.generation != current {
                return Ok(());
            }
            let state = &mut inner.state;
            state.bounds = snapshot.bounds;
            state.name = snapshot.name;
            state.last_seen_href = snapshot.last_seen_href;
            if accessible {
                state.last_good_at = state.last_good_at.max(now);
                state.last_loss_at = None;
                None
            } else {
                let since = *state.last_loss_at.get_or_insert(now);
                Some(now.saturating_sub(since))
            }
        };

        let Some(lost_for) = lost_for else {
            if self.settings.debug {
                debug!(generation = current, "popup accessible");
            }
            return Ok(());
        };
        let grace = self.settings.lost_after_ms;
        if grace > 0 && lost_for < grace {
            if self.settings.debug {
                debug!(lost_for, grace, "popup inaccessible; within grace period");
            }
            return Ok(());
        }
        self.recover(lost_for, current)
    }

    fn recover(self: &Rc<Self>, lost_for_ms: u64, generation: u64) -> Result<(), Error> {
        warn!(lost_for_ms, "lost control of popup; recreating");
        let state = self.inner.borrow().state.clone();
        self.emitter.emit(&Event::Lost { lost_for_ms, state });

        if self.inner.borrow().generation != generation {
            debug!("a lost handler reopened or closed the popup; skipping recovery");
            return Ok(());
        }

        let window = self
            .open_window(RECOVERY_REASON, false)
            .map_err(|err| Error::RecoveryFailed { source: Box::new(err) })?;
        let state = self.inner.borrow().state.clone();
        self.emitter.emit(&Event::Recovered { window, state });
        Ok(())
    }

    fn deliver(&self, envelope: &Envelope) {
        let folded = {
            let mut inner = self.inner.borrow_mut();
            let inner = &mut *inner;
            let Some(message) = inner.bridge.accept(envelope) else {
                return;
            };
            match MessageBridge::fold(message, &mut inner.state) {
                Folded::Exit { reason } => Some((reason, inner.state.clone())),
                Folded::UiState => None,
            }
        };
        match folded {
            Some((reason, state)) => {
                info!(?reason, origin = %envelope.origin, "popup announced exit");
                self.emitter.emit(&Event::Exit { reason, state });
            }
            None => {
                if self.settings.debug {
                    debug!(origin = %envelope.origin, "merged popup ui state");
                }
            }
        }
    }
}

/// Supervises a single popup. See the module documentation.
pub struct RecoveryController {
    shared: Rc<Shared>,
}

static_assertions::assert_not_impl_any!(RecoveryController: Send, Sync);

impl RecoveryController {
    pub fn builder(
        factory: impl Fn(&RecoveryState) -> anyhow::Result<Option<Window>> + 'static,
    ) -> Builder {
        Builder {
            factory: Box::new(factory),
            settings: SupervisorSettings::default(),
            clock: Rc::new(TokioClock::new()),
            ticks: TickSource::default(),
            origins: None,
            on_tick_error: None,
        }
    }

    /// Opens the popup, replacing (and closing) any current one.
    ///
    /// # Panics
    ///
    /// With [`TickSource::Timer`], panics if called outside of a
    /// `tokio::task::LocalSet`.
    pub fn open(&self) -> Result<Window, Error> { self.open_with_reason(INITIAL_REASON) }

    #[instrument(skip(self))]
    pub fn open_with_reason(&self, reason: &str) -> Result<Window, Error> {
        self.shared.open_window(reason, true)
    }

    /// Stops polling and message handling and closes the popup. Emits nothing.
    #[instrument(skip(self))]
    pub fn close(&self) {
        let window = {
            let mut inner = self.shared.inner.borrow_mut();
            inner.stop();
            inner.window.clone()
        };
        if let Some(window) = window {
            close_best_effort(&*window);
            info!("popup closed by caller");
        }
    }

    pub fn on(&self, kind: EventKind, handler: impl Fn(&Event) + 'static) -> Subscription {
        self.shared.emitter.on(kind, handler)
    }

    pub fn on_any(&self, handler: impl Fn(&Event) + 'static) -> Subscription {
        self.shared.emitter.on_any(handler)
    }

    /// The current handle. Callers must not close or steer it behind the
    /// controller's back.
    pub fn window(&self) -> Option<Window> { self.shared.inner.borrow().window.clone() }

    pub fn state(&self) -> RecoveryState { self.shared.inner.borrow().state.clone() }

    /// Whether the watchdog and message bridge are running.
    pub fn is_supervising(&self) -> bool { self.shared.inner.borrow().watchdog.is_some() }

    pub fn settings(&self) -> &SupervisorSettings { &self.shared.settings }

    /// Runs one watchdog tick now. A no-op while not supervising.
    pub fn tick(&self) -> Result<(), Error> { self.shared.tick(None, self.shared.clock.now_ms()) }

    pub fn deliver_message(&self, envelope: &Envelope) { self.shared.deliver(envelope) }

    pub fn message_port(&self) -> MessagePort {
        MessagePort {
            shared: Rc::downgrade(&self.shared),
        }
    }
}

impl fmt::Debug for RecoveryController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.borrow();
        f.debug_struct("RecoveryController")
            .field("window", &inner.window)
            .field("state", &inner.state)
            .field("generation", &inner.generation)
            .field("supervising", &inner.watchdog.is_some())
            .finish()
    }
}

/// Delivers messages to a controller without keeping it alive.
#[derive(Clone)]
pub struct MessagePort {
    shared: Weak<Shared>,
}

impl MessagePort {
    /// Returns false if the controller is gone.
    pub fn post(&self, envelope: &Envelope) -> bool {
        match self.shared.upgrade() {
            Some(shared) => {
                shared.deliver(envelope);
                true
            }
            None => false,
        }
    }
}

impl MessageTarget for MessagePort {
    fn post_message(&self, origin: &str, data: Value) {
        self.post(&Envelope::new(origin, data));
    }
}

impl fmt::Debug for MessagePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MessagePort(...)")
    }
}
