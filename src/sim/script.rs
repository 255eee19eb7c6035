//! Scripted popup scenarios.
//!
//! A script is a TOML list of steps applied to the current simulated popup:
//!
//! ```toml
//! href = "https://app.test/popup"
//!
//! [[step]]
//! action = "idle"
//! ticks = 4
//!
//! [[step]]
//! action = "navigate_cross_origin"
//! href = "https://login.test/"
//! ```
//!
//! Every step is followed by one watchdog tick (`idle` takes a count; `open`
//! and `close` take none).

use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::anyhow;
use serde::Deserialize;
use tokio::time;
use tracing::{debug, info, warn};

use super::window::SimWindow;
use crate::common::config::{Config, SupervisorSettings};
use crate::companion::Companion;
use crate::model::RecoveryState;
use crate::supervisor::bridge::origin_of;
use crate::supervisor::record::Record;
use crate::supervisor::{Event, EventKind, MessagePort, RecoveryController, TickSource};
use crate::sys::clock::{Clock, ManualClock, TokioClock};
use crate::sys::window::{Window, WindowHandle};

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Script {
    /// Overrides `[supervisor]` from the configuration file.
    #[serde(default)]
    pub supervisor: Option<SupervisorSettings>,
    /// Where freshly opened popups start.
    #[serde(default = "default_href")]
    pub href: String,
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

fn default_href() -> String { "https://app.test/popup".to_string() }

fn one() -> u32 { 1 }

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Idle {
        #[serde(default = "one")]
        ticks: u32,
    },
    Navigate {
        href: String,
    },
    NavigateCrossOrigin {
        href: String,
    },
    UserClose,
    Busy {
        reads: u32,
    },
    Move {
        x: f64,
        y: f64,
    },
    Resize {
        w: f64,
        h: f64,
    },
    /// The popup's companion announces its exit.
    Exit {
        #[serde(default)]
        reason: Option<String>,
    },
    /// The popup's companion reports its geometry.
    SyncUiState,
    /// The next factory call fails.
    FailFactory,
    Open,
    Close,
}

impl Step {
    fn ticks(&self) -> u32 {
        match self {
            Step::Idle { ticks } => *ticks,
            Step::Open | Step::Close => 0,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimReport {
    pub events: Vec<String>,
    pub kinds: Vec<EventKind>,
    pub windows_opened: usize,
    pub ticks: u32,
    pub errors: Vec<String>,
    pub final_state: RecoveryState,
}

/// One line per event, for the CLI and for assertions.
pub fn describe(event: &Event) -> String {
    match event {
        Event::Open { reason, state, .. } => {
            format!("open reason={reason} at={}", state.last_good_at)
        }
        Event::Closed {
            by_manager,
            exit_signaled,
            ..
        } => format!("closed by_manager={by_manager} exit_signaled={exit_signaled}"),
        Event::Lost { lost_for_ms, state } => format!(
            "lost lost_for_ms={lost_for_ms} last_seen={}",
            state.last_seen_href.as_deref().unwrap_or("-")
        ),
        Event::Recovered { state, .. } => format!(
            "recovered bounds={:?},{:?} {:?}x{:?}",
            state.bounds.x, state.bounds.y, state.bounds.w, state.bounds.h
        ),
        Event::Exit { reason, .. } => {
            format!("exit reason={}", reason.as_deref().unwrap_or("-"))
        }
    }
}

struct Simulation {
    controller: RecoveryController,
    windows: Rc<RefCell<Vec<SimWindow>>>,
    companions: Vec<Companion<SimWindow, MessagePort>>,
    fail_next: Rc<Cell<bool>>,
    events: Rc<RefCell<Vec<Event>>>,
    origin: String,
    config: Config,
    errors: Vec<String>,
}

impl Simulation {
    fn new(script: &Script, config: &Config, ticks: TickSource, clock: Rc<dyn Clock>) -> Self {
        let settings = script.supervisor.clone().unwrap_or_else(|| config.supervisor.clone());
        let windows: Rc<RefCell<Vec<SimWindow>>> = Rc::default();
        let fail_next = Rc::new(Cell::new(false));

        let factory_windows = windows.clone();
        let factory_fail = fail_next.clone();
        let href = script.href.clone();
        let factory = move |state: &RecoveryState| -> anyhow::Result<Option<Window>> {
            if factory_fail.replace(false) {
                return Err(anyhow!("scripted factory failure"));
            }
            let mut windows = factory_windows.borrow_mut();
            let window = SimWindow::new(&format!("popup-{}", windows.len() + 1), &href);
            // Put the replacement where the previous popup was last seen.
            let b = state.bounds;
            if let (Some(x), Some(y)) = (b.x, b.y) {
                window.move_to(x, y)?;
            }
            if let (Some(w), Some(h)) = (b.w, b.h) {
                window.resize_to(w, h)?;
            }
            windows.push(window.clone());
            Ok(Some(Rc::new(window) as Window))
        };

        let controller = RecoveryController::builder(factory)
            .settings(settings)
            .clock(clock)
            .ticks(ticks)
            .on_tick_error(|err| warn!(%err, "simulated tick failed"))
            .build();

        let events: Rc<RefCell<Vec<Event>>> = Rc::default();
        let sink = events.clone();
        controller.on_any(move |event| {
            info!("{}", describe(event));
            sink.borrow_mut().push(event.clone());
        });

        Self {
            controller,
            windows,
            companions: Vec::new(),
            fail_next,
            events,
            origin: origin_of(&script.href).unwrap_or(script.href.as_str()).to_string(),
            config: config.clone(),
            errors: Vec::new(),
        }
    }

    fn current(&self) -> Option<SimWindow> { self.windows.borrow().last().cloned() }

    fn companion(&mut self) -> Option<&Companion<SimWindow, MessagePort>> {
        let windows = self.windows.borrow();
        while self.companions.len() < windows.len() {
            let window = windows[self.companions.len()].clone();
            self.companions.push(Companion::new(
                window,
                self.controller.message_port(),
                self.origin.clone(),
                self.config.companion.clone(),
            ));
        }
        self.companions.last()
    }

    fn open(&mut self, reason: &str) {
        if let Err(err) = self.controller.open_with_reason(reason) {
            warn!(%err, "open failed");
            self.errors.push(err.to_string());
        }
    }

    fn apply(&mut self, step: &Step) {
        debug!(?step, "applying step");
        let window = self.current();
        match step {
            Step::Idle { .. } => {}
            Step::Open => self.open("script"),
            Step::Close => self.controller.close(),
            Step::FailFactory => self.fail_next.set(true),
            Step::Exit { reason } => {
                if let Some(companion) = self.companion() {
                    companion.on_page_hide(reason.as_deref());
                }
            }
            Step::SyncUiState => {
                if let Some(companion) = self.companion() {
                    companion.report_ui_state();
                }
            }
            _ => {
                let Some(window) = window else {
                    warn!(?step, "no popup to apply step to");
                    return;
                };
                let result = match step {
                    Step::Navigate { href } => {
                        window.navigate(href);
                        Ok(())
                    }
                    Step::NavigateCrossOrigin { href } => {
                        window.navigate_cross_origin(href);
                        Ok(())
                    }
                    Step::UserClose => {
                        window.user_close();
                        Ok(())
                    }
                    Step::Busy { reads } => {
                        window.set_busy_reads(*reads);
                        Ok(())
                    }
                    Step::Move { x, y } => window.move_to(*x, *y),
                    Step::Resize { w, h } => window.resize_to(*w, *h),
                    _ => Ok(()),
                };
                if let Err(err) = result {
                    warn!(%err, ?step, "step had no effect");
                }
            }
        }
    }

    fn tick(&mut self) {
        if let Err(err) = self.controller.tick() {
            warn!(%err, "tick failed");
            self.errors.push(err.to_string());
        }
    }

    fn report(self, ticks: u32) -> SimReport {
        let events = self.events.borrow();
        SimReport {
            events: events.iter().map(describe).collect(),
            kinds: events.iter().map(Event::kind).collect(),
            windows_opened: self.windows.borrow().len(),
            ticks,
            errors: self.errors,
            final_state: self.controller.state(),
        }
    }
}

impl Script {
    pub fn read(path: &Path) -> anyhow::Result<Script> {
        let buf = std::fs::read_to_string(path)?;
        Self::parse(&buf)
    }

    pub fn parse(buf: &str) -> anyhow::Result<Script> { Ok(toml::from_str(buf)?) }

    /// Runs the script with a manual clock, one poll period per tick.
    pub fn run(&self, config: &Config, record: Option<Record>) -> SimReport {
        let clock = Rc::new(ManualClock::new(0));
        let mut sim = Simulation::new(self, config, TickSource::Manual, clock.clone());
        if let Some(record) = record {
            record.attach(&sim.controller);
        }
        let poll_ms = sim.controller.settings().poll_ms;

        sim.open("initial");
        let mut ticks = 0;
        for step in &self.steps {
            sim.apply(step);
            for _ in 0..step.ticks() {
                clock.advance(poll_ms);
                sim.tick();
                ticks += 1;
            }
        }
        sim.report(ticks)
    }

    /// Runs the script against the timer-driven watchdog on tokio's clock.
    /// Each step waits as many poll periods as it would tick. Must be awaited
    /// inside a `tokio::task::LocalSet`.
    pub async fn run_realtime(
        &self,
        config: &Config,
        record: Option<Record>,
        stop: Arc<AtomicBool>,
    ) -> SimReport {
        let mut sim = Simulation::new(self, config, TickSource::Timer, Rc::new(TokioClock::new()));
        if let Some(record) = record {
            record.attach(&sim.controller);
        }
        let period = sim.controller.settings().poll_interval();

        sim.open("initial");
        let mut ticks = 0;
        for step in &self.steps {
            if stop.load(Ordering::SeqCst) {
                info!("interrupted");
                break;
            }
            sim.apply(step);
            for _ in 0..step.ticks() {
                time::sleep(period).await;
                ticks += 1;
            }
        }
        sim.controller.close();
        sim.report(ticks)
    }
}
