//! Recording of emitted events, one RON value per line.
//!
//! The first line holds the supervisor settings the events were produced
//! with.

use std::cell::RefCell;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use super::{Event, RecoveryController, Subscription};
use crate::common::config::SupervisorSettings;
use crate::model::RecoveryState;

pub struct Record {
    file: Option<File>,
}

impl Record {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        Ok(Self { file: Some(File::create(path)?) })
    }

    pub fn disabled() -> Self { Self { file: None } }

    pub fn start(&mut self, settings: &SupervisorSettings) {
        let Some(file) = self.file.as_mut() else { return };
        let result = ron::ser::to_string(settings)
            .map_err(anyhow::Error::from)
            .and_then(|line| Ok(writeln!(file, "{line}")?));
        if let Err(err) = result {
            warn!(%err, "failed to write recording header; recording disabled");
            self.file = None;
        }
    }

    pub fn on_event(&mut self, event: &Event) {
        let Some(file) = self.file.as_mut() else { return };
        let result = ron::ser::to_string(event)
            .map_err(anyhow::Error::from)
            .and_then(|line| Ok(writeln!(file, "{line}")?));
        if let Err(err) = result {
            warn!(%err, kind = %event.kind(), "failed to record event; recording disabled");
            self.file = None;
        }
    }

    /// Writes the header and records every event the controller emits from
    /// now on.
    pub fn attach(mut self, controller: &RecoveryController) -> Subscription {
        self.start(controller.settings());
        let record = RefCell::new(self);
        controller.on_any(move |event| record.borrow_mut().on_event(event))
    }
}

/// An event read back from a recording. Window handles are not recorded.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RecordedEvent {
    Open {
        reason: String,
        state: RecoveryState,
    },
    Closed {
        by_manager: bool,
        exit_signaled: bool,
        state: RecoveryState,
    },
    Lost {
        lost_for_ms: u64,
        state: RecoveryState,
    },
    Recovered {
        state: RecoveryState,
    },
    Exit {
        reason: Option<String>,
        state: RecoveryState,
    },
}

pub fn load(path: &Path) -> anyhow::Result<(SupervisorSettings, Vec<RecordedEvent>)> {
    let mut lines = BufReader::new(File::open(path)?).lines();
    let Some(header) = lines.next() else {
        anyhow::bail!("empty recording: {}", path.display());
    };
    let settings = ron::de::from_str(&header?)?;
    let mut events = Vec::new();
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        events.push(ron::de::from_str(&line)?);
    }
    Ok((settings, events))
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use pretty_assertions::assert_eq;
    use tempfile::NamedTempFile;

    use super::*;
    use crate::sim::SimWindow;
    use crate::supervisor::TickSource;
    use crate::sys::clock::ManualClock;
    use crate::sys::window::Window;

    #[test]
    fn recording_round_trips_through_load() {
        let temp = NamedTempFile::new().unwrap();
        let settings = SupervisorSettings {
            poll_ms: 100,
            ..Default::default()
        };
        let clock = Rc::new(ManualClock::new(1_000));
        let popup = SimWindow::new("popup", "https://app.test/");
        let handle = popup.clone();
        let controller = RecoveryController::builder(move |_| Ok(Some(Rc::new(handle.clone()) as Window)))
            .settings(settings.clone())
            .clock(clock.clone())
            .ticks(TickSource::Manual)
            .build();
        Record::create(temp.path()).unwrap().attach(&controller);

        controller.open().unwrap();
        popup.user_close();
        clock.advance(100);
        controller.tick().unwrap();

        let (loaded_settings, events) = load(temp.path()).unwrap();
        assert_eq!(loaded_settings, settings);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], RecordedEvent::Open { reason, state } if reason == "initial" && state.last_good_at == 1_000));
        assert!(matches!(&events[1], RecordedEvent::Closed { by_manager: false, exit_signaled: false, .. }));
    }

    #[test]
    fn disabled_record_writes_nothing() {
        let mut record = Record::disabled();
        record.start(&SupervisorSettings::default());
        record.on_event(&Event::Lost {
            lost_for_ms: 0,
            state: RecoveryState::default(),
        });
        assert!(record.file.is_none());
    }

    #[test]
    fn load_rejects_empty_file() {
        let temp = NamedTempFile::new().unwrap();
        assert!(load(temp.path()).is_err());
    }
}
