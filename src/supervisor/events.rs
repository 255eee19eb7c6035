//! Lifecycle events and the registry that fans them out to subscribers.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use serde::Serialize;
use tracing::trace;

use crate::model::RecoveryState;
use crate::sys::window::Window;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    Open,
    Closed,
    Lost,
    Recovered,
    Exit,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    Open {
        reason: String,
        #[serde(skip)]
        window: Window,
        state: RecoveryState,
    },
    /// The popup was observed closed by the watchdog.
    Closed {
        /// Whether the controller closed the popup itself. Always false when
        /// emitted: `close()` and `open()` stop polling before closing the
        /// old handle, so only closures from elsewhere are ever observed.
        by_manager: bool,
        exit_signaled: bool,
        state: RecoveryState,
    },
    Lost {
        lost_for_ms: u64,
        state: RecoveryState,
    },
    Recovered {
        #[serde(skip)]
        window: Window,
        state: RecoveryState,
    },
    /// The popup's own content announced that it is leaving.
    Exit {
        reason: Option<String>,
        state: RecoveryState,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Open { .. } => EventKind::Open,
            Event::Closed { .. } => EventKind::Closed,
            Event::Lost { .. } => EventKind::Lost,
            Event::Recovered { .. } => EventKind::Recovered,
            Event::Exit { .. } => EventKind::Exit,
        }
    }

    pub fn state(&self) -> &RecoveryState {
        match self {
            Event::Open { state, .. }
            | Event::Closed { state, .. }
            | Event::Lost { state, .. }
            | Event::Recovered { state, .. }
            | Event::Exit { state, .. } => state,
        }
    }
}

pub type Handler = Rc<dyn Fn(&Event)>;

struct Entry {
    id: u64,
    // None matches every kind.
    kind: Option<EventKind>,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<Entry>,
}

/// Publish/subscribe fan-out. Handlers run in subscription order.
///
/// No borrow of the registry is held while a handler runs, so handlers may
/// subscribe, unsubscribe or emit.
#[derive(Clone, Default)]
pub struct EventEmitter {
    registry: Rc<RefCell<Registry>>,
}

impl EventEmitter {
    pub fn new() -> Self { Self::default() }

    pub fn on(&self, kind: EventKind, handler: impl Fn(&Event) + 'static) -> Subscription {
        self.insert(Some(kind), Rc::new(handler))
    }

    pub fn on_any(&self, handler: impl Fn(&Event) + 'static) -> Subscription {
        self.insert(None, Rc::new(handler))
    }

    fn insert(&self, kind: Option<EventKind>, handler: Handler) -> Subscription {
        let mut registry = self.registry.borrow_mut();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.entries.push(Entry { id, kind, handler });
        Subscription {
            id,
            registry: Rc::downgrade(&self.registry),
        }
    }

    pub fn emit(&self, event: &Event) {
        let kind = event.kind();
        let targets: Vec<Handler> = self
            .registry
            .borrow()
            .entries
            .iter()
            .filter(|e| e.kind.is_none_or(|k| k == kind))
            .map(|e| e.handler.clone())
            .collect();
        trace!(%kind, listeners = targets.len(), "emitting");
        for handler in targets {
            handler(event);
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.registry
            .borrow()
            .entries
            .iter()
            .filter(|e| e.kind.is_none_or(|k| k == kind))
            .count()
    }
}

/// Returned by [`EventEmitter::on`]. Dropping it keeps the handler installed.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<RefCell<Registry>>,
}

impl Subscription {
    /// Removes the handler. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut registry = registry.borrow_mut();
        let before = registry.entries.len();
        registry.entries.retain(|e| e.id != self.id);
        registry.entries.len() != before
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use pretty_assertions::assert_eq;
    use strum::IntoEnumIterator;

    use super::*;

    fn closed() -> Event {
        Event::Closed {
            by_manager: false,
            exit_signaled: false,
            state: RecoveryState::default(),
        }
    }

    fn exit(reason: &str) -> Event {
        Event::Exit {
            reason: Some(reason.to_string()),
            state: RecoveryState::default(),
        }
    }

    #[test]
    fn handlers_only_see_their_kind() {
        let emitter = EventEmitter::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        emitter.on(EventKind::Exit, move |e| s.borrow_mut().push(e.kind()));
        let s = seen.clone();
        emitter.on_any(move |e| s.borrow_mut().push(e.kind()));

        emitter.emit(&closed());
        emitter.emit(&exit("nav"));

        assert_eq!(
            *seen.borrow(),
            vec![EventKind::Closed, EventKind::Exit, EventKind::Exit]
        );
    }

    #[test]
    fn unsubscribe_removes_only_that_handler() {
        let emitter = EventEmitter::new();
        let count = Rc::new(RefCell::new(0));
        let c = count.clone();
        let first = emitter.on(EventKind::Closed, move |_| *c.borrow_mut() += 1);
        let c = count.clone();
        let _second = emitter.on(EventKind::Closed, move |_| *c.borrow_mut() += 10);

        assert!(first.unsubscribe());
        emitter.emit(&closed());
        assert_eq!(*count.borrow(), 10);
        assert_eq!(emitter.listener_count(EventKind::Closed), 1);
    }

    #[test]
    fn handler_may_unsubscribe_while_being_dispatched() {
        let emitter = EventEmitter::new();
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::default();
        let hits = Rc::new(RefCell::new(0));
        let (s, h) = (slot.clone(), hits.clone());
        let sub = emitter.on(EventKind::Exit, move |_| {
            *h.borrow_mut() += 1;
            if let Some(sub) = s.borrow_mut().take() {
                sub.unsubscribe();
            }
        });
        *slot.borrow_mut() = Some(sub);

        emitter.emit(&exit("a"));
        emitter.emit(&exit("b"));
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn unsubscribe_after_emitter_dropped_is_harmless() {
        let emitter = EventEmitter::new();
        let sub = emitter.on(EventKind::Lost, |_| {});
        drop(emitter);
        assert!(!sub.unsubscribe());
    }

    #[test]
    fn kinds_render_as_snake_case() {
        let names: Vec<String> = EventKind::iter().map(|k| k.to_string()).collect();
        assert_eq!(names, vec!["open", "closed", "lost", "recovered", "exit"]);
    }
}
