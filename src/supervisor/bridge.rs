//! Cooperative messages posted by the popup's own content.
//!
//! There is no origin filtering unless the caller configures one. Hosts that
//! accept messages from untrusted pages must set `target_origin`,
//! `allowed_origins` or a custom predicate.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::common::collections::HashSet;
use crate::common::config::SupervisorSettings;
use crate::model::{Bounds, RecoveryState};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum PopupMessage {
    #[serde(rename = "POPUP_EXIT")]
    Exit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename = "POPUP_UI_STATE")]
    UiState {
        bounds: Bounds,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

/// A message as delivered by the host's cross-context channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub origin: String,
    pub data: Value,
}

impl Envelope {
    pub fn new(origin: impl Into<String>, data: Value) -> Self {
        Self { origin: origin.into(), data }
    }
}

/// Anything the popup's content can post messages to.
pub trait MessageTarget {
    fn post_message(&self, origin: &str, data: Value);
}

#[derive(Clone)]
pub enum OriginPolicy {
    Any,
    AllowList(HashSet<String>),
    Custom(Rc<dyn Fn(&str) -> bool>),
}

impl OriginPolicy {
    pub fn from_settings(settings: &SupervisorSettings) -> Self {
        let mut allowed: HashSet<String> = settings.allowed_origins.iter().cloned().collect();
        if let Some(target) = &settings.target_origin
            && target != "*"
        {
            allowed.insert(target.clone());
        }
        if allowed.is_empty() { OriginPolicy::Any } else { OriginPolicy::AllowList(allowed) }
    }

    pub fn allows(&self, origin: &str) -> bool {
        match self {
            OriginPolicy::Any => true,
            OriginPolicy::AllowList(allowed) => allowed.contains(origin),
            OriginPolicy::Custom(predicate) => predicate(origin),
        }
    }

    pub fn is_unrestricted(&self) -> bool { matches!(self, OriginPolicy::Any) }
}

impl fmt::Debug for OriginPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginPolicy::Any => f.write_str("Any"),
            OriginPolicy::AllowList(allowed) => f.debug_tuple("AllowList").field(allowed).finish(),
            OriginPolicy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// What folding a message into the tracked state produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Folded {
    Exit { reason: Option<String> },
    UiState,
}

#[derive(Debug)]
pub struct MessageBridge {
    policy: OriginPolicy,
    listening: bool,
}

impl MessageBridge {
    pub fn new(policy: OriginPolicy) -> Self { Self { policy, listening: false } }

    pub fn start(&mut self) { self.listening = true; }

    pub fn stop(&mut self) { self.listening = false; }

    /// Filters and decodes one envelope. Anything unexpected is dropped.
    pub fn accept(&self, envelope: &Envelope) -> Option<PopupMessage> {
        if !self.listening {
            trace!(origin = %envelope.origin, "bridge not listening; dropping message");
            return None;
        }
        if !self.policy.allows(&envelope.origin) {
            trace!(origin = %envelope.origin, "origin not allowed; dropping message");
            return None;
        }
        match PopupMessage::deserialize(&envelope.data) {
            Ok(message) => Some(message),
            Err(err) => {
                trace!(%err, "ignoring unrecognized message");
                None
            }
        }
    }

    pub fn fold(message: PopupMessage, state: &mut RecoveryState) -> Folded {
        match message {
            PopupMessage::Exit { reason } => {
                state.exit_signaled = true;
                Folded::Exit { reason }
            }
            PopupMessage::UiState { bounds, name } => {
                state.bounds.merge(&bounds);
                if name.is_some() {
                    state.name = name;
                }
                Folded::UiState
            }
        }
    }
}

/// Returns the `scheme://host[:port]` prefix of `url`.
pub fn origin_of(url: &str) -> Option<&str> {
    let (scheme, rest) = url.split_once("://")?;
    if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c)) {
        return None;
    }
    let host_len = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    if host_len == 0 {
        return None;
    }
    Some(&url[..scheme.len() + 3 + host_len])
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn listening(policy: OriginPolicy) -> MessageBridge {
        let mut bridge = MessageBridge::new(policy);
        bridge.start();
        bridge
    }

    #[test]
    fn decodes_both_message_kinds() {
        let bridge = listening(OriginPolicy::Any);
        assert_eq!(
            bridge.accept(&Envelope::new("https://a.test", json!({"type": "POPUP_EXIT", "reason": "nav"}))),
            Some(PopupMessage::Exit { reason: Some("nav".into()) })
        );
        assert_eq!(
            bridge.accept(&Envelope::new("https://a.test", json!({"type": "POPUP_EXIT"}))),
            Some(PopupMessage::Exit { reason: None })
        );
        assert_eq!(
            bridge.accept(&Envelope::new(
                "https://a.test",
                json!({"type": "POPUP_UI_STATE", "bounds": {"x": 1, "y": 2, "w": 3, "h": 4}, "name": "p"})
            )),
            Some(PopupMessage::UiState {
                bounds: Bounds::new(1., 2., 3., 4.),
                name: Some("p".into())
            })
        );
    }

    #[test]
    fn malformed_messages_are_dropped() {
        let bridge = listening(OriginPolicy::Any);
        for data in [
            json!("POPUP_EXIT"),
            json!(null),
            json!({"type": "SOMETHING_ELSE"}),
            json!({"type": "POPUP_UI_STATE"}),
            json!({"type": "POPUP_UI_STATE", "bounds": {"x": "left"}}),
            json!({"reason": "no type"}),
        ] {
            assert_eq!(bridge.accept(&Envelope::new("https://a.test", data.clone())), None, "{data}");
        }
    }

    #[test]
    fn stopped_bridge_drops_everything() {
        let mut bridge = listening(OriginPolicy::Any);
        bridge.stop();
        assert!(bridge.accept(&Envelope::new("x://y", json!({"type": "POPUP_EXIT"}))).is_none());
    }

    #[test]
    fn allow_list_comes_from_settings() {
        let settings = SupervisorSettings {
            target_origin: Some("https://app.test".into()),
            allowed_origins: vec!["https://help.test".into()],
            ..Default::default()
        };
        let bridge = listening(OriginPolicy::from_settings(&settings));
        let exit = json!({"type": "POPUP_EXIT"});
        assert!(bridge.accept(&Envelope::new("https://app.test", exit.clone())).is_some());
        assert!(bridge.accept(&Envelope::new("https://help.test", exit.clone())).is_some());
        assert!(bridge.accept(&Envelope::new("https://evil.test", exit)).is_none());
    }

    #[test]
    fn wildcard_target_is_unrestricted() {
        let settings = SupervisorSettings {
            target_origin: Some("*".into()),
            ..Default::default()
        };
        assert!(OriginPolicy::from_settings(&settings).is_unrestricted());
        assert!(OriginPolicy::from_settings(&SupervisorSettings::default()).is_unrestricted());
    }

    #[test]
    fn fold_merges_ui_state_without_touching_exit_flag() {
        let mut state = RecoveryState {
            bounds: Bounds::new(0., 0., 100., 100.),
            name: Some("old".into()),
            ..Default::default()
        };
        let folded = MessageBridge::fold(
            PopupMessage::UiState {
                bounds: Bounds { w: Some(300.), ..Default::default() },
                name: None,
            },
            &mut state,
        );
        assert_eq!(folded, Folded::UiState);
        assert_eq!(state.bounds, Bounds::new(0., 0., 300., 100.));
        assert_eq!(state.name.as_deref(), Some("old"));
        assert!(!state.exit_signaled);

        let folded = MessageBridge::fold(PopupMessage::Exit { reason: None }, &mut state);
        assert_eq!(folded, Folded::Exit { reason: None });
        assert!(state.exit_signaled);
    }

    #[test]
    fn origin_of_strips_path_and_query() {
        assert_eq!(origin_of("https://app.test/popup?x=1"), Some("https://app.test"));
        assert_eq!(origin_of("http://localhost:8080"), Some("http://localhost:8080"));
        assert_eq!(origin_of("https://app.test#frag"), Some("https://app.test"));
        assert_eq!(origin_of("app.test/popup"), None);
        assert_eq!(origin_of("https:///path"), None);
    }
}
