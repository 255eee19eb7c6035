use serde::{Deserialize, Serialize};

/// Last known screen geometry of the popup. Every field is optional because
/// each one is read independently and any read may be denied.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct Bounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h: Option<f64>,
}

impl Bounds {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            w: Some(w),
            h: Some(h),
        }
    }

    /// Overwrites the fields that `other` carries, keeping the rest.
    pub fn merge(&mut self, other: &Bounds) {
        if other.x.is_some() {
            self.x = other.x;
        }
        if other.y.is_some() {
            self.y = other.y;
        }
        if other.w.is_some() {
            self.w = other.w;
        }
        if other.h.is_some() {
            self.h = other.h;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.w.is_none() && self.h.is_none()
    }
}

/// Everything the controller knows about the supervised popup.
///
/// Only the controller mutates this; consumers get clones.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RecoveryState {
    pub name: Option<String>,
    pub bounds: Bounds,
    pub last_seen_href: Option<String>,
    /// Timestamp (ms) of the last tick where the popup was accessible.
    pub last_good_at: u64,
    /// Timestamp (ms) at which the current stretch of inaccessibility began.
    pub last_loss_at: Option<u64>,
    pub exit_signaled: bool,
}

impl RecoveryState {
    pub fn is_lost(&self) -> bool { self.last_loss_at.is_some() }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn merge_keeps_fields_missing_from_the_update() {
        let mut bounds = Bounds::new(10., 20., 300., 400.);
        bounds.merge(&Bounds {
            x: Some(15.),
            w: Some(320.),
            ..Default::default()
        });
        assert_eq!(bounds, Bounds::new(15., 20., 320., 400.));
    }

    #[test]
    fn partial_bounds_deserialize_from_json() {
        let bounds: Bounds = serde_json::from_str(r#"{"x": 1, "h": 2.5}"#).unwrap();
        assert_eq!(bounds.x, Some(1.));
        assert_eq!(bounds.y, None);
        assert_eq!(bounds.h, Some(2.5));
        assert!(!bounds.is_empty());
        assert!(Bounds::default().is_empty());
    }
}
