//! Supervision of an externally spawned popup window.
//!
//! A [`RecoveryController`](supervisor::RecoveryController) opens the popup
//! through a caller-supplied factory, polls it on a fixed period, and recreates
//! it once the host has lost effective control of it (for example after a
//! cross-origin navigation).

pub mod common;
pub mod companion;
pub mod model;
pub mod sim;
pub mod supervisor;
pub mod sys;
