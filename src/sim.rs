//! An in-memory popup and a scripted driver for exercising a controller
//! without a real windowing host.

pub mod script;
pub mod window;

pub use script::{Script, SimReport, Step};
pub use window::SimWindow;
