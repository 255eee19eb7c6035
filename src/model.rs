pub mod state;

pub use state::{Bounds, RecoveryState};
