//! The window handle abstraction the supervisor works against.
//!
//! A handle refers to a top-level surface owned by the host platform. Every
//! introspection call may fail, typically because the surface navigated to a
//! different origin and the platform now denies reads. Callers treat such
//! failures as data, not as faults.

use std::error::Error as StdError;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The platform refused the read, usually a cross-origin denial.
    AccessDenied(&'static str),
    /// The surface is gone.
    Closed,
    /// The surface did not answer in time.
    Busy,
    Unsupported(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AccessDenied(prop) => write!(f, "access denied reading {prop}"),
            Error::Closed => write!(f, "window is closed"),
            Error::Busy => write!(f, "window is busy"),
            Error::Unsupported(op) => write!(f, "operation not supported: {op}"),
        }
    }
}

impl StdError for Error {}

/// A reference to a secondary top-level surface.
///
/// Implementations must not call back into the controller that owns them.
/// All methods take `&self`; handles are shared behind [`Window`].
pub trait WindowHandle: fmt::Debug {
    /// Whether the platform reports the surface as closed.
    fn is_closed(&self) -> Result<bool>;

    fn close(&self) -> Result<()>;

    fn focus(&self) -> Result<()>;

    fn resize_to(&self, width: f64, height: f64) -> Result<()>;

    fn move_to(&self, x: f64, y: f64) -> Result<()>;

    fn screen_x(&self) -> Result<f64>;

    fn screen_y(&self) -> Result<f64>;

    fn outer_width(&self) -> Result<f64>;

    fn outer_height(&self) -> Result<f64>;

    /// The surface's self-reported name. Generally readable even after a
    /// cross-origin navigation.
    fn name(&self) -> Result<String>;

    /// The current location. Only readable while the surface shares the
    /// opener's origin, which makes it the narrowest accessibility probe.
    fn location_href(&self) -> Result<String>;
}

pub type Window = Rc<dyn WindowHandle>;
