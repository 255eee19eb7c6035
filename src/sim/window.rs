use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::companion::SurfaceProbe;
use crate::model::Bounds;
use crate::sys::window::{Error, Result, WindowHandle};

#[derive(Debug)]
struct Inner {
    name: String,
    href: String,
    cross_origin: bool,
    closed: bool,
    busy_reads: u32,
    close_refused: bool,
    x: f64,
    y: f64,
    w: f64,
    h: f64,
    close_calls: u32,
    probes: u32,
}

/// An in-memory popup.
///
/// Clones share the same underlying surface, so a test (or the script
/// runner) can keep one clone to steer the popup while the controller holds
/// another.
#[derive(Debug, Clone)]
pub struct SimWindow(Rc<RefCell<Inner>>);

impl SimWindow {
    pub fn new(name: &str, href: &str) -> Self {
        SimWindow(Rc::new(RefCell::new(Inner {
            name: name.to_string(),
            href: href.to_string(),
            cross_origin: false,
            closed: false,
            busy_reads: 0,
            close_refused: false,
            x: 0.,
            y: 0.,
            w: 800.,
            h: 600.,
            close_calls: 0,
            probes: 0,
        })))
    }

    /// Same-origin navigation; the location stays readable.
    pub fn navigate(&self, href: &str) {
        let mut inner = self.0.borrow_mut();
        inner.href = href.to_string();
        inner.cross_origin = false;
    }

    pub fn navigate_cross_origin(&self, href: &str) {
        let mut inner = self.0.borrow_mut();
        inner.href = href.to_string();
        inner.cross_origin = true;
    }

    /// The user closes the popup from the window chrome.
    pub fn user_close(&self) { self.0.borrow_mut().closed = true; }

    /// The next `n` property reads fail as if the surface were unresponsive.
    pub fn set_busy_reads(&self, n: u32) { self.0.borrow_mut().busy_reads = n; }

    /// Makes `close()` fail without closing, like a surface that ignores
    /// scripted close requests.
    pub fn refuse_close(&self, refuse: bool) { self.0.borrow_mut().close_refused = refuse; }

    pub fn closed(&self) -> bool { self.0.borrow().closed }

    pub fn close_calls(&self) -> u32 { self.0.borrow().close_calls }

    /// How often the closed state was probed, i.e. how many ticks looked at
    /// this window.
    pub fn probe_count(&self) -> u32 { self.0.borrow().probes }

    fn read<T>(&self, prop: &'static str, f: impl FnOnce(&Inner) -> T) -> Result<T> {
        let mut inner = self.0.borrow_mut();
        if prop == "closed" {
            inner.probes += 1;
        }
        if inner.busy_reads > 0 {
            inner.busy_reads -= 1;
            return Err(Error::Busy);
        }
        if inner.closed && prop != "closed" {
            return Err(Error::Closed);
        }
        Ok(f(&inner))
    }
}

impl WindowHandle for SimWindow {
    fn is_closed(&self) -> Result<bool> { self.read("closed", |i| i.closed) }

    fn close(&self) -> Result<()> {
        let mut inner = self.0.borrow_mut();
        inner.close_calls += 1;
        if inner.close_refused {
            return Err(Error::AccessDenied("close"));
        }
        if !inner.closed {
            debug!(name = %inner.name, "sim window closed");
        }
        inner.closed = true;
        Ok(())
    }

    fn focus(&self) -> Result<()> {
        if self.0.borrow().closed {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn resize_to(&self, width: f64, height: f64) -> Result<()> {
        let mut inner = self.0.borrow_mut();
        if inner.closed {
            return Err(Error::Closed);
        }
        inner.w = width;
        inner.h = height;
        Ok(())
    }

    fn move_to(&self, x: f64, y: f64) -> Result<()> {
        let mut inner = self.0.borrow_mut();
        if inner.closed {
            return Err(Error::Closed);
        }
        inner.x = x;
        inner.y = y;
        Ok(())
    }

    fn screen_x(&self) -> Result<f64> { self.read("screen_x", |i| i.x) }

    fn screen_y(&self) -> Result<f64> { self.read("screen_y", |i| i.y) }

    fn outer_width(&self) -> Result<f64> { self.read("outer_width", |i| i.w) }

    fn outer_height(&self) -> Result<f64> { self.read("outer_height", |i| i.h) }

    fn name(&self) -> Result<String> { self.read("name", |i| i.name.clone()) }

    fn location_href(&self) -> Result<String> {
        let (cross_origin, href) =
            self.read("location_href", |i| (i.cross_origin, i.href.clone()))?;
        if cross_origin {
            return Err(Error::AccessDenied("location_href"));
        }
        Ok(href)
    }
}

/// The popup's own content can always see its geometry, whatever origin it is on.
impl SurfaceProbe for SimWindow {
    fn current_bounds(&self) -> Bounds {
        let inner = self.0.borrow();
        Bounds::new(inner.x, inner.y, inner.w, inner.h)
    }

    fn current_name(&self) -> Option<String> { Some(self.0.borrow().name.clone()) }
}
