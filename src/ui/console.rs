//! Console-backed display surface and viewport.
//!
//! The console front end is a passthrough, not an emulator: host-process
//! bytes go straight to the hosting terminal's stdout, and the hosting
//! terminal's own grid is the viewport.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossterm::terminal;
use tracing::debug;

use crate::core::geometry::{Geometry, Viewport};
use crate::core::pubsub::Slot;
use crate::core::surface::{DisplaySurface, InputCallback, InputSubscription};

/// Display surface writing raw bytes through to stdout.
pub struct ConsoleSurface {
    out: io::Stdout,
    disposed: Arc<AtomicBool>,
    input_slot: Arc<Slot<dyn FnMut(&[u8]) + Send>>,
}

/// Event-loop side handle for delivering keystrokes to the surface.
#[derive(Clone)]
pub struct ConsoleInput {
    disposed: Arc<AtomicBool>,
    input_slot: Arc<Slot<dyn FnMut(&[u8]) + Send>>,
}

impl ConsoleSurface {
    /// Create a surface plus the input handle the event loop feeds.
    pub fn new() -> (Self, ConsoleInput) {
        let disposed = Arc::new(AtomicBool::new(false));
        let input_slot: Arc<Slot<dyn FnMut(&[u8]) + Send>> = Slot::new();
        (
            Self {
                out: io::stdout(),
                disposed: disposed.clone(),
                input_slot: input_slot.clone(),
            },
            ConsoleInput {
                disposed,
                input_slot,
            },
        )
    }
}

impl DisplaySurface for ConsoleSurface {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.out.write_all(bytes)?;
        self.out.flush()
    }

    fn on_input(&mut self, callback: InputCallback) -> InputSubscription {
        self.input_slot.install(callback)
    }

    fn dispose(&mut self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            debug!("console surface disposed");
        }
    }
}

impl ConsoleInput {
    /// Deliver encoded keystroke bytes to the registered listener.
    pub fn feed(&self, bytes: &[u8]) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        if let Some(mut callback) = self.input_slot.begin_dispatch() {
            callback(bytes);
            self.input_slot.end_dispatch(callback);
        }
    }
}

/// Viewport backed by the hosting terminal's own grid.
///
/// Cells are the unit here, so this pairs with 1x1 cell metrics.
pub struct ConsoleViewport {
    fallback: Geometry,
}

impl ConsoleViewport {
    pub fn new(fallback: Geometry) -> Self {
        Self { fallback }
    }
}

impl Viewport for ConsoleViewport {
    fn pixel_size(&self) -> Option<(u16, u16)> {
        match terminal::size() {
            Ok((columns, rows)) => Some((columns, rows)),
            Err(_) => Some((self.fallback.columns, self.fallback.rows)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_input_feeds_registered_listener() {
        let (mut surface, input) = ConsoleSurface::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = received.clone();
        let _sub = surface.on_input(Box::new(move |bytes: &[u8]| {
            log.lock().unwrap().push(bytes.to_vec());
        }));

        input.feed(b"ls\r");
        assert_eq!(*received.lock().unwrap(), vec![b"ls\r".to_vec()]);
    }

    #[test]
    fn test_disposed_surface_drops_input() {
        let (mut surface, input) = ConsoleSurface::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = received.clone();
        let _sub = surface.on_input(Box::new(move |bytes: &[u8]| {
            log.lock().unwrap().push(bytes.to_vec());
        }));

        surface.dispose();
        surface.dispose(); // second call is tolerated
        input.feed(b"x");
        assert!(received.lock().unwrap().is_empty());

        // Writes after dispose are silent no-ops as well.
        assert!(surface.write(b"late").is_ok());
    }
}
