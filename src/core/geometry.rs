//! Viewport geometry tracking.
//!
//! Translates the pixel size of a viewport element into a character-grid
//! [`Geometry`] using the display surface's glyph metrics, and notifies an
//! observer whenever the resolved grid actually changes. Redundant
//! measurements (same grid twice) are suppressed so a resize storm does not
//! turn into a resize-notification storm.

use std::sync::{Arc, Mutex};

use thiserror::Error;

use super::pubsub::{Slot, Subscription};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GeometryError {
    /// Viewport is detached or has no laid-out area yet; nothing to report.
    #[error("viewport geometry unavailable")]
    Unavailable,

    /// Glyph cell metrics must be non-zero in both dimensions.
    #[error("invalid cell metrics: {0}x{1}")]
    InvalidMetrics(u16, u16),
}

/// Character-grid size of a terminal, columns x rows.
///
/// Both fields are always greater than zero; a collapsed viewport resolves
/// to [`GeometryError::Unavailable`] instead of a 0x0 geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub columns: u16,
    pub rows: u16,
}

impl Geometry {
    pub fn new(columns: u16, rows: u16) -> Self {
        Self { columns, rows }
    }

    /// The same grid with one extra column, used by the startup handshake
    /// to guarantee the host observes a size transition.
    pub fn redraw_nudge(&self) -> Self {
        Self {
            columns: self.columns.saturating_add(1),
            rows: self.rows,
        }
    }
}

impl std::fmt::Display for Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.columns, self.rows)
    }
}

/// Pixel box of one glyph cell on the display surface.
#[derive(Debug, Clone, Copy)]
pub struct CellMetrics {
    cell_width: u16,
    cell_height: u16,
}

impl CellMetrics {
    pub fn new(cell_width: u16, cell_height: u16) -> Result<Self, GeometryError> {
        if cell_width == 0 || cell_height == 0 {
            return Err(GeometryError::InvalidMetrics(cell_width, cell_height));
        }
        Ok(Self {
            cell_width,
            cell_height,
        })
    }
}

/// Source of the viewport's current pixel box.
///
/// `None` means the viewport element is detached/unmounted; the tracker
/// silently stops firing in that case. Detecting detachment is the owning
/// Session's concern, not the tracker's.
pub trait Viewport: Send + Sync {
    fn pixel_size(&self) -> Option<(u16, u16)>;
}

pub type GeometryCallback = Box<dyn FnMut(Geometry) + Send>;
pub type GeometrySubscription = Subscription<dyn FnMut(Geometry) + Send>;

/// Observes a viewport and emits de-duplicated [`Geometry`] changes.
pub struct GeometryTracker {
    viewport: Box<dyn Viewport>,
    metrics: CellMetrics,
    last_emitted: Mutex<Option<Geometry>>,
    slot: Arc<Slot<dyn FnMut(Geometry) + Send>>,
}

impl GeometryTracker {
    pub fn new(viewport: Box<dyn Viewport>, metrics: CellMetrics) -> Self {
        Self {
            viewport,
            metrics,
            last_emitted: Mutex::new(None),
            slot: Slot::new(),
        }
    }

    /// Resolve the current grid from viewport pixels and cell metrics.
    ///
    /// Pure with respect to the viewport: two calls with no intervening
    /// viewport change return the same result.
    pub fn recompute(&self) -> Result<Geometry, GeometryError> {
        let (width, height) = self
            .viewport
            .pixel_size()
            .ok_or(GeometryError::Unavailable)?;
        let columns = width / self.metrics.cell_width;
        let rows = height / self.metrics.cell_height;
        if columns == 0 || rows == 0 {
            return Err(GeometryError::Unavailable);
        }
        Ok(Geometry::new(columns, rows))
    }

    /// Register the geometry-change observer. Single listener.
    pub fn on_change(&self, callback: GeometryCallback) -> GeometrySubscription {
        self.slot.install(callback)
    }

    /// Recompute and record the result as already emitted, without firing
    /// the observer. The session bridge uses this around its startup
    /// handshake so an identical viewport event arriving right after
    /// startup is suppressed.
    pub fn sync(&self) -> Result<Geometry, GeometryError> {
        let geometry = self.recompute()?;
        *self.last_emitted.lock().unwrap() = Some(geometry);
        Ok(geometry)
    }

    /// React to a viewport size change: re-measure and fire the observer
    /// if the resolved grid differs from the last one emitted.
    ///
    /// A detached or collapsed viewport is silently ignored.
    pub fn viewport_resized(&self) {
        let geometry = match self.recompute() {
            Ok(geometry) => geometry,
            Err(_) => return,
        };

        {
            let mut last = self.last_emitted.lock().unwrap();
            if *last == Some(geometry) {
                return;
            }
            *last = Some(geometry);
        }

        if let Some(mut callback) = self.slot.begin_dispatch() {
            callback(geometry);
            self.slot.end_dispatch(callback);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Viewport double with a settable pixel box.
    struct FakeViewport {
        size: Mutex<Option<(u16, u16)>>,
    }

    impl FakeViewport {
        fn new(size: Option<(u16, u16)>) -> Arc<Self> {
            Arc::new(Self {
                size: Mutex::new(size),
            })
        }

        fn set(&self, size: Option<(u16, u16)>) {
            *self.size.lock().unwrap() = size;
        }
    }

    impl Viewport for Arc<FakeViewport> {
        fn pixel_size(&self) -> Option<(u16, u16)> {
            *self.size.lock().unwrap()
        }
    }

    fn metrics() -> CellMetrics {
        // 8x16 px glyph box
        CellMetrics::new(8, 16).unwrap()
    }

    fn tracker(viewport: &Arc<FakeViewport>) -> GeometryTracker {
        GeometryTracker::new(Box::new(viewport.clone()), metrics())
    }

    #[test]
    fn test_recompute_floors_to_grid() {
        let viewport = FakeViewport::new(Some((647, 389)));
        let tracker = tracker(&viewport);
        assert_eq!(tracker.recompute(), Ok(Geometry::new(80, 24)));
        // Idempotent with no intervening change
        assert_eq!(tracker.recompute(), Ok(Geometry::new(80, 24)));
    }

    #[test]
    fn test_zero_size_viewport_is_unavailable() {
        let viewport = FakeViewport::new(Some((0, 0)));
        let tracker = tracker(&viewport);
        assert_eq!(tracker.recompute(), Err(GeometryError::Unavailable));

        // Narrower than one cell counts as collapsed too
        viewport.set(Some((7, 400)));
        assert_eq!(tracker.recompute(), Err(GeometryError::Unavailable));
    }

    #[test]
    fn test_invalid_cell_metrics_rejected() {
        assert_eq!(
            CellMetrics::new(0, 16).unwrap_err(),
            GeometryError::InvalidMetrics(0, 16)
        );
    }

    #[test]
    fn test_redundant_change_suppressed() {
        let viewport = FakeViewport::new(Some((640, 384)));
        let tracker = tracker(&viewport);
        let emitted = Arc::new(Mutex::new(Vec::new()));
        let log = emitted.clone();
        let _sub = tracker.on_change(Box::new(move |geometry| {
            log.lock().unwrap().push(geometry);
        }));

        tracker.viewport_resized();
        // Pixel change too small to change the grid
        viewport.set(Some((641, 385)));
        tracker.viewport_resized();
        viewport.set(Some((800, 384)));
        tracker.viewport_resized();

        assert_eq!(
            *emitted.lock().unwrap(),
            vec![Geometry::new(80, 24), Geometry::new(100, 24)]
        );
    }

    #[test]
    fn test_detached_viewport_stops_firing() {
        let viewport = FakeViewport::new(Some((640, 384)));
        let tracker = tracker(&viewport);
        let emitted = Arc::new(Mutex::new(Vec::new()));
        let log = emitted.clone();
        let _sub = tracker.on_change(Box::new(move |geometry| {
            log.lock().unwrap().push(geometry);
        }));

        tracker.viewport_resized();
        viewport.set(None);
        tracker.viewport_resized();

        assert_eq!(*emitted.lock().unwrap(), vec![Geometry::new(80, 24)]);
    }

    #[test]
    fn test_sync_primes_suppression() {
        let viewport = FakeViewport::new(Some((640, 384)));
        let tracker = tracker(&viewport);
        let emitted = Arc::new(Mutex::new(Vec::new()));
        let log = emitted.clone();
        let _sub = tracker.on_change(Box::new(move |geometry| {
            log.lock().unwrap().push(geometry);
        }));

        assert_eq!(tracker.sync(), Ok(Geometry::new(80, 24)));
        // Same grid right after sync: nothing fires
        tracker.viewport_resized();
        assert!(emitted.lock().unwrap().is_empty());
    }

    #[test]
    fn test_released_observer_stops_firing() {
        let viewport = FakeViewport::new(Some((640, 384)));
        let tracker = tracker(&viewport);
        let emitted = Arc::new(Mutex::new(Vec::new()));
        let log = emitted.clone();
        let sub = tracker.on_change(Box::new(move |geometry| {
            log.lock().unwrap().push(geometry);
        }));

        sub.release();
        tracker.viewport_resized();
        assert!(emitted.lock().unwrap().is_empty());
    }

    #[test]
    fn test_redraw_nudge_bumps_columns() {
        let geometry = Geometry::new(80, 24);
        assert_eq!(geometry.redraw_nudge(), Geometry::new(81, 24));
        assert_eq!(geometry.to_string(), "80x24");
    }
}
