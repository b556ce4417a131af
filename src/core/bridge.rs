//! Session bridge.
//!
//! Wires one transport, one display surface, and one geometry tracker into
//! a session: startup handshake, in-order relay in both directions, and an
//! idempotent teardown that releases every subscription exactly once.
//!
//! # Lifecycle
//!
//! ```text
//! created ──start()──> started ──shutdown()──> closed
//! ```
//!
//! Linear, no re-entry. `shutdown` is triggered by the owner (or by the
//! bridge being dropped), or internally when the transport reports the host
//! process gone. Callbacks that fire after close are silent no-ops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

use super::geometry::{Geometry, GeometryError, GeometrySubscription, GeometryTracker};
use super::surface::{DisplaySurface, InputSubscription};
use super::transport::{DataSubscription, SessionTransport, TransportError};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Started,
    Closed,
}

struct SessionSubs {
    data: DataSubscription,
    geometry: GeometrySubscription,
    input: InputSubscription,
}

struct BridgeInner {
    transport: Arc<dyn SessionTransport>,
    surface: Mutex<Option<Box<dyn DisplaySurface>>>,
    subs: Mutex<Option<SessionSubs>>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl BridgeInner {
    /// Inbound relay: host-process chunk to the surface, untouched.
    fn relay_inbound(&self, bytes: &[u8]) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let mut surface = self.surface.lock().unwrap();
        if let Some(surface) = surface.as_mut() {
            if let Err(error) = surface.write(bytes) {
                warn!(%error, "display surface write failed");
            }
        }
    }

    /// Outbound relay: surface keystrokes to the transport.
    fn forward_input(&self, bytes: &[u8]) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        match self.transport.send(bytes) {
            Ok(()) => {}
            Err(TransportError::Closed) => {
                debug!("host process gone, closing session");
                self.shutdown();
            }
            Err(error) => warn!(%error, "transport send failed"),
        }
    }

    /// Geometry relay: viewport change to the transport's control channel.
    fn forward_resize(&self, geometry: Geometry) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        match self.transport.notify_resize(geometry) {
            Ok(()) => debug!(%geometry, "resize forwarded"),
            Err(TransportError::Closed) => {
                debug!("host process gone, closing session");
                self.shutdown();
            }
            Err(error) => warn!(%error, "resize notification failed"),
        }
    }

    /// Tear the session down: data listener, geometry observer, then the
    /// surface. Idempotent; every path into it races safely via the swap.
    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(subs) = self.subs.lock().unwrap().take() {
            subs.data.release();
            subs.geometry.release();
            subs.input.release();
        }

        if let Some(mut surface) = self.surface.lock().unwrap().take() {
            surface.dispose();
        }

        debug!("session closed");
    }
}

/// One end-to-end binding of a display surface to a transport.
///
/// Dropping the bridge shuts the session down, so every exit path from the
/// owning scope releases the subscriptions and the surface.
pub struct SessionBridge {
    inner: Arc<BridgeInner>,
}

impl SessionBridge {
    /// Start a session over an already-constructed surface.
    ///
    /// Startup order matters and is fixed: inbound-data subscription first
    /// (so no host output can race ahead of a listener), then surface
    /// input, then the geometry observer, then the initial resize
    /// handshake, then the session counts as started.
    ///
    /// The handshake reports the measured grid twice: once with the column
    /// count bumped by one, then with the true values. Some host-side
    /// terminal drivers only signal the foreground process when the
    /// reported size differs from the previous one; the nudge guarantees a
    /// transition, so the shell redraws its prompt at the real size. A
    /// collapsed viewport skips the handshake entirely; a transport that is
    /// already closed yields a bridge that is born closed, observable via
    /// [`SessionBridge::state`].
    pub fn start(
        transport: Arc<dyn SessionTransport>,
        mut surface: Box<dyn DisplaySurface>,
        tracker: Arc<GeometryTracker>,
    ) -> Self {
        let inner = Arc::new(BridgeInner {
            transport: transport.clone(),
            surface: Mutex::new(None),
            subs: Mutex::new(None),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        let data = transport.on_data(Box::new(move |bytes: &[u8]| {
            if let Some(inner) = weak.upgrade() {
                inner.relay_inbound(bytes);
            }
        }));

        let weak = Arc::downgrade(&inner);
        let input = surface.on_input(Box::new(move |bytes: &[u8]| {
            if let Some(inner) = weak.upgrade() {
                inner.forward_input(bytes);
            }
        }));
        *inner.surface.lock().unwrap() = Some(surface);

        let weak = Arc::downgrade(&inner);
        let geometry = tracker.on_change(Box::new(move |geometry| {
            if let Some(inner) = weak.upgrade() {
                inner.forward_resize(geometry);
            }
        }));

        *inner.subs.lock().unwrap() = Some(SessionSubs {
            data,
            geometry,
            input,
        });

        Self::initial_handshake(&inner, &tracker);

        if !inner.closed.load(Ordering::SeqCst) {
            inner.started.store(true, Ordering::SeqCst);
            debug!("session started");
        }

        Self { inner }
    }

    fn initial_handshake(inner: &Arc<BridgeInner>, tracker: &GeometryTracker) {
        let geometry = match tracker.sync() {
            Ok(geometry) => geometry,
            Err(GeometryError::Unavailable) => {
                // Viewport not laid out yet; the first real viewport event
                // will carry the grid instead.
                debug!("viewport collapsed at startup, skipping handshake");
                return;
            }
            Err(error) => {
                warn!(%error, "initial geometry unavailable, skipping handshake");
                return;
            }
        };

        let result = inner
            .transport
            .notify_resize(geometry.redraw_nudge())
            .and_then(|()| inner.transport.notify_resize(geometry));

        match result {
            Ok(()) => debug!(%geometry, "startup handshake sent"),
            Err(TransportError::Closed) => {
                debug!("host process gone during handshake, closing session");
                inner.shutdown();
            }
            Err(error) => warn!(%error, "startup handshake failed"),
        }
    }

    pub fn state(&self) -> SessionState {
        if self.inner.closed.load(Ordering::SeqCst) {
            SessionState::Closed
        } else if self.inner.started.load(Ordering::SeqCst) {
            SessionState::Started
        } else {
            SessionState::Created
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Tear the session down. Safe to call any number of times.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl Drop for SessionBridge {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::{CellMetrics, Geometry, Viewport};
    use crate::core::surface::InputCallback;
    use crate::core::transport::channel_pair;
    use crate::core::pubsub::Slot;
    use std::io;

    /// Surface double whose write log and input hook outlive the boxed
    /// surface handed to the bridge.
    struct TestSurface {
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
        disposed: Arc<AtomicBool>,
        input_slot: Arc<Slot<dyn FnMut(&[u8]) + Send>>,
    }

    #[derive(Clone)]
    struct TestSurfaceHandle {
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
        disposed: Arc<AtomicBool>,
        input_slot: Arc<Slot<dyn FnMut(&[u8]) + Send>>,
    }

    impl TestSurfaceHandle {
        fn writes(&self) -> Vec<Vec<u8>> {
            self.writes.lock().unwrap().clone()
        }

        fn disposed(&self) -> bool {
            self.disposed.load(Ordering::SeqCst)
        }

        /// Deliver a surface input event, as the rendering widget would.
        fn feed_input(&self, bytes: &[u8]) {
            if let Some(mut callback) = self.input_slot.begin_dispatch() {
                callback(bytes);
                self.input_slot.end_dispatch(callback);
            }
        }
    }

    fn test_surface() -> (TestSurface, TestSurfaceHandle) {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let disposed = Arc::new(AtomicBool::new(false));
        let input_slot: Arc<Slot<dyn FnMut(&[u8]) + Send>> = Slot::new();
        (
            TestSurface {
                writes: writes.clone(),
                disposed: disposed.clone(),
                input_slot: input_slot.clone(),
            },
            TestSurfaceHandle {
                writes,
                disposed,
                input_slot,
            },
        )
    }

    impl DisplaySurface for TestSurface {
        fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.writes.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }

        fn on_input(&mut self, callback: InputCallback) -> InputSubscription {
            self.input_slot.install(callback)
        }

        fn dispose(&mut self) {
            self.disposed.store(true, Ordering::SeqCst);
        }
    }

    struct FixedViewport {
        size: Mutex<Option<(u16, u16)>>,
    }

    impl FixedViewport {
        fn new(size: Option<(u16, u16)>) -> Arc<Self> {
            Arc::new(Self {
                size: Mutex::new(size),
            })
        }

        fn set(&self, size: Option<(u16, u16)>) {
            *self.size.lock().unwrap() = size;
        }
    }

    impl Viewport for Arc<FixedViewport> {
        fn pixel_size(&self) -> Option<(u16, u16)> {
            *self.size.lock().unwrap()
        }
    }

    fn tracker_for(viewport: &Arc<FixedViewport>) -> Arc<GeometryTracker> {
        // 1x1 px cells: pixel box is the grid
        Arc::new(GeometryTracker::new(
            Box::new(viewport.clone()),
            CellMetrics::new(1, 1).unwrap(),
        ))
    }

    struct Harness {
        bridge: SessionBridge,
        transport: Arc<crate::core::transport::ChannelTransport>,
        host: crate::core::transport::HostEnd,
        surface: TestSurfaceHandle,
        viewport: Arc<FixedViewport>,
        tracker: Arc<GeometryTracker>,
    }

    fn start_session(viewport_size: Option<(u16, u16)>) -> Harness {
        let (transport, host) = channel_pair();
        let transport = Arc::new(transport);
        let (surface, handle) = test_surface();
        let viewport = FixedViewport::new(viewport_size);
        let tracker = tracker_for(&viewport);
        let bridge = SessionBridge::start(
            transport.clone(),
            Box::new(surface),
            tracker.clone(),
        );
        Harness {
            bridge,
            transport,
            host,
            surface: handle,
            viewport,
            tracker,
        }
    }

    #[test]
    fn test_startup_handshake_nudges_then_settles() {
        let h = start_session(Some((80, 24)));
        assert_eq!(h.bridge.state(), SessionState::Started);
        assert_eq!(
            h.host.resizes(),
            vec![Geometry::new(81, 24), Geometry::new(80, 24)]
        );
    }

    #[test]
    fn test_collapsed_viewport_skips_handshake() {
        let h = start_session(Some((0, 0)));
        assert_eq!(h.bridge.state(), SessionState::Started);
        assert!(h.host.resizes().is_empty());

        // First real layout still reaches the host.
        h.viewport.set(Some((80, 24)));
        h.tracker.viewport_resized();
        assert_eq!(h.host.resizes(), vec![Geometry::new(80, 24)]);
    }

    #[test]
    fn test_inbound_chunks_relayed_in_order() {
        let h = start_session(Some((80, 24)));
        h.host.push(b"first");
        h.host.push(b"second");
        h.host.push(b"third");
        h.transport.dispatch_inbound();

        assert_eq!(
            h.surface.writes(),
            vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]
        );
    }

    #[test]
    fn test_chunks_arriving_before_start_are_not_lost() {
        let (transport, host) = channel_pair();
        let transport = Arc::new(transport);
        host.push(b"banner");

        let (surface, handle) = test_surface();
        let viewport = FixedViewport::new(Some((80, 24)));
        let _bridge =
            SessionBridge::start(transport.clone(), Box::new(surface), tracker_for(&viewport));

        transport.dispatch_inbound();
        assert_eq!(handle.writes(), vec![b"banner".to_vec()]);
    }

    #[test]
    fn test_surface_input_forwarded_in_order() {
        let h = start_session(Some((80, 24)));
        h.surface.feed_input(b"l");
        h.surface.feed_input(b"s");
        h.surface.feed_input(b"\r");

        assert_eq!(
            h.host.sent(),
            vec![b"l".to_vec(), b"s".to_vec(), b"\r".to_vec()]
        );
    }

    #[test]
    fn test_resize_forwarded_and_suppressed() {
        let h = start_session(Some((80, 24)));
        let baseline = h.host.resizes().len();

        // Same grid as the handshake settled on: suppressed.
        h.tracker.viewport_resized();
        assert_eq!(h.host.resizes().len(), baseline);

        h.viewport.set(Some((100, 30)));
        h.tracker.viewport_resized();
        h.tracker.viewport_resized();
        let resizes = h.host.resizes();
        assert_eq!(resizes.len(), baseline + 1);
        assert_eq!(resizes[baseline], Geometry::new(100, 30));
    }

    #[test]
    fn test_shutdown_releases_everything_once() {
        let h = start_session(Some((80, 24)));
        h.bridge.shutdown();

        assert_eq!(h.bridge.state(), SessionState::Closed);
        assert!(h.surface.disposed());

        // Idempotent: same end state after a second call.
        h.bridge.shutdown();
        assert_eq!(h.bridge.state(), SessionState::Closed);

        // Subscriptions are gone: nothing relayed anymore.
        let writes = h.surface.writes().len();
        h.host.push(b"late");
        h.transport.dispatch_inbound();
        assert_eq!(h.surface.writes().len(), writes);
    }

    #[test]
    fn test_stale_callbacks_after_close_are_noops() {
        let h = start_session(Some((80, 24)));
        let sent = h.host.sent().len();
        h.bridge.shutdown();

        // Drive the relay paths directly, as an in-flight event would.
        h.bridge.inner.relay_inbound(b"zombie");
        h.bridge.inner.forward_input(b"zombie");
        h.bridge.inner.forward_resize(Geometry::new(132, 43));

        assert!(h.surface.writes().is_empty());
        assert_eq!(h.host.sent().len(), sent);
        assert_eq!(h.host.resizes(), vec![Geometry::new(81, 24), Geometry::new(80, 24)]);
    }

    #[test]
    fn test_resize_racing_shutdown_does_not_reach_transport() {
        let h = start_session(Some((80, 24)));
        h.bridge.shutdown();

        h.viewport.set(Some((200, 50)));
        h.tracker.viewport_resized();

        assert_eq!(
            h.host.resizes(),
            vec![Geometry::new(81, 24), Geometry::new(80, 24)]
        );
    }

    #[test]
    fn test_transport_closed_transitions_to_closed() {
        let h = start_session(Some((80, 24)));
        h.host.close();

        // Next outbound event observes Closed and tears the session down.
        h.surface.feed_input(b"x");

        assert_eq!(h.bridge.state(), SessionState::Closed);
        assert!(h.surface.disposed());
    }

    #[test]
    fn test_transport_closed_during_handshake_yields_closed_bridge() {
        let (transport, host) = channel_pair();
        host.close();
        let (surface, handle) = test_surface();
        let viewport = FixedViewport::new(Some((80, 24)));
        let bridge = SessionBridge::start(
            Arc::new(transport),
            Box::new(surface),
            tracker_for(&viewport),
        );

        assert_eq!(bridge.state(), SessionState::Closed);
        assert!(handle.disposed());
    }

    #[test]
    fn test_drop_shuts_the_session_down() {
        let (transport, host) = channel_pair();
        let transport = Arc::new(transport);
        let (surface, handle) = test_surface();
        let viewport = FixedViewport::new(Some((80, 24)));
        {
            let _bridge =
                SessionBridge::start(transport.clone(), Box::new(surface), tracker_for(&viewport));
        }

        assert!(handle.disposed());
        host.push(b"late");
        transport.dispatch_inbound();
        assert!(handle.writes().is_empty());
    }

    #[test]
    fn test_input_after_drop_is_silent() {
        let (transport, host) = channel_pair();
        let transport = Arc::new(transport);
        let (surface, handle) = test_surface();
        let viewport = FixedViewport::new(Some((80, 24)));
        {
            let _bridge =
                SessionBridge::start(transport.clone(), Box::new(surface), tracker_for(&viewport));
        }

        let sent = host.sent().len();
        handle.feed_input(b"ghost");
        assert_eq!(host.sent().len(), sent);
    }
}
