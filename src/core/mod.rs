//! Core session-bridge components.
//!
//! Everything in here is UI-framework independent:
//!
//! - **geometry**: viewport measurement and resize-change suppression
//! - **transport**: the host-process channel (send / on_data / notify_resize)
//! - **surface**: the display-surface boundary trait
//! - **bridge**: the session orchestrator tying the three together
//! - **pubsub**: subscription handles shared by the observable boundaries
//!
//! # Architecture
//!
//! ```text
//! SessionBridge
//! ├── SessionTransport (host process I/O + resize control)
//! ├── DisplaySurface   (rendering widget boundary)
//! └── GeometryTracker  (viewport -> character grid)
//! ```

pub mod bridge;
pub mod geometry;
pub mod pubsub;
pub mod surface;
pub mod transport;
