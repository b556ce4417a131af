//! Display-surface boundary.
//!
//! The rendering widget is an external collaborator; the bridge only needs
//! a byte sink, an input-event source, and a disposal hook. Grid
//! measurement lives in the geometry tracker, not here.

use std::io;

use super::pubsub::Subscription;

pub type InputCallback = Box<dyn FnMut(&[u8]) + Send>;
pub type InputSubscription = Subscription<dyn FnMut(&[u8]) + Send>;

/// One terminal rendering surface, exclusively owned by one session.
pub trait DisplaySurface: Send {
    /// Render host-process output. Chunks arrive in stream order, untouched.
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Register the keystroke/paste listener. Single listener.
    fn on_input(&mut self, callback: InputCallback) -> InputSubscription;

    /// Release rendering resources. Called exactly once by the owning
    /// session; implementations should tolerate a second call anyway.
    fn dispose(&mut self);
}
