//! Session transports.
//!
//! A transport carries raw terminal I/O between the host process and the
//! display surface as three primitives: an ordered byte sink toward the
//! host (`send`), an ordered inbound chunk stream (`on_data`), and a
//! geometry control channel (`notify_resize`). The mechanism underneath is
//! the transport's business; this module ships two:
//!
//! - [`ChannelTransport`] / [`HostEnd`]: an in-process pair, used by the
//!   echo demo mode and by tests.
//! - [`ProcessTransport`]: a child process over piped stdio, with a reader
//!   thread feeding an inbound queue.
//!
//! Inbound delivery is cooperative: the reader side only queues; the
//! owner's event loop calls `dispatch_inbound()` to drain queued chunks
//! through the registered callback in arrival order. Chunks that arrive
//! before a listener is registered stay queued, so nothing is lost across
//! the subscribe boundary.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::debug;

use super::geometry::Geometry;
use super::pubsub::{Slot, Subscription};

#[derive(Error, Debug)]
pub enum TransportError {
    /// The host process is gone. Terminal for the session; never retried.
    #[error("transport closed: host process has exited")]
    Closed,

    #[error("transport I/O failed: {0}")]
    Io(#[source] io::Error),
}

pub type DataCallback = Box<dyn FnMut(&[u8]) + Send>;
pub type DataSubscription = Subscription<dyn FnMut(&[u8]) + Send>;

/// Bidirectional channel between one host process and one session.
pub trait SessionTransport: Send + Sync {
    /// Enqueue bytes for the host process's input stream. Call order is
    /// stream order. Non-blocking.
    fn send(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Register the inbound-data listener. One chunk per callback
    /// invocation, in arrival order. Single listener.
    fn on_data(&self, callback: DataCallback) -> DataSubscription;

    /// Tell the host process about a new terminal grid. Idempotent from
    /// the host's point of view.
    fn notify_resize(&self, geometry: Geometry) -> Result<(), TransportError>;
}

fn map_write_error(error: io::Error) -> TransportError {
    match error.kind() {
        io::ErrorKind::BrokenPipe => TransportError::Closed,
        _ => TransportError::Io(error),
    }
}

/// Take the child's stdout pipe, reaping the child on failure so the
/// error path leaves no zombie behind.
fn take_stdout(child: &mut Child) -> Result<std::process::ChildStdout, TransportError> {
    match child.stdout.take() {
        Some(stdout) => Ok(stdout),
        None => {
            let _ = child.kill();
            let _ = child.wait();
            Err(TransportError::Io(io::Error::new(
                io::ErrorKind::Other,
                "child stdout not captured",
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// In-process channel transport
// ---------------------------------------------------------------------------

struct ChannelShared {
    inbound: Mutex<VecDeque<Vec<u8>>>,
    sent: Mutex<Vec<Vec<u8>>>,
    resizes: Mutex<Vec<Geometry>>,
    closed: AtomicBool,
}

/// Session side of an in-process transport pair.
pub struct ChannelTransport {
    shared: Arc<ChannelShared>,
    slot: Arc<Slot<dyn FnMut(&[u8]) + Send>>,
}

/// Host-process side of an in-process transport pair.
pub struct HostEnd {
    shared: Arc<ChannelShared>,
}

/// Create a connected in-process transport pair.
pub fn channel_pair() -> (ChannelTransport, HostEnd) {
    let shared = Arc::new(ChannelShared {
        inbound: Mutex::new(VecDeque::new()),
        sent: Mutex::new(Vec::new()),
        resizes: Mutex::new(Vec::new()),
        closed: AtomicBool::new(false),
    });
    (
        ChannelTransport {
            shared: shared.clone(),
            slot: Slot::new(),
        },
        HostEnd { shared },
    )
}

impl ChannelTransport {
    /// Drain queued inbound chunks through the registered listener, in
    /// arrival order. No listener: chunks stay queued.
    pub fn dispatch_inbound(&self) {
        let Some(mut callback) = self.slot.begin_dispatch() else {
            return;
        };
        loop {
            let chunk = self.shared.inbound.lock().unwrap().pop_front();
            match chunk {
                Some(chunk) => callback(&chunk),
                None => break,
            }
        }
        self.slot.end_dispatch(callback);
    }

    /// Whether the host end has hung up.
    pub fn is_running(&self) -> bool {
        !self.shared.closed.load(Ordering::SeqCst)
    }
}

impl SessionTransport for ChannelTransport {
    fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.shared.sent.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }

    fn on_data(&self, callback: DataCallback) -> DataSubscription {
        self.slot.install(callback)
    }

    fn notify_resize(&self, geometry: Geometry) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.shared.resizes.lock().unwrap().push(geometry);
        Ok(())
    }
}

impl HostEnd {
    /// Inject host-process output toward the session.
    pub fn push(&self, bytes: &[u8]) {
        self.shared.inbound.lock().unwrap().push_back(bytes.to_vec());
    }

    /// Everything the session has sent so far, in order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.shared.sent.lock().unwrap().clone()
    }

    /// Drain pending session input (used by the echo loop).
    pub fn drain_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.shared.sent.lock().unwrap())
    }

    /// Every resize notification received so far, in order.
    pub fn resizes(&self) -> Vec<Geometry> {
        self.shared.resizes.lock().unwrap().clone()
    }

    /// Simulate host-process exit: subsequent `send`/`notify_resize` on the
    /// session side fail with [`TransportError::Closed`].
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Child-process transport
// ---------------------------------------------------------------------------

/// Transport over a spawned child process's piped stdio.
///
/// A reader thread pulls the child's output into an inbound queue; the
/// owner's event loop drains it with [`ProcessTransport::dispatch_inbound`].
/// Plain pipes carry no size channel, so `notify_resize` records the
/// geometry (COLUMNS/LINES are exported at spawn from the initial grid).
pub struct ProcessTransport {
    child: Mutex<Child>,
    stdin: Mutex<Option<ChildStdin>>,
    output_rx: Mutex<Receiver<Vec<u8>>>,
    slot: Arc<Slot<dyn FnMut(&[u8]) + Send>>,
    running: Arc<AtomicBool>,
    reader_thread: Mutex<Option<JoinHandle<()>>>,
    last_resize: Mutex<Option<Geometry>>,
}

impl ProcessTransport {
    /// Spawn `command` through the platform shell and wire its stdio.
    pub fn spawn(command: &str, initial: Option<Geometry>) -> Result<Self, TransportError> {
        #[cfg(windows)]
        let mut builder = {
            let mut builder = Command::new("cmd.exe");
            builder.arg("/C").arg(command);
            builder
        };
        #[cfg(not(windows))]
        let mut builder = {
            let mut builder = Command::new("/bin/sh");
            builder.arg("-c").arg(command);
            builder
        };

        builder
            .env("TERMBRIDGE", "1")
            .env("TERMBRIDGE_VERSION", env!("CARGO_PKG_VERSION"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        if let Some(geometry) = initial {
            builder
                .env("COLUMNS", geometry.columns.to_string())
                .env("LINES", geometry.rows.to_string());
        }

        let mut child = builder.spawn().map_err(TransportError::Io)?;
        let stdin = child.stdin.take();
        let mut stdout = take_stdout(&mut child)?;

        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel::<Vec<u8>>();

        // Reader thread: pull child output into the inbound queue until the
        // pipe closes or we are told to stop.
        let reader_running = running.clone();
        let reader_thread = thread::spawn(move || {
            let mut buffer = vec![0u8; 4096];
            loop {
                if !reader_running.load(Ordering::SeqCst) {
                    break;
                }
                match stdout.read(&mut buffer) {
                    Ok(0) => {
                        reader_running.store(false, Ordering::SeqCst);
                        break;
                    }
                    Ok(n) => {
                        if tx.send(buffer[..n].to_vec()).is_err() {
                            reader_running.store(false, Ordering::SeqCst);
                            break;
                        }
                    }
                    Err(_) => {
                        reader_running.store(false, Ordering::SeqCst);
                        break;
                    }
                }
            }
        });

        debug!(command, "spawned host process");

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            output_rx: Mutex::new(rx),
            slot: Slot::new(),
            running,
            reader_thread: Mutex::new(Some(reader_thread)),
            last_resize: Mutex::new(initial),
        })
    }

    /// Drain queued child output through the registered listener. No
    /// listener: chunks stay queued in the channel.
    pub fn dispatch_inbound(&self) {
        let Some(mut callback) = self.slot.begin_dispatch() else {
            return;
        };
        // Collect first so the receiver lock is not held across callbacks.
        let mut pending: Vec<Vec<u8>> = Vec::new();
        {
            let rx = self.output_rx.lock().unwrap();
            loop {
                match rx.try_recv() {
                    Ok(chunk) => pending.push(chunk),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        self.running.store(false, Ordering::SeqCst);
                        break;
                    }
                }
            }
        }
        for chunk in &pending {
            callback(chunk);
        }
        self.slot.end_dispatch(callback);
    }

    /// Whether the child process is still alive.
    pub fn is_running(&self) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        match self.child.lock().unwrap().try_wait() {
            Ok(None) => true,
            _ => {
                self.running.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    /// Last geometry the session reported, if any.
    pub fn last_resize(&self) -> Option<Geometry> {
        *self.last_resize.lock().unwrap()
    }
}

impl SessionTransport for ProcessTransport {
    fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut stdin = self.stdin.lock().unwrap();
        let Some(pipe) = stdin.as_mut() else {
            return Err(TransportError::Closed);
        };
        pipe.write_all(bytes).map_err(map_write_error)?;
        pipe.flush().map_err(map_write_error)
    }

    fn on_data(&self, callback: DataCallback) -> DataSubscription {
        self.slot.install(callback)
    }

    fn notify_resize(&self, geometry: Geometry) -> Result<(), TransportError> {
        if !self.is_running() {
            return Err(TransportError::Closed);
        }
        debug!(%geometry, "host process notified of resize");
        *self.last_resize.lock().unwrap() = Some(geometry);
        Ok(())
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        // Closing stdin lets a well-behaved child exit on its own.
        let _ = self.stdin.lock().unwrap().take();

        {
            let mut child = self.child.lock().unwrap();
            if let Ok(None) = child.try_wait() {
                let _ = child.kill();
            }
            let _ = child.wait();
        }

        // Child is gone, so the reader's pipe has hit EOF.
        if let Some(handle) = self.reader_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}
