//! Poller role: the daemon-side consumer of notifications.
//!
//! The daemon calls [`Poller::tick`] on its own cadence. A tick never
//! blocks and does a bounded amount of work:
//!
//! 1. Fail immediately if no handler is registered.
//! 2. Connect if not connected; on failure report "try again later".
//! 3. Read at most one header and at most one body.
//! 4. Dispatch the message, if one completed, on the calling thread.
//!
//! When nothing is readable the socket is probed for an orderly close, so a
//! restarted device is picked up on the following tick.

use crate::connection::{Endpoint, PollerConnection};
use crate::dispatch::{Dispatcher, Xmitter};
use crate::error::{XmitError, XmitResult};
use crate::protocol::{MessageKind, ProtocolVersion};
use crate::pump::{FrameReader, ReadStep};

/// What a successful tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    /// The device is unreachable (or just went away); retry next tick.
    NotConnected,
    /// Connected, but no complete message was available.
    Idle,
    /// One message was read and handed to the handler.
    Dispatched(MessageKind),
}

/// Daemon-side endpoint: connects to the device and dispatches its messages.
#[derive(Debug)]
pub struct Poller {
    conn: PollerConnection,
    reader: FrameReader,
    dispatcher: Dispatcher,
}

impl Poller {
    /// Create a poller for `endpoint`. Nothing connects until the first tick.
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        Self::with_connection(PollerConnection::new(endpoint))
    }

    /// Poller on the fixed loopback port of `version`.
    #[must_use]
    pub fn for_version(version: ProtocolVersion) -> Self {
        Self::new(Endpoint::new(version))
    }

    /// Poller around a preconfigured connection.
    #[must_use]
    pub fn with_connection(conn: PollerConnection) -> Self {
        let version = conn.endpoint().version;
        Self {
            conn,
            reader: FrameReader::new(version),
            dispatcher: Dispatcher::new(),
        }
    }

    /// Install the handler. Registering again replaces the previous one.
    pub fn register<X: Xmitter + Send + 'static>(&mut self, handler: X) {
        self.dispatcher.register(Box::new(handler));
    }

    /// Returns true while connected to the device.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Header read on an earlier tick whose body is still outstanding.
    #[must_use]
    pub fn held_header(&self) -> Option<MessageKind> {
        self.reader.held_header()
    }

    /// Run one tick and report what happened.
    ///
    /// # Errors
    ///
    /// - [`XmitError::NoHandler`] before any handler is registered; no I/O is attempted.
    /// - [`XmitError::UnknownKind`] when the stream carries a tag of no known kind.
    ///   The connection is dropped; the run loop is expected to stop.
    /// - [`XmitError::Io`] when a read fails mid-stream. The connection is
    ///   dropped and the next tick reconnects; this one is not fatal.
    pub fn try_tick(&mut self) -> XmitResult<TickStatus> {
        if !self.dispatcher.has_handler() {
            log::error!("[poller] cannot tick: no handler registered");
            return Err(XmitError::NoHandler);
        }

        if !self.conn.ensure_connected() {
            return Ok(TickStatus::NotConnected);
        }
        let Some(stream) = self.conn.stream_mut() else {
            return Ok(TickStatus::NotConnected);
        };

        let step = self.reader.poll(stream);
        self.settle(step)
    }

    /// Act on the outcome of one read step: dispatch, probe, or tear down.
    fn settle(&mut self, step: XmitResult<ReadStep>) -> XmitResult<TickStatus> {
        match step {
            Ok(ReadStep::Message(message)) => {
                let kind = message.kind();
                log::debug!("[poller] dispatching {kind}");
                self.dispatcher.dispatch(message);
                Ok(TickStatus::Dispatched(kind))
            }
            Ok(ReadStep::Pending) => {
                if self.conn.probe_peer() {
                    Ok(TickStatus::Idle)
                } else {
                    self.reader.reset();
                    Ok(TickStatus::NotConnected)
                }
            }
            Err(XmitError::UnknownKind(tag)) => {
                log::error!(
                    "[poller] unknown message kind {tag} on the wire; stream is desynchronized"
                );
                self.teardown();
                Err(XmitError::UnknownKind(tag))
            }
            Err(e) => {
                log::warn!("[poller] problem reading from device: {e}");
                self.teardown();
                Err(e)
            }
        }
    }

    /// Run one tick. Returns false when the run loop must stop.
    ///
    /// Connectivity problems are never a reason to stop: they return true
    /// and the next call retries.
    pub fn tick(&mut self) -> bool {
        match self.try_tick() {
            Ok(_) => true,
            Err(e) => !e.is_fatal(),
        }
    }

    fn teardown(&mut self) {
        self.conn.disconnect();
        self.reader.reset();
    }
}
