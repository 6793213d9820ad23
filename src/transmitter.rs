//! Listener role: the plugin-side producer of notifications.
//!
//! Runs on whatever thread the host calls the plugin from. Each
//! notification makes one non-blocking send attempt and reports the
//! outcome; nothing is queued or retried, so a daemon that is not attached
//! simply misses the event.

use std::net::SocketAddr;

use crate::connection::{Endpoint, ListenerConnection, ListenerState};
use crate::dispatch::Xmitter;
use crate::protocol::{encode, Message, ProtocolVersion};
use crate::pump::{write_frame, SendOutcome};
use crate::sys::SignalFreeWriter;

/// Plugin-side endpoint: listens for the daemon and sends it notifications.
#[derive(Debug)]
pub struct Transmitter {
    conn: ListenerConnection,
}

impl Transmitter {
    /// Create a transmitter for `endpoint`. Nothing is bound until the first send.
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            conn: ListenerConnection::new(endpoint),
        }
    }

    /// Transmitter on the fixed loopback port of `version`.
    #[must_use]
    pub fn for_version(version: ProtocolVersion) -> Self {
        Self::new(Endpoint::new(version))
    }

    /// Endpoint this transmitter binds.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        self.conn.endpoint()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ListenerState {
        self.conn.state()
    }

    /// Bound address once listening.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.conn.local_addr()
    }

    /// Bind and listen now instead of on the first send.
    ///
    /// Lets the daemon attach before the first event is produced.
    pub fn listen(&mut self) -> bool {
        self.conn.ensure_listening()
    }

    /// Accept a waiting daemon, if there is one, without sending anything.
    pub fn poll_accept(&mut self) -> bool {
        self.conn.ensure_accepted()
    }

    /// Frame and send `message` to the attached daemon.
    ///
    /// On a write failure the peer is dropped; the listening socket stays up
    /// and the next send accepts whichever daemon connects next.
    pub fn send(&mut self, message: &Message) -> SendOutcome {
        let version = self.conn.endpoint().version;
        let kind = message.kind();
        let Some(frame) = encode(version, message) else {
            log::debug!("[listener] {kind} has no tag in the {version} protocol; not sent");
            return SendOutcome::Unsupported;
        };

        if !self.conn.ensure_accepted() {
            log::debug!("[listener] no daemon attached; dropping {kind}");
            return SendOutcome::NotConnected;
        }
        let Some(peer) = self.conn.peer() else {
            return SendOutcome::NotConnected;
        };

        match write_frame(&mut SignalFreeWriter(peer), &frame) {
            Ok(()) => {
                log::debug!("[listener] sent {kind} ({} bytes)", frame.len());
                SendOutcome::Sent
            }
            Err(e) => {
                log::warn!("[listener] could not transmit {kind}: {e}");
                self.conn.drop_peer();
                SendOutcome::Failed
            }
        }
    }

    /// Announce that the device finished initializing.
    pub fn notify_ready(&mut self) -> SendOutcome {
        self.send(&Message::Ready)
    }

    /// Announce that a client attached.
    pub fn notify_client_connected(&mut self, client_id: u32, process_id: i32) -> SendOutcome {
        self.send(&Message::ClientConnected {
            client_id,
            process_id,
        })
    }

    /// Announce that a client detached.
    pub fn notify_client_disconnected(&mut self, client_id: u32, process_id: i32) -> SendOutcome {
        self.send(&Message::ClientDisconnected {
            client_id,
            process_id,
        })
    }

    /// Announce that a client started IO.
    pub fn notify_client_started_io(&mut self, client_id: u32) -> SendOutcome {
        self.send(&Message::ClientStartedIo { client_id })
    }

    /// Announce that a client stopped IO.
    pub fn notify_client_stopped_io(&mut self, client_id: u32) -> SendOutcome {
        self.send(&Message::ClientStoppedIo { client_id })
    }
}

// Lets device code hold the transmitter as `dyn Xmitter`, exactly the shape
// the daemon implements on the other end. Outcomes are already logged.
impl Xmitter for Transmitter {
    fn device_ready(&mut self) {
        let _ = self.notify_ready();
    }

    fn client_connected(&mut self, client_id: u32, process_id: i32) {
        let _ = self.notify_client_connected(client_id, process_id);
    }

    fn client_disconnected(&mut self, client_id: u32, process_id: i32) {
        let _ = self.notify_client_disconnected(client_id, process_id);
    }

    fn client_started_io(&mut self, client_id: u32) {
        let _ = self.notify_client_started_io(client_id);
    }

    fn client_stopped_io(&mut self, client_id: u32) {
        let _ = self.notify_client_stopped_io(client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ephemeral(version: ProtocolVersion) -> Transmitter {
        Transmitter::new(Endpoint::new(version).with_port(0))
    }

    #[test]
    fn test_send_without_daemon_is_not_connected() {
        let mut tx = ephemeral(ProtocolVersion::Current);
        assert_eq!(tx.notify_ready(), SendOutcome::NotConnected);
        // The send attempt brought the listening socket up.
        assert_eq!(tx.state(), ListenerState::Listening);
        assert!(tx.local_addr().is_some());
    }

    #[test]
    fn test_unsupported_kind_does_not_touch_sockets() {
        let mut tx = ephemeral(ProtocolVersion::Legacy);
        assert_eq!(tx.notify_client_stopped_io(3), SendOutcome::Unsupported);
        assert_eq!(tx.state(), ListenerState::Unbound);
    }

    #[test]
    fn test_listen_is_idempotent() {
        let mut tx = ephemeral(ProtocolVersion::Current);
        assert!(tx.listen());
        let addr = tx.local_addr();
        assert!(tx.listen());
        assert_eq!(tx.local_addr(), addr);
    }
}
