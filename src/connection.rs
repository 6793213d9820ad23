//! Connection manager: socket lifecycle for both roles.
//!
//! Neither role has an explicit "disconnect" call. A socket is created when
//! a role asserts it is connected, destroyed the moment an I/O call reports
//! the peer gone, and lazily recreated on the next send or tick.
//!
//! # Listener (plugin side)
//!
//! ```text
//!            bind+listen ok            accept ok
//! Unbound ────────────────► Listening ───────────► PeerAttached
//!    ▲   ◄──────────────────    │     ◄───────────       │
//!    │    accept hard error     │      send failed       │
//!    └── bind/listen failed ────┘                        │
//! ```
//!
//! `WouldBlock` from `accept` is not an error: there is simply no peer yet.
//! A peer that has closed is noticed by peeking before the next write, and
//! is replaced by whichever daemon is waiting in the backlog.
//!
//! # Poller (daemon side)
//!
//! ```text
//! Unconnected ──connect ok──► Connected
//!      ▲                          │
//!      └──── read error / EOF ────┘
//! ```
//!
//! A failed connect leaves the role unconnected; the next tick retries.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::time::Duration;

use crate::constants::{CONNECT_TIMEOUT, DEFAULT_ADDRESS, LISTEN_BACKLOG};
use crate::protocol::ProtocolVersion;
use crate::sys;

/// Where the two roles meet, and which wire layout they speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    /// Address the listener binds and the poller connects to.
    pub address: Ipv4Addr,
    /// TCP port. `0` lets the listener pick an ephemeral port.
    pub port: u16,
    /// Wire layout in use on this endpoint.
    pub version: ProtocolVersion,
}

impl Endpoint {
    /// Loopback endpoint on the generation's fixed port.
    #[must_use]
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            port: version.port(),
            version,
        }
    }

    /// Same endpoint on a different port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Same endpoint on a different address.
    #[must_use]
    pub fn with_address(mut self, address: Ipv4Addr) -> Self {
        self.address = address;
        self
    }

    /// Socket address for bind/connect.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.address, self.port)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(ProtocolVersion::default())
    }
}

// =============================================================================
// Listener role
// =============================================================================

/// Observable state of the listener role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// No listening socket.
    Unbound,
    /// Listening, no peer tracked.
    Listening,
    /// Exactly one peer tracked.
    PeerAttached,
}

/// Listener-side sockets: one listening socket, at most one peer.
#[derive(Debug)]
pub struct ListenerConnection {
    endpoint: Endpoint,
    listening: Option<TcpListener>,
    peer: Option<TcpStream>,
}

impl ListenerConnection {
    /// Create an unbound listener for `endpoint`. No socket is created yet.
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            listening: None,
            peer: None,
        }
    }

    /// Endpoint this listener binds.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ListenerState {
        match (&self.listening, &self.peer) {
            (None, _) => ListenerState::Unbound,
            (Some(_), None) => ListenerState::Listening,
            (Some(_), Some(_)) => ListenerState::PeerAttached,
        }
    }

    /// Address actually bound, once listening. Differs from the endpoint
    /// when the endpoint port is `0`.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listening.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Bring the listening socket up if it is down.
    ///
    /// Returns false (and stays unbound) if socket creation, bind or listen
    /// fails; the next call retries the whole sequence.
    pub fn ensure_listening(&mut self) -> bool {
        if self.listening.is_some() {
            return true;
        }

        let addr = self.endpoint.socket_addr();
        log::info!("[listener] socket is down; binding {addr}");
        match sys::bind_listener(addr, LISTEN_BACKLOG) {
            Ok(listener) => {
                if let Ok(bound) = listener.local_addr() {
                    log::info!("[listener] listening on {bound}");
                }
                self.listening = Some(listener);
                self.peer = None;
                true
            }
            Err(e) => {
                log::error!("[listener] could not listen on {addr}: {e}");
                false
            }
        }
    }

    /// Make sure a peer is attached, accepting one if needed.
    ///
    /// Returns false if no peer is available right now. A hard accept error
    /// drops the listening socket so the next call rebinds from scratch.
    pub fn ensure_accepted(&mut self) -> bool {
        if !self.ensure_listening() {
            return false;
        }
        if self.peer_alive() {
            return true;
        }
        let Some(listener) = self.listening.as_ref() else {
            return false;
        };

        match listener.accept() {
            Ok((stream, peer_addr)) => match prepare_peer(&stream) {
                Ok(()) => {
                    log::info!("[listener] peer attached from {peer_addr}");
                    self.peer = Some(stream);
                    true
                }
                Err(e) => {
                    log::warn!("[listener] could not configure peer {peer_addr}: {e}");
                    false
                }
            },
            Err(e) if is_transient(&e) => {
                log::debug!("[listener] no peer waiting");
                false
            }
            Err(e) => {
                log::error!("[listener] accept failed, tearing listening socket down: {e}");
                self.listening = None;
                self.peer = None;
                false
            }
        }
    }

    /// Returns true if a peer is attached and has not gone away.
    ///
    /// The daemon never writes, so a readable EOF (or a hard error) on the
    /// peer means it closed. Such a peer is dropped here, before a frame
    /// could be written into a dead socket.
    fn peer_alive(&mut self) -> bool {
        let Some(peer) = self.peer.as_ref() else {
            return false;
        };
        let mut byte = [0u8; 1];
        match peer.peek(&mut byte) {
            Ok(0) => {
                log::info!("[listener] daemon closed the connection");
                self.drop_peer();
                false
            }
            Ok(_) => true,
            Err(e) if is_transient(&e) => true,
            Err(e) => {
                log::warn!("[listener] peer connection lost: {e}");
                self.drop_peer();
                false
            }
        }
    }

    /// The attached peer, if any.
    pub(crate) fn peer(&self) -> Option<&TcpStream> {
        self.peer.as_ref()
    }

    /// Close and forget the peer. The listening socket is kept.
    pub(crate) fn drop_peer(&mut self) {
        if self.peer.take().is_some() {
            log::info!("[listener] peer dropped; waiting for a new one");
        }
    }
}

fn prepare_peer(stream: &TcpStream) -> io::Result<()> {
    stream.set_nonblocking(true)?;
    sys::configure_stream(stream)
}

fn is_transient(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
}

// =============================================================================
// Poller role
// =============================================================================

/// Poller-side socket: connected to the listener or not at all.
#[derive(Debug)]
pub struct PollerConnection {
    endpoint: Endpoint,
    connect_timeout: Duration,
    socket: Option<TcpStream>,
    /// Set after a failed connect so repeated failures log quietly.
    failing: bool,
}

impl PollerConnection {
    /// Create an unconnected poller for `endpoint`.
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            connect_timeout: CONNECT_TIMEOUT,
            socket: None,
            failing: false,
        }
    }

    /// Override the per-attempt connect bound.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Endpoint this poller connects to.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Returns true while a socket is held.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    /// Connect if not connected. Fails fast: one attempt, no retry loop.
    ///
    /// This is the one call in the transport that can wait: the connect
    /// itself is blocking, bounded by the connect timeout
    /// ([`CONNECT_TIMEOUT`] unless overridden). On loopback it completes or
    /// is refused at once; the bound only comes into play when a firewall
    /// silently drops the SYN, and then it caps how long a tick can stall.
    pub fn ensure_connected(&mut self) -> bool {
        if self.socket.is_some() {
            return true;
        }

        let addr = SocketAddr::V4(self.endpoint.socket_addr());
        let stream = match TcpStream::connect_timeout(&addr, self.connect_timeout) {
            Ok(stream) => stream,
            Err(e) => {
                if self.failing {
                    log::debug!("[poller] connect to {addr} failed: {e}");
                } else {
                    log::info!("[poller] not connected; connect to {addr} failed: {e}");
                    self.failing = true;
                }
                return false;
            }
        };

        if let Err(e) = prepare_peer(&stream) {
            log::warn!("[poller] could not configure socket to {addr}: {e}");
            return false;
        }

        log::info!("[poller] connected to device at {addr}");
        self.failing = false;
        self.socket = Some(stream);
        true
    }

    /// The connected socket, if any.
    pub(crate) fn stream_mut(&mut self) -> Option<&mut TcpStream> {
        self.socket.as_mut()
    }

    /// Check whether the peer is still there when nothing is readable.
    ///
    /// A peek of `Ok(0)` is an orderly shutdown by the listener; a hard error
    /// means the connection is gone. Both tear the socket down.
    pub(crate) fn probe_peer(&mut self) -> bool {
        let Some(stream) = self.socket.as_ref() else {
            return false;
        };
        let mut byte = [0u8; 1];
        match stream.peek(&mut byte) {
            Ok(0) => {
                log::info!("[poller] device closed the connection");
                self.disconnect();
                false
            }
            Ok(_) => true,
            Err(e) if is_transient(&e) => true,
            Err(e) => {
                log::warn!("[poller] connection lost: {e}");
                self.disconnect();
                false
            }
        }
    }

    /// Drop the socket. The next [`PollerConnection::ensure_connected`] reconnects.
    pub(crate) fn disconnect(&mut self) {
        self.socket = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn ephemeral() -> Endpoint {
        Endpoint::new(ProtocolVersion::Current).with_port(0)
    }

    fn accept_within(conn: &mut ListenerConnection, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if conn.ensure_accepted() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_endpoint_defaults_to_loopback_and_generation_port() {
        let endpoint = Endpoint::new(ProtocolVersion::Legacy);
        assert_eq!(endpoint.address, Ipv4Addr::LOCALHOST);
        assert_eq!(endpoint.port, ProtocolVersion::Legacy.port());
        assert_eq!(endpoint.with_port(9).socket_addr().port(), 9);
    }

    #[test]
    fn test_listener_is_lazy() {
        let conn = ListenerConnection::new(ephemeral());
        assert_eq!(conn.state(), ListenerState::Unbound);
        assert!(conn.local_addr().is_none());
    }

    #[test]
    fn test_accept_without_peer_is_not_an_error() {
        let mut conn = ListenerConnection::new(ephemeral());
        assert!(!conn.ensure_accepted());
        assert_eq!(conn.state(), ListenerState::Listening);
    }

    #[test]
    fn test_bind_failure_leaves_listener_unbound() {
        let mut first = ListenerConnection::new(ephemeral());
        assert!(first.ensure_listening());
        let port = first.local_addr().unwrap().port();

        let mut second = ListenerConnection::new(ephemeral().with_port(port));
        assert!(!second.ensure_listening());
        assert_eq!(second.state(), ListenerState::Unbound);
    }

    #[test]
    fn test_accepts_single_peer_and_keeps_listening_after_drop() {
        let mut conn = ListenerConnection::new(ephemeral());
        assert!(conn.ensure_listening());
        let addr = conn.local_addr().unwrap();

        let _client = TcpStream::connect(addr).unwrap();
        assert!(accept_within(&mut conn, Duration::from_secs(2)));
        assert_eq!(conn.state(), ListenerState::PeerAttached);

        conn.drop_peer();
        assert_eq!(conn.state(), ListenerState::Listening);
        assert_eq!(conn.local_addr(), Some(addr));
    }

    #[test]
    fn test_poller_connect_failure_is_retryable() {
        // Grab a free port, then release it so nothing is listening there.
        let port = {
            let probe = TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };
        let mut poller = PollerConnection::new(ephemeral().with_port(port));
        assert!(!poller.ensure_connected());
        assert!(!poller.is_connected());

        let listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
        assert!(poller.ensure_connected());
        assert!(poller.is_connected());
        drop(listener);
    }

    #[test]
    fn test_probe_detects_orderly_close() {
        let mut conn = ListenerConnection::new(ephemeral());
        assert!(conn.ensure_listening());
        let port = conn.local_addr().unwrap().port();

        let mut poller = PollerConnection::new(ephemeral().with_port(port));
        assert!(poller.ensure_connected());
        assert!(accept_within(&mut conn, Duration::from_secs(2)));
        assert!(poller.probe_peer());

        conn.drop_peer();
        let deadline = Instant::now() + Duration::from_secs(2);
        while poller.is_connected() {
            assert!(Instant::now() < deadline, "close never observed");
            poller.probe_peer();
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!poller.probe_peer());
    }

    #[test]
    fn test_dead_peer_is_replaced_by_waiting_one() {
        let mut conn = ListenerConnection::new(ephemeral());
        assert!(conn.ensure_listening());
        let addr = conn.local_addr().unwrap();

        let first = TcpStream::connect(addr).unwrap();
        assert!(accept_within(&mut conn, Duration::from_secs(2)));
        drop(first);
        let second = TcpStream::connect(addr).unwrap();

        // The closed peer is noticed before anything is written to it.
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            assert!(conn.ensure_accepted());
            let attached = conn.peer().unwrap().peer_addr().unwrap();
            if attached == second.local_addr().unwrap() {
                break;
            }
            assert!(Instant::now() < deadline, "dead peer never replaced");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(conn.state(), ListenerState::PeerAttached);
    }

    #[test]
    fn test_closed_peer_without_replacement_goes_back_to_listening() {
        let mut conn = ListenerConnection::new(ephemeral());
        assert!(conn.ensure_listening());
        let client = TcpStream::connect(conn.local_addr().unwrap()).unwrap();
        assert!(accept_within(&mut conn, Duration::from_secs(2)));
        drop(client);

        let deadline = Instant::now() + Duration::from_secs(2);
        while conn.ensure_accepted() {
            assert!(Instant::now() < deadline, "close never observed");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(conn.state(), ListenerState::Listening);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_accept_hard_error_unbinds_then_rebinds() {
        use std::os::unix::io::AsRawFd;

        let mut conn = ListenerConnection::new(ephemeral());
        assert!(conn.ensure_listening());
        let fd = conn.listening.as_ref().unwrap().as_raw_fd();
        // SAFETY: `fd` belongs to the live listening socket held by `conn`.
        // Shutting it down takes it out of LISTEN so accept fails with EINVAL.
        assert_eq!(unsafe { libc::shutdown(fd, libc::SHUT_RDWR) }, 0);

        assert!(!conn.ensure_accepted());
        assert_eq!(conn.state(), ListenerState::Unbound);

        // The next call starts over from bind.
        assert!(!conn.ensure_accepted());
        assert_eq!(conn.state(), ListenerState::Listening);
    }

    #[test]
    fn test_refused_connect_does_not_wait_out_the_timeout() {
        let port = {
            let probe = TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };
        let mut poller = PollerConnection::new(ephemeral().with_port(port))
            .with_connect_timeout(Duration::from_secs(5));

        let started = Instant::now();
        assert!(!poller.ensure_connected());
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
