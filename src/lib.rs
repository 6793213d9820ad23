//! hostlink - loopback notification transport between an audio-device
//! plugin and a user-space daemon.
//!
//! The plugin runs inside a host process it does not control: it may not
//! own threads, block, or share memory with anything outside. It therefore
//! talks to its companion daemon over a single loopback TCP connection,
//! driven cooperatively from both ends.
//!
//! # Architecture
//!
//! ```text
//!  plugin (listener role)                       daemon (poller role)
//!  ──────────────────────                       ────────────────────
//!  Transmitter::notify_*                        loop { Poller::tick(); sleep }
//!        │                                              │
//!  protocol::encode                             PollerConnection (connect)
//!        │                                              │
//!  ListenerConnection (bind/accept)             FrameReader (header, body)
//!        │                                              │
//!  pump::write_frame ───── 127.0.0.1:port ─────►  Dispatcher → dyn Xmitter
//! ```
//!
//! - The listener binds a fixed port, tracks at most one peer, and only sends.
//! - The poller connects, reads at most one header and one body per tick,
//!   and hands each complete message to the registered [`Xmitter`].
//! - Either side recreates its socket lazily after the other goes away.
//!
//! # Modules
//!
//! - [`protocol`] - Wire codec and protocol generations
//! - [`connection`] - Socket lifecycle for both roles
//! - [`pump`] - Framed send and two-phase receive
//! - [`dispatch`] - Handler trait and dispatcher
//! - [`transmitter`] / [`poller`] - Role facades
//! - [`config`] - Configuration loading

pub mod config;
pub mod connection;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod poller;
pub mod protocol;
pub mod pump;
pub mod transmitter;

mod sys;

// Re-export commonly used types
pub use config::Config;
pub use connection::{Endpoint, ListenerState};
pub use dispatch::Xmitter;
pub use error::{XmitError, XmitResult};
pub use poller::{Poller, TickStatus};
pub use protocol::{Message, MessageKind, ProtocolVersion};
pub use pump::SendOutcome;
pub use transmitter::Transmitter;
