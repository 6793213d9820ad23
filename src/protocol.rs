//! Wire codec for lifecycle notifications.
//!
//! Every message is a fixed-width header followed by a fixed-size,
//! kind-specific body:
//!
//! ```text
//! [u32 NE: tag] [body: body_len(kind) bytes]
//! ```
//!
//! Both peers are built from the same source and run on the same machine,
//! so fields are written in native byte order and nothing is negotiated.
//! The layout is versioned per build through [`ProtocolVersion`]; each
//! generation also listens on its own port, so mismatched peers never meet.
//!
//! # Generations
//!
//! | Generation | Port  | Tags |
//! |------------|-------|------|
//! | `Legacy`   | 24638 | `1` ClientConnected `{pid}` |
//! | `Current`  | 24639 | `1` Ready, `2` ClientConnected, `3` ClientDisconnected, `4` ClientStartedIo, `5` ClientStoppedIo |
//!
//! Tag `0` is reserved in every generation and never decodes to a kind.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{CURRENT_PORT, HEADER_LEN, LEGACY_PORT, RESERVED_TAG};

/// Largest body of any kind in any generation.
pub const MAX_BODY_LEN: usize = 8;

// =============================================================================
// Protocol generations
// =============================================================================

/// A protocol generation: the port and wire layout travel together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVersion {
    /// First generation: a single pid-only "new client" message.
    Legacy,
    /// Full lifecycle set with client ids.
    #[default]
    Current,
}

impl ProtocolVersion {
    /// Fixed port for this generation.
    #[must_use]
    pub const fn port(self) -> u16 {
        match self {
            Self::Legacy => LEGACY_PORT,
            Self::Current => CURRENT_PORT,
        }
    }

    /// Wire tag for `kind`, or `None` if this generation cannot carry it.
    #[must_use]
    pub const fn tag(self, kind: MessageKind) -> Option<u32> {
        match (self, kind) {
            (Self::Legacy, MessageKind::ClientConnected) => Some(1),
            (Self::Legacy, _) => None,
            (Self::Current, MessageKind::Ready) => Some(1),
            (Self::Current, MessageKind::ClientConnected) => Some(2),
            (Self::Current, MessageKind::ClientDisconnected) => Some(3),
            (Self::Current, MessageKind::ClientStartedIo) => Some(4),
            (Self::Current, MessageKind::ClientStoppedIo) => Some(5),
        }
    }

    /// Kind named by a wire tag, or `None` for tags this generation never writes.
    #[must_use]
    pub const fn kind_for_tag(self, tag: u32) -> Option<MessageKind> {
        if tag == RESERVED_TAG {
            return None;
        }
        match (self, tag) {
            (Self::Legacy, 1) => Some(MessageKind::ClientConnected),
            (Self::Current, 1) => Some(MessageKind::Ready),
            (Self::Current, 2) => Some(MessageKind::ClientConnected),
            (Self::Current, 3) => Some(MessageKind::ClientDisconnected),
            (Self::Current, 4) => Some(MessageKind::ClientStartedIo),
            (Self::Current, 5) => Some(MessageKind::ClientStoppedIo),
            _ => None,
        }
    }

    /// Returns true if messages of `kind` can be sent in this generation.
    #[must_use]
    pub const fn supports(self, kind: MessageKind) -> bool {
        self.tag(kind).is_some()
    }

    /// Body size in bytes that follows the header for `kind`.
    #[must_use]
    pub const fn body_len(self, kind: MessageKind) -> usize {
        match (self, kind) {
            (_, MessageKind::Ready) => 0,
            (Self::Legacy, MessageKind::ClientConnected) => 4,
            (_, MessageKind::ClientConnected | MessageKind::ClientDisconnected) => 8,
            (_, MessageKind::ClientStartedIo | MessageKind::ClientStoppedIo) => 4,
        }
    }

    /// Total encoded size of a message of `kind`.
    #[must_use]
    pub const fn frame_len(self, kind: MessageKind) -> usize {
        HEADER_LEN + self.body_len(kind)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => f.write_str("legacy"),
            Self::Current => f.write_str("current"),
        }
    }
}

impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" | "v1" | "1" => Ok(Self::Legacy),
            "current" | "v2" | "2" => Ok(Self::Current),
            other => Err(format!("unknown protocol generation: {other}")),
        }
    }
}

// =============================================================================
// Messages
// =============================================================================

/// Discriminant of a lifecycle notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Device finished initializing.
    Ready,
    /// An audio client attached to the device.
    ClientConnected,
    /// An audio client detached from the device.
    ClientDisconnected,
    /// A client started IO on the device.
    ClientStartedIo,
    /// A client stopped IO on the device.
    ClientStoppedIo,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ready => "ready",
            Self::ClientConnected => "client_connected",
            Self::ClientDisconnected => "client_disconnected",
            Self::ClientStartedIo => "client_started_io",
            Self::ClientStoppedIo => "client_stopped_io",
        };
        f.write_str(name)
    }
}

/// A decoded lifecycle notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// Device finished initializing.
    Ready,
    /// An audio client attached.
    ClientConnected {
        /// Host-assigned client identifier.
        client_id: u32,
        /// Process id of the client.
        process_id: i32,
    },
    /// An audio client detached.
    ClientDisconnected {
        /// Host-assigned client identifier.
        client_id: u32,
        /// Process id of the client.
        process_id: i32,
    },
    /// A client started IO.
    ClientStartedIo {
        /// Host-assigned client identifier.
        client_id: u32,
    },
    /// A client stopped IO.
    ClientStoppedIo {
        /// Host-assigned client identifier.
        client_id: u32,
    },
}

impl Message {
    /// The discriminant of this message.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Ready => MessageKind::Ready,
            Self::ClientConnected { .. } => MessageKind::ClientConnected,
            Self::ClientDisconnected { .. } => MessageKind::ClientDisconnected,
            Self::ClientStartedIo { .. } => MessageKind::ClientStartedIo,
            Self::ClientStoppedIo { .. } => MessageKind::ClientStoppedIo,
        }
    }
}

/// A decoded header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    /// The tag names a kind of the active generation.
    Known(MessageKind),
    /// The tag is reserved or belongs to no kind; the stream is desynchronized.
    Unknown(u32),
}

// =============================================================================
// Codec
// =============================================================================

/// Encode `message` for `version`.
///
/// Returns `None` when the generation has no tag for the message kind.
/// Otherwise the output is always exactly `version.frame_len(kind)` bytes.
#[must_use]
pub fn encode(version: ProtocolVersion, message: &Message) -> Option<Vec<u8>> {
    let kind = message.kind();
    let tag = version.tag(kind)?;

    let mut buf = Vec::with_capacity(version.frame_len(kind));
    buf.extend_from_slice(&tag.to_ne_bytes());

    match (version, *message) {
        (_, Message::Ready) => {}
        (ProtocolVersion::Legacy, Message::ClientConnected { process_id, .. }) => {
            buf.extend_from_slice(&process_id.to_ne_bytes());
        }
        (
            _,
            Message::ClientConnected {
                client_id,
                process_id,
            }
            | Message::ClientDisconnected {
                client_id,
                process_id,
            },
        ) => {
            buf.extend_from_slice(&client_id.to_ne_bytes());
            buf.extend_from_slice(&process_id.to_ne_bytes());
        }
        (_, Message::ClientStartedIo { client_id } | Message::ClientStoppedIo { client_id }) => {
            buf.extend_from_slice(&client_id.to_ne_bytes());
        }
    }

    debug_assert_eq!(buf.len(), version.frame_len(kind));
    Some(buf)
}

/// Decode a header read from the wire.
#[must_use]
pub fn decode_header(version: ProtocolVersion, bytes: [u8; HEADER_LEN]) -> Header {
    let tag = u32::from_ne_bytes(bytes);
    match version.kind_for_tag(tag) {
        Some(kind) => Header::Known(kind),
        None => Header::Unknown(tag),
    }
}

/// Rebuild a message from exactly `version.body_len(kind)` body bytes.
///
/// # Panics
///
/// Panics if `body` is shorter than the declared body length. The message
/// pump only calls this once the whole body has been read.
#[must_use]
pub fn decode_body(version: ProtocolVersion, kind: MessageKind, body: &[u8]) -> Message {
    debug_assert_eq!(body.len(), version.body_len(kind));

    match (version, kind) {
        (_, MessageKind::Ready) => Message::Ready,
        (ProtocolVersion::Legacy, MessageKind::ClientConnected) => Message::ClientConnected {
            client_id: 0,
            process_id: i32::from_ne_bytes(word(body, 0)),
        },
        (_, MessageKind::ClientConnected) => Message::ClientConnected {
            client_id: u32::from_ne_bytes(word(body, 0)),
            process_id: i32::from_ne_bytes(word(body, 4)),
        },
        (_, MessageKind::ClientDisconnected) => Message::ClientDisconnected {
            client_id: u32::from_ne_bytes(word(body, 0)),
            process_id: i32::from_ne_bytes(word(body, 4)),
        },
        (_, MessageKind::ClientStartedIo) => Message::ClientStartedIo {
            client_id: u32::from_ne_bytes(word(body, 0)),
        },
        (_, MessageKind::ClientStoppedIo) => Message::ClientStoppedIo {
            client_id: u32::from_ne_bytes(word(body, 0)),
        },
    }
}

fn word(bytes: &[u8], offset: usize) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&bytes[offset..offset + 4]);
    out
}
