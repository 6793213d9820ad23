//! Message pump: the send path of the listener and the receive path of the poller.
//!
//! # Send
//!
//! A frame is pushed with [`write_frame`], which keeps re-issuing the write
//! from the unsent offset until the OS has taken every byte. Nothing ever
//! waits: `WouldBlock`, an error, or a zero-byte write ends the attempt and
//! the caller tears the peer down.
//!
//! # Receive
//!
//! The stream is not message-delimited, so a tick can land in the middle of
//! a frame. [`FrameReader`] reads in two phases:
//!
//! ```text
//! tick N:   [header]            → held header = kind, body incomplete → Pending
//! tick N+1: (held) [body.....]  → Message, held header cleared
//! ```
//!
//! Bytes are only consumed once the whole header, or the whole body, is
//! available, so a partial body is never dispatched and a header is never
//! read twice.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use crate::constants::HEADER_LEN;
use crate::error::{XmitError, XmitResult};
use crate::protocol::{
    decode_body, decode_header, Header, Message, MessageKind, ProtocolVersion, MAX_BODY_LEN,
};
use crate::sys;

// =============================================================================
// Send path
// =============================================================================

/// Result of a single notification attempt on the listener side.
///
/// Delivery is fire-and-forget; this only says what happened locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Every byte of the frame was handed to the OS.
    Sent,
    /// No peer is attached (or the listening socket could not be set up).
    NotConnected,
    /// The peer was attached but the write failed; the peer has been dropped.
    Failed,
    /// The active protocol generation has no tag for this message kind.
    Unsupported,
}

impl SendOutcome {
    /// Returns true if the frame reached the OS send buffer.
    #[must_use]
    pub fn is_sent(self) -> bool {
        self == Self::Sent
    }
}

/// Write all of `bytes`, retrying short writes from the unsent offset.
///
/// `Interrupted` is retried. A write that accepts zero bytes is terminal
/// (`WriteZero`), as is every other error including `WouldBlock`.
pub fn write_frame<W: Write + ?Sized>(writer: &mut W, bytes: &[u8]) -> io::Result<()> {
    let mut offset = 0;
    while offset < bytes.len() {
        match writer.write(&bytes[offset..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("peer accepted 0 of {} remaining bytes", bytes.len() - offset),
                ));
            }
            Ok(n) => {
                if offset + n < bytes.len() {
                    log::debug!("[pump] short write: {}/{} bytes", offset + n, bytes.len());
                }
                offset += n;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

// =============================================================================
// Receive path
// =============================================================================

/// A byte stream that can report how much is readable without blocking.
pub trait ByteSource {
    /// Bytes that can be read right now without blocking.
    fn available(&mut self) -> io::Result<usize>;

    /// Read exactly `buf.len()` bytes. Only called after [`ByteSource::available`]
    /// reported at least that many.
    fn read_exact_now(&mut self, buf: &mut [u8]) -> io::Result<()>;
}

impl ByteSource for TcpStream {
    fn available(&mut self) -> io::Result<usize> {
        sys::bytes_available(self)
    }

    fn read_exact_now(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.read_exact(buf)
    }
}

/// Outcome of one receive step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStep {
    /// Not enough bytes yet; try again on the next tick.
    Pending,
    /// A complete message was read.
    Message(Message),
}

/// Two-phase frame reader holding the header across ticks.
#[derive(Debug)]
pub struct FrameReader {
    version: ProtocolVersion,
    held: Option<MessageKind>,
}

impl FrameReader {
    /// Create a reader for `version` with no held header.
    #[must_use]
    pub fn new(version: ProtocolVersion) -> Self {
        Self { version, held: None }
    }

    /// The header read on an earlier call whose body has not arrived yet.
    #[must_use]
    pub fn held_header(&self) -> Option<MessageKind> {
        self.held
    }

    /// Forget any held header. Called when the connection is torn down,
    /// since the rest of that frame will never arrive.
    pub fn reset(&mut self) {
        self.held = None;
    }

    /// Perform at most one header read and at most one body read.
    ///
    /// # Errors
    ///
    /// [`XmitError::UnknownKind`] if the header names no kind of the active
    /// generation; [`XmitError::Io`] if the source fails.
    pub fn poll<S: ByteSource + ?Sized>(&mut self, source: &mut S) -> XmitResult<ReadStep> {
        let kind = match self.held {
            Some(kind) => kind,
            None => {
                if source.available()? < HEADER_LEN {
                    return Ok(ReadStep::Pending);
                }
                let mut header = [0u8; HEADER_LEN];
                source.read_exact_now(&mut header)?;
                match decode_header(self.version, header) {
                    Header::Known(kind) => {
                        self.held = Some(kind);
                        kind
                    }
                    Header::Unknown(tag) => return Err(XmitError::UnknownKind(tag)),
                }
            }
        };

        let body_len = self.version.body_len(kind);
        let mut body = [0u8; MAX_BODY_LEN];
        if body_len > 0 {
            if source.available()? < body_len {
                return Ok(ReadStep::Pending);
            }
            source.read_exact_now(&mut body[..body_len])?;
        }

        self.held = None;
        Ok(ReadStep::Message(decode_body(self.version, kind, &body[..body_len])))
    }
}
