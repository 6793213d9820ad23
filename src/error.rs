//! Error types for the transport.
//!
//! Only conditions the caller must act on are errors. Transient
//! connectivity problems (refused connects, no peer yet, dropped peers)
//! are reported through return values such as
//! [`SendOutcome`](crate::pump::SendOutcome) and
//! [`TickStatus`](crate::poller::TickStatus) instead.

use thiserror::Error;

/// Errors surfaced by the poller role.
#[derive(Error, Debug)]
pub enum XmitError {
    /// `tick` was called before any handler was registered.
    #[error("cannot tick: no handler has been registered")]
    NoHandler,

    /// A header was read that names no kind in the active protocol
    /// generation. The byte stream can no longer be segmented.
    #[error("unknown message kind on the wire: {0}")]
    UnknownKind(u32),

    /// Socket I/O failed in a way the caller should see.
    #[error("socket I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl XmitError {
    /// Returns true if the error means the run loop must stop.
    ///
    /// The daemon is expected to exit and let its supervisor restart it.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NoHandler | Self::UnknownKind(_))
    }
}

/// Result alias for poller operations.
pub type XmitResult<T> = Result<T, XmitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(XmitError::NoHandler.is_fatal());
        assert!(XmitError::UnknownKind(99).is_fatal());
        let io = XmitError::from(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(!io.is_fatal());
    }

    #[test]
    fn test_unknown_kind_message_includes_tag() {
        let err = XmitError::UnknownKind(0xdead);
        assert!(err.to_string().contains("57005"));
    }
}
