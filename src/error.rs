//! Error types for the WebSocket protocol engine.
//!
//! Frame- and message-level errors are raised by the codec and the
//! reassembler; the connection state machine decides what close code each
//! one maps to and drives the resulting transition.

use thiserror::Error;

use crate::message::CloseCode;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Malformed frame, invalid fragmentation sequence or reserved-bit misuse.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Finalized message payload is not acceptable (e.g. invalid UTF-8 text).
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Message size exceeds configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// The opening handshake could not be completed.
    #[error("Handshake failure: {0}")]
    HandshakeFailure(String),

    /// I/O failure from the underlying byte channel.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Closing handshake has started; no more application data is accepted.
    #[error("Connection is closing")]
    ConnectionClosing,

    /// Connection has been closed or failed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A negotiated extension failed to transform a message.
    #[error("Extension error: {0}")]
    Extension(String),

    /// Close code that must not be sent in a close frame.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// A queued send was withdrawn before it reached the transport.
    #[error("Send cancelled before it was written")]
    Cancelled,

    /// A timer elapsed before the awaited event.
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),
}

impl Error {
    /// Shorthand for a [`Error::ProtocolViolation`].
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Error::ProtocolViolation(msg.into())
    }

    /// Shorthand for a [`Error::HandshakeFailure`].
    pub(crate) fn handshake(msg: impl Into<String>) -> Self {
        Error::HandshakeFailure(msg.into())
    }

    /// Close code the state machine sends when this error ends a session.
    ///
    /// Returns `None` for errors that never produce a close frame: transport
    /// failures (the channel is presumed unusable) and local, non-fatal
    /// send errors.
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Error::ProtocolViolation(_) | Error::Extension(_) => Some(CloseCode::ProtocolError),
            Error::InvalidPayload(_) => Some(CloseCode::InvalidPayload),
            Error::MessageTooLarge { .. } => Some(CloseCode::MessageTooBig),
            Error::Timeout(_) => Some(CloseCode::GoingAway),
            _ => None,
        }
    }

    /// Whether this error ends the session.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ProtocolViolation(_)
                | Error::InvalidPayload(_)
                | Error::MessageTooLarge { .. }
                | Error::Extension(_)
                | Error::Transport(_)
                | Error::HandshakeFailure(_)
                | Error::Timeout(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(err: std::str::Utf8Error) -> Self {
        Error::InvalidPayload(format!("invalid UTF-8: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::MessageTooLarge {
            size: 1025,
            max: 1024,
        };
        assert_eq!(err.to_string(), "Message too large: 1025 bytes (max: 1024)");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let ws_err: Error = io_err.into();
        assert!(matches!(ws_err, Error::Transport(_)));
        assert!(ws_err.is_fatal());
        assert_eq!(ws_err.close_code(), None);
    }

    #[test]
    fn test_close_code_mapping() {
        assert_eq!(
            Error::protocol("bad").close_code(),
            Some(CloseCode::ProtocolError)
        );
        assert_eq!(
            Error::InvalidPayload("utf8".into()).close_code(),
            Some(CloseCode::InvalidPayload)
        );
        assert_eq!(
            Error::MessageTooLarge { size: 2, max: 1 }.close_code(),
            Some(CloseCode::MessageTooBig)
        );
        assert_eq!(Error::ConnectionClosing.close_code(), None);
    }

    #[test]
    fn test_local_errors_are_not_fatal() {
        assert!(!Error::ConnectionClosing.is_fatal());
        assert!(!Error::ConnectionClosed.is_fatal());
        assert!(!Error::Cancelled.is_fatal());
        assert!(!Error::InvalidCloseCode(1005).is_fatal());
    }

    #[test]
    fn test_timeouts_end_the_session() {
        let err = Error::Timeout("peer activity");
        assert!(err.is_fatal());
        assert_eq!(err.close_code(), Some(CloseCode::GoingAway));
        assert!(Error::Timeout("opening handshake").is_fatal());
    }

    #[test]
    fn test_error_clone() {
        let err = Error::InvalidPayload("x".into());
        assert_eq!(err.clone(), err);
    }
}
