//! Session identity and the event-listener boundary.
//!
//! The engine reports session lifecycle and completed messages to an
//! optional [`EventListener`]. Aggregation and exposure are up to the
//! implementation; every method defaults to a no-op.

use std::fmt;

use crate::error::Error;
use crate::message::{CloseCode, MessageKind};

/// Identifier of one WebSocket session, unique with overwhelming
/// probability. Displayed as 16 hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Draw a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 8];
        if getrandom::getrandom(&mut bytes).is_err() {
            let nanos = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0);
            bytes = nanos.to_le_bytes();
        }
        Self(u64::from_le_bytes(bytes))
    }

    #[must_use]
    pub const fn from_u64(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Observer of session and message events.
///
/// Called inline from the connection's tasks, so implementations should
/// return quickly.
pub trait EventListener: Send + Sync {
    /// The opening handshake completed and the session is open.
    fn on_session_opened(&self, _session: SessionId) {}

    /// The session reached a terminal state.
    fn on_session_closed(&self, _session: SessionId, _code: CloseCode) {}

    /// A complete message (data or control) was received.
    fn on_message_received(&self, _session: SessionId, _kind: MessageKind, _len: usize) {}

    /// A complete message (data or control) was written to the transport.
    fn on_message_sent(&self, _session: SessionId, _kind: MessageKind, _len: usize) {}

    /// A fatal error ended the session.
    fn on_error(&self, _session: SessionId, _error: &Error) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_display_is_hex() {
        assert_eq!(SessionId::from_u64(0xabc).to_string(), "0000000000000abc");
    }

    #[test]
    fn test_session_ids_differ() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_listener_defaults_are_noops() {
        struct Silent;
        impl EventListener for Silent {}

        let listener = Silent;
        let id = SessionId::from_u64(1);
        listener.on_session_opened(id);
        listener.on_message_received(id, MessageKind::Text, 5);
        listener.on_session_closed(id, CloseCode::Normal);
    }
}
