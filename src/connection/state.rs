//! WebSocket connection state machine as defined in RFC 6455.

use std::sync::atomic::{AtomicU8, Ordering};

/// WebSocket connection state.
///
/// Represents the lifecycle states of a WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum ConnectionState {
    /// Handshake in progress.
    ///
    /// `handshake::accept` and `handshake::connect` only hand out a connection
    /// once the upgrade succeeded, so a `Connection` is observed in this
    /// state only by the [`AtomicState`] it starts from; it moves to `Open`
    /// as soon as the negotiated extensions and subprotocol are installed.
    #[default]
    Connecting,
    /// Connection is open and ready for data transfer.
    Open,
    /// Close frame sent or received, waiting for the handshake to finish.
    Closing,
    /// Closing handshake finished or the close timeout expired.
    Closed,
    /// The transport failed; no close handshake took place.
    Failed,
}

impl ConnectionState {
    /// Returns `true` for `Connecting`, `Open`, or `Closing` states.
    #[must_use]
    #[inline]
    pub const fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns `true` for `Closed` and `Failed`.
    #[must_use]
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }

    /// Check if sending application data is allowed in this state.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Check if receiving data is allowed in this state.
    ///
    /// Returns `true` for `Open` or `Closing` states.
    #[must_use]
    #[inline]
    pub const fn can_receive(&self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::Closing)
    }

    const fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Connecting => 0,
            ConnectionState::Open => 1,
            ConnectionState::Closing => 2,
            ConnectionState::Closed => 3,
            ConnectionState::Failed => 4,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            3 => ConnectionState::Closed,
            _ => ConnectionState::Failed,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed => write!(f, "Closed"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

/// A [`ConnectionState`] shared between the reader, the writer task and
/// every sender handle.
///
/// Transitions only move forward; terminal states are never left.
#[derive(Debug)]
pub struct AtomicState(AtomicU8);

impl AtomicState {
    #[must_use]
    pub fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    #[must_use]
    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`. Returns `false` if the state was not `from`.
    pub fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Enter `Closing` from `Open`. Returns `false` if closing already began.
    pub fn begin_closing(&self) -> bool {
        self.transition(ConnectionState::Open, ConnectionState::Closing)
    }

    /// Enter a terminal state unless one was already reached.
    /// Returns the state that is now in force.
    pub fn finish(&self, terminal: ConnectionState) -> ConnectionState {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if ConnectionState::from_u8(current).is_terminal() {
                return ConnectionState::from_u8(current);
            }
            match self.0.compare_exchange(
                current,
                terminal.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return terminal,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = ConnectionState::default();
        assert_eq!(state, ConnectionState::Connecting);
    }

    #[test]
    fn test_can_send_in_each_state() {
        assert!(!ConnectionState::Connecting.can_send());
        assert!(ConnectionState::Open.can_send());
        assert!(!ConnectionState::Closing.can_send());
        assert!(!ConnectionState::Closed.can_send());
        assert!(!ConnectionState::Failed.can_send());
    }

    #[test]
    fn test_can_receive_in_each_state() {
        assert!(!ConnectionState::Connecting.can_receive());
        assert!(ConnectionState::Open.can_receive());
        assert!(ConnectionState::Closing.can_receive());
        assert!(!ConnectionState::Closed.can_receive());
        assert!(!ConnectionState::Failed.can_receive());
    }

    #[test]
    fn test_terminal_states() {
        assert!(ConnectionState::Closed.is_terminal());
        assert!(ConnectionState::Failed.is_terminal());
        assert!(ConnectionState::Closing.is_active());
    }

    #[test]
    fn test_atomic_open_only_from_connecting() {
        let state = AtomicState::new(ConnectionState::Connecting);
        assert!(!state.begin_closing());
        assert!(state.transition(ConnectionState::Connecting, ConnectionState::Open));
        assert!(!state.transition(ConnectionState::Connecting, ConnectionState::Open));
        assert_eq!(state.load(), ConnectionState::Open);
    }

    #[test]
    fn test_atomic_begin_closing_once() {
        let state = AtomicState::new(ConnectionState::Open);
        assert!(state.begin_closing());
        assert!(!state.begin_closing());
        assert_eq!(state.load(), ConnectionState::Closing);
    }

    #[test]
    fn test_atomic_finish_is_sticky() {
        let state = AtomicState::new(ConnectionState::Closing);
        assert_eq!(state.finish(ConnectionState::Failed), ConnectionState::Failed);
        assert_eq!(state.finish(ConnectionState::Closed), ConnectionState::Failed);
        assert!(!state.begin_closing());
        assert_eq!(state.load(), ConnectionState::Failed);
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::Failed.to_string(), "Failed");
        assert_eq!(ConnectionState::Open.to_string(), "Open");
    }
}
