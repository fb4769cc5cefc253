//! Configuration and limits for WebSocket connections.
//!
//! A [`Config`] is read-only once a connection has been created and may be
//! shared by any number of connections.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::events::EventListener;

/// Resource limits for WebSocket connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum payload size of a single incoming frame in bytes.
    ///
    /// Default: 16 MB
    pub max_frame_size: usize,

    /// Maximum size of a complete incoming message in bytes, after all
    /// fragments have been reassembled.
    ///
    /// Default: 64 MB
    pub max_message_size: usize,

    /// Maximum number of fragments in a single message.
    ///
    /// Default: 1024
    pub max_fragment_count: usize,

    /// Maximum size of the HTTP upgrade request or response head in bytes.
    ///
    /// Default: 8 KB
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,
            max_message_size: 64 * 1024 * 1024,
            max_fragment_count: 1024,
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(
        max_frame_size: usize,
        max_message_size: usize,
        max_fragment_count: usize,
        max_handshake_size: usize,
    ) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_fragment_count,
            max_handshake_size,
        }
    }

    /// Limits suitable for small embedded systems.
    #[must_use]
    pub const fn embedded() -> Self {
        Self {
            max_frame_size: 64 * 1024,
            max_message_size: 256 * 1024,
            max_fragment_count: 16,
            max_handshake_size: 4096,
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<(), Error> {
        if size > self.max_message_size {
            Err(Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Frames larger than the limit are rejected before their payload is
    /// buffered, and reported as an oversized message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_frame_size(&self, size: usize) -> Result<(), Error> {
        if size > self.max_frame_size {
            Err(Error::MessageTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] if `count` exceeds the configured maximum.
    pub fn check_fragment_count(&self, count: usize) -> Result<(), Error> {
        if count > self.max_fragment_count {
            Err(Error::ProtocolViolation(format!(
                "too many fragments: {count} (max: {})",
                self.max_fragment_count
            )))
        } else {
            Ok(())
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::HandshakeFailure`] if `size` exceeds the configured maximum.
    pub fn check_handshake_size(&self, size: usize) -> Result<(), Error> {
        if size > self.max_handshake_size {
            Err(Error::HandshakeFailure(format!(
                "handshake too large: {size} bytes (max: {})",
                self.max_handshake_size
            )))
        } else {
            Ok(())
        }
    }
}

/// Timer configuration for WebSocket connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Maximum time to complete the opening handshake.
    ///
    /// Default: 30 seconds
    pub handshake: Duration,

    /// Maximum time to wait for the peer's close frame (or EOF) once the
    /// closing handshake has started. On expiry the connection is forced
    /// closed with 1006.
    ///
    /// Default: 5 seconds
    pub close: Duration,

    /// Close the session with 1001 after this long without inbound traffic.
    ///
    /// Default: None
    pub idle: Option<Duration>,

    /// Send a keepalive ping at this interval while the session is open.
    ///
    /// Default: None
    pub ping_interval: Option<Duration>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(30),
            close: Duration::from_secs(5),
            idle: None,
            ping_interval: None,
        }
    }
}

/// WebSocket connection configuration.
#[derive(Clone)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Fragment size for outgoing messages (in bytes).
    ///
    /// Messages larger than this are split into multiple frames.
    ///
    /// Default: 16 KB
    pub fragment_size: usize,

    /// Accept unmasked frames from clients (server only).
    ///
    /// Violates RFC 6455; only useful when testing against broken peers.
    ///
    /// Default: false
    pub accept_unmasked_frames: bool,

    /// Read buffer size (in bytes).
    ///
    /// Default: 8 KB
    pub read_buffer_size: usize,

    /// Timer configuration.
    pub timeouts: Timeouts,

    /// Observer notified of session and message events.
    ///
    /// Default: None
    pub listener: Option<Arc<dyn EventListener>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            fragment_size: 16 * 1024,
            accept_unmasked_frames: false,
            read_buffer_size: 8192,
            timeouts: Timeouts::default(),
            listener: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("limits", &self.limits)
            .field("fragment_size", &self.fragment_size)
            .field("accept_unmasked_frames", &self.accept_unmasked_frames)
            .field("read_buffer_size", &self.read_buffer_size)
            .field("timeouts", &self.timeouts)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

impl Config {
    /// Create a new configuration with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration preset for the server role.
    #[must_use]
    pub fn server() -> Self {
        Self::default()
    }

    /// Configuration preset for the client role.
    #[must_use]
    pub fn client() -> Self {
        Self::default()
    }

    /// Set custom limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the maximum incoming message size, keeping the other limits.
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.limits.max_message_size = size;
        self
    }

    /// Set fragment size for outgoing messages.
    #[must_use]
    pub fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = size;
        self
    }

    /// Set read buffer size.
    #[must_use]
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set timer configuration.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the close handshake timeout.
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.close = timeout;
        self
    }

    /// Set an event listener.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listener = Some(listener);
        self
    }
}
