//! Application messages, close codes and close payloads (RFC 6455 Section 7.4).

use crate::error::{Error, Result};
use crate::protocol::frame::MAX_CONTROL_FRAME_PAYLOAD;

/// WebSocket close status code per RFC 6455 Section 7.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum CloseCode {
    /// Normal closure (1000).
    #[default]
    Normal,
    /// Going away (1001), e.g. server shutdown or idle timeout.
    GoingAway,
    /// Protocol error (1002).
    ProtocolError,
    /// Unsupported data (1003).
    UnsupportedData,
    /// No status code was present in the peer's close frame (1005).
    ///
    /// Reported locally only; never sent on the wire.
    NoStatusReceived,
    /// Connection dropped without a closing handshake (1006).
    ///
    /// Reported locally only; never sent on the wire.
    Abnormal,
    /// Invalid payload data (1007), e.g. non-UTF-8 text.
    InvalidPayload,
    /// Policy violation (1008).
    PolicyViolation,
    /// Message too big (1009).
    MessageTooBig,
    /// Mandatory extension (1010).
    MandatoryExtension,
    /// Unexpected condition (1011).
    InternalError,
    /// Registered (1012-1014) or application range (3000-4999) codes.
    Other(u16),
}

impl CloseCode {
    /// Create a `CloseCode` from its numeric value.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1005 => CloseCode::NoStatusReceived,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalError,
            other => CloseCode::Other(other),
        }
    }

    /// Get the numeric value of this close code.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::NoStatusReceived => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::Other(code) => *code,
        }
    }

    /// Check if this close code may appear in a close frame.
    ///
    /// Valid codes are 1000-1003, 1007-1014 and the 3000-4999 range reserved
    /// for libraries and applications.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        let code = self.as_u16();
        matches!(code, 1000..=1003 | 1007..=1014 | 3000..=4999)
    }

    /// Check if this close code is reserved and MUST NOT be sent.
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        let code = self.as_u16();
        matches!(code, 1004..=1006 | 1015)
    }

    /// Whether the code belongs to the application-reserved range (4000-4999).
    #[must_use]
    pub const fn is_application(&self) -> bool {
        matches!(self.as_u16(), 4000..=4999)
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Close frame containing status code and optional reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// The close status code.
    pub code: CloseCode,
    /// Human-readable reason for closing (UTF-8, max 123 bytes).
    pub reason: String,
}

impl CloseFrame {
    /// Create a new close frame with the given code and reason.
    #[must_use]
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Parse the payload of a received close frame.
    ///
    /// An empty payload yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` for a one-byte payload or a code that may
    ///   not appear on the wire
    /// - `Error::InvalidPayload` if the reason is not valid UTF-8
    pub fn parse(payload: &[u8]) -> Result<Option<Self>> {
        match payload.len() {
            0 => Ok(None),
            1 => Err(Error::protocol("close frame payload of one byte")),
            _ => {
                let code = CloseCode::from_u16(u16::from_be_bytes([payload[0], payload[1]]));
                if !code.is_valid() {
                    return Err(Error::protocol(format!("invalid close code {code}")));
                }
                let reason = std::str::from_utf8(&payload[2..])?;
                Ok(Some(Self::new(code, reason)))
            }
        }
    }

    /// Serialize into a close frame payload, truncating the reason on a
    /// character boundary so the payload fits in a control frame.
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        let max_reason = MAX_CONTROL_FRAME_PAYLOAD - 2;
        let mut end = self.reason.len().min(max_reason);
        while !self.reason.is_char_boundary(end) {
            end -= 1;
        }
        let mut data = self.code.as_u16().to_be_bytes().to_vec();
        data.extend_from_slice(&self.reason.as_bytes()[..end]);
        data
    }
}

/// Kind of a message, as reported to event listeners and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Text message.
    Text,
    /// Binary message.
    Binary,
    /// Ping, pong or close.
    Control,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Text => write!(f, "text"),
            MessageKind::Binary => write!(f, "binary"),
            MessageKind::Control => write!(f, "control"),
        }
    }
}

/// WebSocket message types.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Message {
    /// A text message (UTF-8 encoded).
    Text(String),
    /// A binary message (arbitrary bytes).
    Binary(Vec<u8>),
    /// A ping frame (control frame, payload <= 125 bytes).
    Ping(Vec<u8>),
    /// A pong frame (control frame, payload <= 125 bytes).
    Pong(Vec<u8>),
    /// A close frame (control frame, may include status code and reason).
    Close(Option<CloseFrame>),
}

impl Message {
    /// Create a text message.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Message::Text(s.into())
    }

    /// Create a binary message.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Message::Binary(data.into())
    }

    /// Create a ping message.
    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Message::Ping(data.into())
    }

    /// Create a pong message.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Message::Pong(data.into())
    }

    /// Create a close message with status code and reason.
    #[must_use]
    pub fn close(code: CloseCode, reason: impl Into<String>) -> Self {
        Message::Close(Some(CloseFrame::new(code, reason)))
    }

    /// Returns `true` if this is a text message.
    #[must_use]
    pub const fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }

    /// Returns `true` if this is a binary message.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        matches!(self, Message::Binary(_))
    }

    /// Returns `true` if this is a control message (ping, pong, or close).
    #[must_use]
    pub const fn is_control(&self) -> bool {
        matches!(
            self,
            Message::Ping(_) | Message::Pong(_) | Message::Close(_)
        )
    }

    /// Kind of this message for statistics and listeners.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Message::Text(_) => MessageKind::Text,
            Message::Binary(_) => MessageKind::Binary,
            _ => MessageKind::Control,
        }
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Message::Text(s) => s.len(),
            Message::Binary(d) | Message::Ping(d) | Message::Pong(d) => d.len(),
            Message::Close(Some(frame)) => 2 + frame.reason.len(),
            Message::Close(None) => 0,
        }
    }

    /// Returns `true` if the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the text content, if this is a text message.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the binary content, if this is a binary message.
    #[must_use]
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Message::Binary(data) => Some(data),
            _ => None,
        }
    }

    /// Consume and return the text content, if this is a text message.
    #[must_use]
    pub fn into_text(self) -> Option<String> {
        match self {
            Message::Text(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_kind() {
        assert_eq!(Message::text("hi").kind(), MessageKind::Text);
        assert_eq!(Message::binary(vec![1]).kind(), MessageKind::Binary);
        assert_eq!(Message::ping(vec![]).kind(), MessageKind::Control);
        assert_eq!(Message::Close(None).kind(), MessageKind::Control);
    }

    #[test]
    fn test_message_len() {
        assert_eq!(Message::text("hello").len(), 5);
        assert_eq!(Message::close(CloseCode::Normal, "bye").len(), 5);
        assert!(Message::Close(None).is_empty());
    }

    #[test]
    fn test_close_code_roundtrip_values() {
        for code in [1000, 1001, 1002, 1003, 1005, 1006, 1007, 1008, 1009, 1010, 1011] {
            assert_eq!(CloseCode::from_u16(code).as_u16(), code);
        }
        assert_eq!(CloseCode::from_u16(4000), CloseCode::Other(4000));
    }

    #[test]
    fn test_close_code_validity() {
        assert!(CloseCode::Normal.is_valid());
        assert!(CloseCode::MessageTooBig.is_valid());
        assert!(CloseCode::Other(1012).is_valid());
        assert!(CloseCode::Other(3000).is_valid());
        assert!(CloseCode::Other(4999).is_valid());

        assert!(!CloseCode::NoStatusReceived.is_valid());
        assert!(!CloseCode::Abnormal.is_valid());
        assert!(!CloseCode::Other(999).is_valid());
        assert!(!CloseCode::Other(1004).is_valid());
        assert!(!CloseCode::Other(1015).is_valid());
        assert!(!CloseCode::Other(2999).is_valid());
        assert!(!CloseCode::Other(5000).is_valid());
    }

    #[test]
    fn test_close_code_reserved() {
        assert!(CloseCode::Other(1004).is_reserved());
        assert!(CloseCode::NoStatusReceived.is_reserved());
        assert!(CloseCode::Abnormal.is_reserved());
        assert!(CloseCode::Other(1015).is_reserved());
        assert!(!CloseCode::Normal.is_reserved());
    }

    #[test]
    fn test_application_range() {
        assert!(CloseCode::Other(4001).is_application());
        assert!(!CloseCode::Other(3001).is_application());
        assert!(!CloseCode::Normal.is_application());
    }

    #[test]
    fn test_close_frame_parse() {
        assert_eq!(CloseFrame::parse(&[]).unwrap(), None);

        let parsed = CloseFrame::parse(&[0x03, 0xe8, b'o', b'k']).unwrap().unwrap();
        assert_eq!(parsed.code, CloseCode::Normal);
        assert_eq!(parsed.reason, "ok");
    }

    #[test]
    fn test_close_frame_parse_rejects_bad_payloads() {
        assert!(matches!(
            CloseFrame::parse(&[0x03]),
            Err(Error::ProtocolViolation(_))
        ));
        // 1005 must never appear on the wire
        assert!(matches!(
            CloseFrame::parse(&[0x03, 0xed]),
            Err(Error::ProtocolViolation(_))
        ));
        assert!(matches!(
            CloseFrame::parse(&[0x03, 0xe8, 0xff, 0xfe]),
            Err(Error::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_close_frame_payload_truncates_reason() {
        let frame = CloseFrame::new(CloseCode::GoingAway, "é".repeat(100));
        let payload = frame.to_payload();
        assert!(payload.len() <= MAX_CONTROL_FRAME_PAYLOAD);
        assert!(std::str::from_utf8(&payload[2..]).is_ok());
        assert_eq!(u16::from_be_bytes([payload[0], payload[1]]), 1001);
    }
}
