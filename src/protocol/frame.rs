//! Frame wire format (RFC 6455 Section 5.2).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                     Masking key (if MASK set)                 |
//! +---------------------------------------------------------------+
//! |                          Payload data                         |
//! +---------------------------------------------------------------+
//! ```
//!
//! Parsing here is purely structural. Role-dependent checks (masking
//! direction, reserved bits, size limits) live in
//! [`FrameValidator`](crate::protocol::validation::FrameValidator).

use crate::error::{Error, Result};
use crate::message::CloseFrame;
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask;

/// Maximum payload size for control frames.
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// The three reserved header bits, as a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RsvBits(u8);

impl RsvBits {
    pub const NONE: Self = Self(0);
    pub const RSV1: Self = Self(0x40);
    pub const RSV2: Self = Self(0x20);
    pub const RSV3: Self = Self(0x10);

    /// Extract the reserved bits from the first header byte.
    #[inline]
    #[must_use]
    pub const fn from_header_byte(byte: u8) -> Self {
        Self(byte & 0x70)
    }

    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether every bit in `other` is also set in `self`.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Whether both sets claim at least one common bit.
    #[inline]
    #[must_use]
    pub const fn conflicts_with(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::fmt::Display for RsvBits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::RSV1) {
            names.push("rsv1");
        }
        if self.contains(Self::RSV2) {
            names.push("rsv2");
        }
        if self.contains(Self::RSV3) {
            names.push("rsv3");
        }
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

/// Decoded fixed part of a frame: everything up to the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub rsv: RsvBits,
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    pub payload_len: u64,
    /// Bytes occupied by the header, including extended length and mask key.
    pub header_len: usize,
}

impl FrameHeader {
    /// Parse a header from the start of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold the complete header.
    ///
    /// # Errors
    ///
    /// Returns `Error::ProtocolViolation` for a reserved opcode or a 64-bit
    /// length with the most significant bit set.
    pub fn parse(buf: &[u8]) -> Result<Option<Self>> {
        if buf.len() < 2 {
            return Ok(None);
        }
        let byte0 = buf[0];
        let byte1 = buf[1];

        let fin = byte0 & 0x80 != 0;
        let rsv = RsvBits::from_header_byte(byte0);
        let opcode = OpCode::from_u8(byte0 & 0x0F)?;
        let masked = byte1 & 0x80 != 0;

        let (payload_len, len_end) = match byte1 & 0x7F {
            126 => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
            }
            127 => {
                if buf.len() < 10 {
                    return Ok(None);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[2..10]);
                let len = u64::from_be_bytes(raw);
                if len & (1 << 63) != 0 {
                    return Err(Error::protocol(
                        "64-bit payload length with the most significant bit set",
                    ));
                }
                (len, 10)
            }
            short => (u64::from(short), 2),
        };

        let header_len = if masked { len_end + 4 } else { len_end };
        if buf.len() < header_len {
            return Ok(None);
        }
        let mask = masked.then(|| [buf[len_end], buf[len_end + 1], buf[len_end + 2], buf[len_end + 3]]);

        Ok(Some(Self {
            fin,
            rsv,
            opcode,
            mask,
            payload_len,
            header_len,
        }))
    }

    /// Total frame length on the wire, or `None` if it does not fit in memory.
    #[must_use]
    pub fn frame_len(&self) -> Option<usize> {
        usize::try_from(self.payload_len)
            .ok()
            .and_then(|len| len.checked_add(self.header_len))
    }
}

/// A single frame with an unmasked payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    /// Reserved bits. Zero unless a negotiated extension claims them.
    pub rsv: RsvBits,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

impl Frame {
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin,
            rsv: RsvBits::NONE,
            opcode,
            payload,
        }
    }

    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Text, data.into())
    }

    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Binary, data.into())
    }

    #[must_use]
    pub fn continuation(fin: bool, data: impl Into<Vec<u8>>) -> Self {
        Self::new(fin, OpCode::Continuation, data.into())
    }

    /// Close frame; `None` produces an empty payload.
    #[must_use]
    pub fn close(close: Option<&CloseFrame>) -> Self {
        let payload = close.map(CloseFrame::to_payload).unwrap_or_default();
        Self::new(true, OpCode::Close, payload)
    }

    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Ping, data.into())
    }

    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Pong, data.into())
    }

    #[must_use]
    pub fn with_rsv(mut self, rsv: RsvBits) -> Self {
        self.rsv = rsv;
        self
    }

    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Parse one complete frame from the start of `buf`, unmasking the
    /// payload.
    ///
    /// Returns the frame and the number of bytes it occupied, or `Ok(None)`
    /// if `buf` is incomplete. Nothing is consumed in that case.
    ///
    /// # Errors
    ///
    /// See [`FrameHeader::parse`]. Also fails when the declared length does
    /// not fit in memory on this platform.
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        let Some(header) = FrameHeader::parse(buf)? else {
            return Ok(None);
        };
        let total = header.frame_len().ok_or(Error::MessageTooLarge {
            size: usize::MAX,
            max: usize::MAX - header.header_len,
        })?;
        if buf.len() < total {
            return Ok(None);
        }
        Ok(Some((Self::from_header(&header, &buf[header.header_len..total]), total)))
    }

    /// Build a frame from a parsed header and its still-masked payload bytes.
    #[must_use]
    pub fn from_header(header: &FrameHeader, raw_payload: &[u8]) -> Self {
        let mut payload = raw_payload.to_vec();
        if let Some(mask) = header.mask {
            apply_mask(&mut payload, mask);
        }
        Self {
            fin: header.fin,
            rsv: header.rsv,
            opcode: header.opcode,
            payload,
        }
    }

    /// Control frames must be final and carry at most 125 bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::ProtocolViolation` if a control frame breaks either rule.
    pub fn check_control(&self) -> Result<()> {
        if self.opcode.is_control() {
            if !self.fin {
                return Err(Error::protocol(format!("fragmented {} frame", self.opcode)));
            }
            if self.payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::protocol(format!(
                    "{} frame payload of {} bytes exceeds {MAX_CONTROL_FRAME_PAYLOAD}",
                    self.opcode,
                    self.payload.len()
                )));
            }
        }
        Ok(())
    }

    /// Bytes needed to write this frame.
    #[must_use]
    pub fn wire_size(&self, masked: bool) -> usize {
        let len = self.payload.len();
        let extended = match len {
            0..=125 => 0,
            126..=0xFFFF => 2,
            _ => 8,
        };
        let mask_len = if masked { 4 } else { 0 };
        2 + extended + mask_len + len
    }

    /// Append the wire form of this frame to `dst`, masking the payload
    /// with `mask` when given.
    pub fn write_to(&self, dst: &mut Vec<u8>, mask: Option<[u8; 4]>) {
        let len = self.payload.len();
        dst.reserve(self.wire_size(mask.is_some()));

        let mut byte0 = self.opcode.as_u8() | self.rsv.bits();
        if self.fin {
            byte0 |= 0x80;
        }
        dst.push(byte0);

        let mask_bit = if mask.is_some() { 0x80 } else { 0 };
        match len {
            0..=125 => dst.push(mask_bit | len as u8),
            126..=0xFFFF => {
                dst.push(mask_bit | 126);
                dst.extend_from_slice(&(len as u16).to_be_bytes());
            }
            _ => {
                dst.push(mask_bit | 127);
                dst.extend_from_slice(&(len as u64).to_be_bytes());
            }
        }

        match mask {
            Some(key) => {
                dst.extend_from_slice(&key);
                let start = dst.len();
                dst.extend_from_slice(&self.payload);
                apply_mask(&mut dst[start..], key);
            }
            None => dst.extend_from_slice(&self.payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::CloseCode;

    #[test]
    fn test_parse_unmasked_text_frame() {
        let data = [0x81, 0x05, b'H', b'e', b'l', b'l', b'o'];
        let (frame, len) = Frame::parse(&data).unwrap().unwrap();
        assert_eq!(len, 7);
        assert!(frame.fin);
        assert!(frame.rsv.is_empty());
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.payload(), b"Hello");
    }

    #[test]
    fn test_parse_masked_text_frame() {
        // RFC 6455 Section 5.7, single-frame masked text message.
        let data = [
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ];
        let (frame, len) = Frame::parse(&data).unwrap().unwrap();
        assert_eq!(len, 11);
        assert_eq!(frame.payload(), b"Hello");
    }

    #[test]
    fn test_parse_fragmented_frame() {
        let data = [0x01, 0x03, b'H', b'e', b'l'];
        let (frame, _) = Frame::parse(&data).unwrap().unwrap();
        assert!(!frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
    }

    #[test]
    fn test_parse_incomplete_needs_more() {
        let data = [0x81, 0x05, b'H', b'e'];
        for end in 0..data.len() {
            assert!(Frame::parse(&data[..end]).unwrap().is_none());
        }
        // 16-bit length not yet complete
        assert!(Frame::parse(&[0x82, 126, 0x01]).unwrap().is_none());
        // mask key not yet complete
        assert!(Frame::parse(&[0x82, 0x81, 1, 2]).unwrap().is_none());
    }

    #[test]
    fn test_parse_extended_16bit_length() {
        let frame = Frame::binary(vec![7u8; 300]);
        let mut buf = Vec::new();
        frame.write_to(&mut buf, None);
        assert_eq!(buf[1], 126);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 300);
        let (parsed, len) = Frame::parse(&buf).unwrap().unwrap();
        assert_eq!(len, 304);
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_parse_extended_64bit_length() {
        let frame = Frame::binary(vec![1u8; 70_000]);
        let mut buf = Vec::new();
        frame.write_to(&mut buf, Some([1, 2, 3, 4]));
        assert_eq!(buf[1], 0x80 | 127);
        let (parsed, len) = Frame::parse(&buf).unwrap().unwrap();
        assert_eq!(len, 2 + 8 + 4 + 70_000);
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_parse_64bit_length_high_bit_rejected() {
        let mut data = vec![0x82, 127];
        data.extend_from_slice(&(1u64 << 63).to_be_bytes());
        assert!(matches!(
            Frame::parse(&data),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_parse_reserved_opcode_rejected() {
        assert!(matches!(
            Frame::parse(&[0x83, 0x00]),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_parse_reports_rsv_bits() {
        let (frame, _) = Frame::parse(&[0xC1, 0x00]).unwrap().unwrap();
        assert_eq!(frame.rsv, RsvBits::RSV1);
        let (frame, _) = Frame::parse(&[0xB2, 0x00]).unwrap().unwrap();
        assert_eq!(frame.rsv, RsvBits::RSV2.union(RsvBits::RSV3));
    }

    #[test]
    fn test_write_unmasked_frame() {
        let mut buf = Vec::new();
        Frame::text("Hello").write_to(&mut buf, None);
        assert_eq!(buf, vec![0x81, 0x05, b'H', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn test_write_masked_frame_matches_rfc() {
        let mut buf = Vec::new();
        Frame::text("Hello").write_to(&mut buf, Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(
            buf,
            vec![0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
    }

    #[test]
    fn test_write_rsv_bits() {
        let mut buf = Vec::new();
        Frame::text("x").with_rsv(RsvBits::RSV1).write_to(&mut buf, None);
        assert_eq!(buf[0], 0xC1);
    }

    #[test]
    fn test_wire_size_matches_written_length() {
        for len in [0usize, 125, 126, 65_535, 65_536] {
            let frame = Frame::binary(vec![0u8; len]);
            for masked in [false, true] {
                let mut buf = Vec::new();
                frame.write_to(&mut buf, masked.then_some([9, 9, 9, 9]));
                assert_eq!(buf.len(), frame.wire_size(masked));
            }
        }
    }

    #[test]
    fn test_check_control_rules() {
        assert!(Frame::ping(vec![0u8; 125]).check_control().is_ok());
        assert!(matches!(
            Frame::ping(vec![0u8; 126]).check_control(),
            Err(Error::ProtocolViolation(_))
        ));
        assert!(matches!(
            Frame::new(false, OpCode::Pong, vec![]).check_control(),
            Err(Error::ProtocolViolation(_))
        ));
        // data frames are not subject to the control limits
        assert!(Frame::new(false, OpCode::Binary, vec![0u8; 200]).check_control().is_ok());
    }

    #[test]
    fn test_close_frame_payload() {
        let close = CloseFrame::new(CloseCode::Normal, "bye");
        let frame = Frame::close(Some(&close));
        assert_eq!(frame.payload(), &[0x03, 0xE8, b'b', b'y', b'e']);
        assert!(Frame::close(None).payload().is_empty());
    }

    #[test]
    fn test_rsv_bits_set_operations() {
        let both = RsvBits::RSV1.union(RsvBits::RSV3);
        assert!(both.contains(RsvBits::RSV1));
        assert!(!both.contains(RsvBits::RSV2));
        assert!(both.conflicts_with(RsvBits::RSV3));
        assert!(!RsvBits::RSV1.conflicts_with(RsvBits::RSV2));
        assert_eq!(both.difference(RsvBits::RSV1), RsvBits::RSV3);
        assert_eq!(both.to_string(), "rsv1|rsv3");
        assert_eq!(RsvBits::NONE.to_string(), "none");
    }
}
