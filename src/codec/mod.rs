//! Incremental frame codec.
//!
//! [`FrameCodec::decode`] works on whatever bytes the transport has
//! delivered so far. It reports [`Decoded::NeedMoreData`] without consuming
//! anything when the buffer holds only part of a frame, so the caller can
//! append the next read and try again. Header checks run before the
//! payload is complete, which keeps an oversized frame from being buffered.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::{Frame, FrameHeader, FrameValidator, MaskGenerator, Role, RsvBits};

/// Result of one decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame, and the number of bytes it occupied at the start
    /// of the buffer.
    Frame { frame: Frame, consumed: usize },
    /// The buffer does not yet hold a complete frame; nothing was consumed.
    NeedMoreData,
}

/// Role-aware frame encoder and decoder.
#[derive(Debug)]
pub struct FrameCodec {
    role: Role,
    validator: FrameValidator,
    masks: MaskGenerator,
}

impl FrameCodec {
    #[must_use]
    pub fn new(role: Role, config: &Config) -> Self {
        let validator = FrameValidator::new(role, &config.limits)
            .with_accept_unmasked(config.accept_unmasked_frames);
        Self {
            role,
            validator,
            masks: MaskGenerator::new(),
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Allow the reserved bits claimed by negotiated extensions.
    pub fn set_allowed_rsv(&mut self, rsv: RsvBits) {
        self.validator = self.validator.clone().with_allowed_rsv(rsv);
    }

    /// Decode one frame from the start of `buf`.
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` for malformed headers, a wrong masking
    ///   direction, control-frame violations or unclaimed reserved bits
    /// - `Error::MessageTooLarge` for a frame above the configured limit
    pub fn decode(&mut self, buf: &[u8]) -> Result<Decoded> {
        let Some(header) = FrameHeader::parse(buf)? else {
            return Ok(Decoded::NeedMoreData);
        };
        self.validator.validate(&header)?;

        let total = header
            .frame_len()
            .ok_or_else(|| Error::protocol("frame length overflows the address space"))?;
        if buf.len() < total {
            return Ok(Decoded::NeedMoreData);
        }

        let frame = Frame::from_header(&header, &buf[header.header_len..total]);
        Ok(Decoded::Frame {
            frame,
            consumed: total,
        })
    }

    /// Append the wire form of `frame` to `dst`, masking it when this codec
    /// acts as a client.
    ///
    /// # Errors
    ///
    /// Returns `Error::ProtocolViolation` for a fragmented or oversized
    /// control frame.
    pub fn encode(&mut self, frame: &Frame, dst: &mut Vec<u8>) -> Result<()> {
        frame.check_control()?;
        let mask = self.role.must_mask().then(|| self.masks.next_mask());
        frame.write_to(dst, mask);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use crate::protocol::OpCode;

    fn server() -> FrameCodec {
        FrameCodec::new(Role::Server, &Config::server())
    }

    fn client() -> FrameCodec {
        FrameCodec::new(Role::Client, &Config::client())
    }

    fn decode_one(codec: &mut FrameCodec, buf: &[u8]) -> (Frame, usize) {
        match codec.decode(buf).unwrap() {
            Decoded::Frame { frame, consumed } => (frame, consumed),
            Decoded::NeedMoreData => panic!("expected a frame"),
        }
    }

    #[test]
    fn test_client_to_server_round_trip() {
        let mut client = client();
        let mut server = server();
        let mut wire = Vec::new();
        client.encode(&Frame::text("Hello"), &mut wire).unwrap();
        assert_eq!(wire[1] & 0x80, 0x80);

        let (frame, consumed) = decode_one(&mut server, &wire);
        assert_eq!(consumed, wire.len());
        assert_eq!(frame, Frame::text("Hello"));
    }

    #[test]
    fn test_server_frames_are_unmasked() {
        let mut server = server();
        let mut wire = Vec::new();
        server.encode(&Frame::binary(vec![1, 2, 3]), &mut wire).unwrap();
        assert_eq!(wire, vec![0x82, 0x03, 1, 2, 3]);
    }

    #[test]
    fn test_need_more_data_for_every_prefix() {
        let mut client = client();
        let mut server = server();
        let mut wire = Vec::new();
        client.encode(&Frame::binary(vec![9u8; 300]), &mut wire).unwrap();
        for end in 0..wire.len() {
            assert_eq!(server.decode(&wire[..end]).unwrap(), Decoded::NeedMoreData);
        }
        let (frame, consumed) = decode_one(&mut server, &wire);
        assert_eq!(consumed, wire.len());
        assert_eq!(frame.payload.len(), 300);
    }

    #[test]
    fn test_decode_leaves_trailing_bytes() {
        let mut codec = client();
        let wire = [0x81, 0x01, b'a', 0x82, 0x01];
        let (frame, consumed) = decode_one(&mut codec, &wire);
        assert_eq!(frame.payload(), b"a");
        assert_eq!(consumed, 3);
        assert_eq!(codec.decode(&wire[3..]).unwrap(), Decoded::NeedMoreData);
    }

    #[test]
    fn test_server_rejects_unmasked() {
        let mut server = server();
        assert!(matches!(
            server.decode(&[0x81, 0x00]),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_client_rejects_masked() {
        let mut client = client();
        assert!(matches!(
            client.decode(&[0x81, 0x80, 0, 0, 0, 0]),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_oversized_frame_rejected_from_header_alone() {
        let config = Config::client().with_limits(Limits::new(16, 1024, 8, 1024));
        let mut codec = FrameCodec::new(Role::Client, &config);
        // header announces 17 bytes but none have arrived
        assert!(matches!(
            codec.decode(&[0x82, 17]),
            Err(Error::MessageTooLarge { size: 17, max: 16 })
        ));
    }

    #[test]
    fn test_rsv_requires_negotiation() {
        let mut codec = client();
        assert!(codec.decode(&[0xC1, 0x00]).is_err());
        codec.set_allowed_rsv(RsvBits::RSV1);
        let (frame, _) = decode_one(&mut codec, &[0xC1, 0x00]);
        assert_eq!(frame.rsv, RsvBits::RSV1);
    }

    #[test]
    fn test_encode_rejects_invalid_control_frames() {
        let mut codec = server();
        let mut wire = Vec::new();
        assert!(codec.encode(&Frame::ping(vec![0u8; 126]), &mut wire).is_err());
        assert!(
            codec
                .encode(&Frame::new(false, OpCode::Close, vec![]), &mut wire)
                .is_err()
        );
        assert!(wire.is_empty());
    }
}
