//! Header checks that depend on the connection role and negotiated state.
//!
//! Run on every incoming header before its payload is buffered, so an
//! oversized or malformed frame is rejected without reading the payload.

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::protocol::frame::{FrameHeader, MAX_CONTROL_FRAME_PAYLOAD, RsvBits};
use crate::protocol::role::Role;

/// Validator for incoming frame headers.
#[derive(Debug, Clone)]
pub struct FrameValidator {
    role: Role,
    max_frame_size: usize,
    allowed_rsv: RsvBits,
    accept_unmasked_frames: bool,
}

impl FrameValidator {
    /// Create a validator for an endpoint acting as `role`.
    #[must_use]
    pub fn new(role: Role, limits: &Limits) -> Self {
        Self {
            role,
            max_frame_size: limits.max_frame_size,
            allowed_rsv: RsvBits::NONE,
            accept_unmasked_frames: false,
        }
    }

    /// Tolerate unmasked frames from clients. Only meaningful for servers.
    #[must_use]
    pub fn with_accept_unmasked(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }

    /// Reserved bits claimed by negotiated extensions.
    #[must_use]
    pub fn with_allowed_rsv(mut self, rsv: RsvBits) -> Self {
        self.allowed_rsv = rsv;
        self
    }

    #[must_use]
    pub fn allowed_rsv(&self) -> RsvBits {
        self.allowed_rsv
    }

    /// Validate an incoming header.
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` for a wrong masking direction, a
    ///   fragmented or oversized control frame, or reserved bits that no
    ///   negotiated extension claims
    /// - `Error::MessageTooLarge` if the payload exceeds the frame limit
    pub fn validate(&self, header: &FrameHeader) -> Result<()> {
        self.validate_masking(header.mask.is_some())?;

        if header.opcode.is_control() {
            if !header.fin {
                return Err(Error::protocol(format!("fragmented {} frame", header.opcode)));
            }
            if header.payload_len > MAX_CONTROL_FRAME_PAYLOAD as u64 {
                return Err(Error::protocol(format!(
                    "{} frame payload of {} bytes exceeds {MAX_CONTROL_FRAME_PAYLOAD}",
                    header.opcode, header.payload_len
                )));
            }
            if !header.rsv.is_empty() {
                return Err(Error::protocol(format!(
                    "reserved bits {} set on {} frame",
                    header.rsv, header.opcode
                )));
            }
        }

        let unclaimed = header.rsv.difference(self.allowed_rsv);
        if !unclaimed.is_empty() {
            return Err(Error::protocol(format!(
                "reserved bits {unclaimed} set without a negotiated extension"
            )));
        }

        let len = usize::try_from(header.payload_len).unwrap_or(usize::MAX);
        if len > self.max_frame_size {
            return Err(Error::MessageTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }

    fn validate_masking(&self, masked: bool) -> Result<()> {
        match self.role {
            Role::Server if !masked && !self.accept_unmasked_frames => {
                Err(Error::protocol("unmasked frame from client"))
            }
            Role::Client if masked => Err(Error::protocol("masked frame from server")),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OpCode;

    fn header(opcode: OpCode, fin: bool, masked: bool, len: u64) -> FrameHeader {
        FrameHeader {
            fin,
            rsv: RsvBits::NONE,
            opcode,
            mask: masked.then_some([1, 2, 3, 4]),
            payload_len: len,
            header_len: 2,
        }
    }

    // --------------------------------------------------------------------------
    // Masking direction
    // --------------------------------------------------------------------------

    #[test]
    fn test_server_rejects_unmasked_client_frame() {
        let validator = FrameValidator::new(Role::Server, &Limits::default());
        assert!(matches!(
            validator.validate(&header(OpCode::Text, true, false, 5)),
            Err(Error::ProtocolViolation(_))
        ));
        assert!(validator.validate(&header(OpCode::Text, true, true, 5)).is_ok());
    }

    #[test]
    fn test_client_rejects_masked_server_frame() {
        let validator = FrameValidator::new(Role::Client, &Limits::default());
        assert!(matches!(
            validator.validate(&header(OpCode::Binary, true, true, 5)),
            Err(Error::ProtocolViolation(_))
        ));
        assert!(validator.validate(&header(OpCode::Binary, true, false, 5)).is_ok());
    }

    #[test]
    fn test_server_accept_unmasked_escape_hatch() {
        let validator =
            FrameValidator::new(Role::Server, &Limits::default()).with_accept_unmasked(true);
        assert!(validator.validate(&header(OpCode::Text, true, false, 5)).is_ok());
    }

    // --------------------------------------------------------------------------
    // Control frames
    // --------------------------------------------------------------------------

    #[test]
    fn test_fragmented_control_frame_rejected() {
        let validator = FrameValidator::new(Role::Client, &Limits::default());
        assert!(matches!(
            validator.validate(&header(OpCode::Ping, false, false, 0)),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_oversized_control_frame_rejected() {
        let validator = FrameValidator::new(Role::Client, &Limits::default());
        assert!(validator.validate(&header(OpCode::Close, true, false, 125)).is_ok());
        assert!(matches!(
            validator.validate(&header(OpCode::Close, true, false, 126)),
            Err(Error::ProtocolViolation(_))
        ));
    }

    // --------------------------------------------------------------------------
    // Reserved bits
    // --------------------------------------------------------------------------

    #[test]
    fn test_rsv_without_extension_rejected() {
        let validator = FrameValidator::new(Role::Client, &Limits::default());
        let mut h = header(OpCode::Text, true, false, 1);
        h.rsv = RsvBits::RSV1;
        assert!(matches!(
            validator.validate(&h),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_rsv_claimed_by_extension_accepted() {
        let validator = FrameValidator::new(Role::Client, &Limits::default())
            .with_allowed_rsv(RsvBits::RSV1);
        let mut h = header(OpCode::Text, true, false, 1);
        h.rsv = RsvBits::RSV1;
        assert!(validator.validate(&h).is_ok());

        h.rsv = RsvBits::RSV2;
        assert!(validator.validate(&h).is_err());
    }

    #[test]
    fn test_rsv_on_control_frame_rejected_even_when_claimed() {
        let validator = FrameValidator::new(Role::Client, &Limits::default())
            .with_allowed_rsv(RsvBits::RSV1);
        let mut h = header(OpCode::Ping, true, false, 0);
        h.rsv = RsvBits::RSV1;
        assert!(validator.validate(&h).is_err());
    }

    // --------------------------------------------------------------------------
    // Size limit
    // --------------------------------------------------------------------------

    #[test]
    fn test_frame_size_limit() {
        let limits = Limits::new(1024, 4096, 8, 1024);
        let validator = FrameValidator::new(Role::Client, &limits);
        assert!(validator.validate(&header(OpCode::Binary, true, false, 1024)).is_ok());
        assert!(matches!(
            validator.validate(&header(OpCode::Binary, true, false, 1025)),
            Err(Error::MessageTooLarge {
                size: 1025,
                max: 1024
            })
        ));
    }
}
