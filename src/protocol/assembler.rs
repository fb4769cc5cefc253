//! Inbound message reassembly (RFC 6455 Section 5.4).
//!
//! At most one fragmented message is in flight per connection. Control
//! frames may arrive between fragments and are routed elsewhere by the
//! connection; any data frame other than a continuation while a message is
//! open is a protocol violation.

use bytes::BytesMut;

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::protocol::frame::{Frame, RsvBits};
use crate::protocol::opcode::OpCode;
use crate::protocol::utf8::Utf8Validator;

/// Outcome of feeding one frame to the assembler.
#[derive(Debug, PartialEq, Eq)]
pub enum Assembled {
    /// More fragments are needed.
    Pending,
    /// The frame completed a message.
    Complete(AssembledMessage),
}

/// A complete data message whose payload may still be transformed by
/// negotiated extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledMessage {
    /// `Text` or `Binary`.
    pub opcode: OpCode,
    /// Reserved bits of the first frame; these carry extension semantics.
    pub rsv: RsvBits,
    pub payload: Vec<u8>,
}

impl AssembledMessage {
    /// View the message as a single frame so extensions can decode it.
    #[must_use]
    pub fn into_frame(self) -> Frame {
        Frame::new(true, self.opcode, self.payload).with_rsv(self.rsv)
    }

    /// Finalize into an application message.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPayload` if a text payload is not valid UTF-8.
    pub fn into_message(self) -> Result<Message> {
        finalize(self.opcode, self.payload)
    }
}

/// Turn a complete data payload into a [`Message`].
///
/// # Errors
///
/// Returns `Error::InvalidPayload` if a text payload is not valid UTF-8.
pub fn finalize(opcode: OpCode, payload: Vec<u8>) -> Result<Message> {
    match opcode {
        OpCode::Text => String::from_utf8(payload)
            .map(Message::Text)
            .map_err(|_| Error::InvalidPayload("text message is not valid UTF-8".into())),
        OpCode::Binary => Ok(Message::Binary(payload)),
        other => Err(Error::protocol(format!("{other} frame is not a data message"))),
    }
}

/// Reassembles fragmented data messages.
#[derive(Debug)]
pub struct MessageAssembler {
    buffer: BytesMut,
    opcode: Option<OpCode>,
    rsv: RsvBits,
    fragment_count: usize,
    utf8: Option<Utf8Validator>,
    limits: Limits,
}

impl MessageAssembler {
    #[must_use]
    pub fn new(limits: Limits) -> Self {
        Self {
            buffer: BytesMut::new(),
            opcode: None,
            rsv: RsvBits::NONE,
            fragment_count: 0,
            utf8: None,
            limits,
        }
    }

    /// Feed a data frame.
    ///
    /// Text is validated fragment by fragment so invalid UTF-8 is caught
    /// before the rest of the message arrives. Messages whose first frame
    /// carries reserved bits are transformed by an extension first, so
    /// their validation is left to [`AssembledMessage::into_message`].
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` for a continuation with no open message,
    ///   a new data frame while one is open, reserved bits on a
    ///   continuation, too many fragments, or a control frame
    /// - `Error::MessageTooLarge` when the accumulated size exceeds the limit
    /// - `Error::InvalidPayload` for invalid UTF-8 in an uncompressed text message
    pub fn push(&mut self, frame: Frame) -> Result<Assembled> {
        if frame.opcode.is_control() {
            return Err(Error::protocol(format!(
                "{} frame routed to the message assembler",
                frame.opcode
            )));
        }

        match (frame.opcode, self.opcode) {
            (OpCode::Continuation, None) => {
                return Err(Error::protocol("continuation frame without a message in progress"));
            }
            (OpCode::Continuation, Some(_)) => {
                if !frame.rsv.is_empty() {
                    return Err(Error::protocol("reserved bits set on a continuation frame"));
                }
            }
            (opcode, Some(open)) => {
                return Err(Error::protocol(format!(
                    "{opcode} frame while a fragmented {open} message is in progress"
                )));
            }
            (opcode, None) => {
                self.opcode = Some(opcode);
                self.rsv = frame.rsv;
                if opcode == OpCode::Text && frame.rsv.is_empty() {
                    self.utf8 = Some(Utf8Validator::new());
                }
            }
        }

        self.fragment_count += 1;
        self.limits.check_fragment_count(self.fragment_count)?;
        self.limits
            .check_message_size(self.buffer.len() + frame.payload.len())?;

        if let Some(validator) = self.utf8.as_mut() {
            validator.validate(&frame.payload, frame.fin)?;
        }

        if frame.fin && self.buffer.is_empty() {
            // single-frame message: hand the payload over without copying
            let opcode = self.opcode.unwrap_or(frame.opcode);
            let rsv = self.rsv;
            self.reset();
            return Ok(Assembled::Complete(AssembledMessage {
                opcode,
                rsv,
                payload: frame.payload,
            }));
        }

        self.buffer.extend_from_slice(&frame.payload);

        if !frame.fin {
            return Ok(Assembled::Pending);
        }
        let Some(opcode) = self.opcode else {
            return Err(Error::protocol("message completed without a first frame"));
        };
        let message = AssembledMessage {
            opcode,
            rsv: self.rsv,
            payload: self.buffer.split().to_vec(),
        };
        self.reset();
        Ok(Assembled::Complete(message))
    }

    /// Whether a fragmented message is open.
    #[must_use]
    pub fn is_assembling(&self) -> bool {
        self.opcode.is_some()
    }

    /// Bytes buffered for the open message.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.opcode = None;
        self.rsv = RsvBits::NONE;
        self.fragment_count = 0;
        self.utf8 = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler() -> MessageAssembler {
        MessageAssembler::new(Limits::default())
    }

    fn complete(result: Result<Assembled>) -> AssembledMessage {
        match result.unwrap() {
            Assembled::Complete(message) => message,
            Assembled::Pending => panic!("expected a complete message"),
        }
    }

    #[test]
    fn test_single_frame_message() {
        let mut assembler = assembler();
        let message = complete(assembler.push(Frame::text("Hello")));
        assert_eq!(message.opcode, OpCode::Text);
        assert_eq!(message.into_message().unwrap(), Message::text("Hello"));
        assert!(!assembler.is_assembling());
    }

    #[test]
    fn test_fragmented_message() {
        let mut assembler = assembler();
        assert_eq!(
            assembler
                .push(Frame::new(false, OpCode::Binary, vec![1, 2]))
                .unwrap(),
            Assembled::Pending
        );
        assert!(assembler.is_assembling());
        assert_eq!(
            assembler.push(Frame::continuation(false, vec![3])).unwrap(),
            Assembled::Pending
        );
        assert_eq!(assembler.buffered(), 3);
        let message = complete(assembler.push(Frame::continuation(true, vec![4, 5])));
        assert_eq!(message.opcode, OpCode::Binary);
        assert_eq!(message.payload, vec![1, 2, 3, 4, 5]);
        assert!(!assembler.is_assembling());
    }

    #[test]
    fn test_empty_final_continuation() {
        let mut assembler = assembler();
        assembler
            .push(Frame::new(false, OpCode::Text, b"abc".to_vec()))
            .unwrap();
        let message = complete(assembler.push(Frame::continuation(true, Vec::new())));
        assert_eq!(message.into_message().unwrap(), Message::text("abc"));
    }

    #[test]
    fn test_continuation_without_start_fails() {
        let mut assembler = assembler();
        assert!(matches!(
            assembler.push(Frame::continuation(true, vec![1])),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_interleaved_data_frames_fail() {
        let mut assembler = assembler();
        assembler
            .push(Frame::new(false, OpCode::Text, b"part".to_vec()))
            .unwrap();
        let err = assembler
            .push(Frame::new(false, OpCode::Binary, vec![1]))
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
        assert_eq!(err.close_code(), Some(crate::message::CloseCode::ProtocolError));
    }

    #[test]
    fn test_control_frame_rejected() {
        let mut assembler = assembler();
        assert!(assembler.push(Frame::ping(vec![])).is_err());
    }

    #[test]
    fn test_max_message_size_exceeded() {
        let mut assembler = MessageAssembler::new(Limits::new(1024, 1024, 64, 1024));
        assembler
            .push(Frame::new(false, OpCode::Binary, vec![0; 1000]))
            .unwrap();
        assert!(matches!(
            assembler.push(Frame::continuation(true, vec![0; 25])),
            Err(Error::MessageTooLarge {
                size: 1025,
                max: 1024
            })
        ));
    }

    #[test]
    fn test_max_fragment_count_exceeded() {
        let mut assembler = MessageAssembler::new(Limits::new(1024, 1024, 2, 1024));
        assembler
            .push(Frame::new(false, OpCode::Binary, vec![1]))
            .unwrap();
        assembler.push(Frame::continuation(false, vec![2])).unwrap();
        assert!(matches!(
            assembler.push(Frame::continuation(true, vec![3])),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_invalid_utf8_fails_fast() {
        let mut assembler = assembler();
        assert!(matches!(
            assembler.push(Frame::new(false, OpCode::Text, vec![0xff, 0x41])),
            Err(Error::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_utf8_split_across_fragments() {
        let mut assembler = assembler();
        let bytes = "日本".as_bytes();
        assembler
            .push(Frame::new(false, OpCode::Text, bytes[..2].to_vec()))
            .unwrap();
        let message = complete(assembler.push(Frame::continuation(true, bytes[2..].to_vec())));
        assert_eq!(message.into_message().unwrap(), Message::text("日本"));
    }

    #[test]
    fn test_binary_skips_utf8_validation() {
        let mut assembler = assembler();
        let message = complete(assembler.push(Frame::binary(vec![0xff, 0xfe])));
        assert_eq!(message.into_message().unwrap(), Message::binary(vec![0xff, 0xfe]));
    }

    #[test]
    fn test_rsv_message_defers_utf8_validation() {
        let mut assembler = assembler();
        let frame = Frame::new(false, OpCode::Text, vec![0xff]).with_rsv(RsvBits::RSV1);
        assert_eq!(assembler.push(frame).unwrap(), Assembled::Pending);
        let message = complete(assembler.push(Frame::continuation(true, vec![0xfe])));
        assert_eq!(message.rsv, RsvBits::RSV1);
        assert!(matches!(
            message.into_message(),
            Err(Error::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_rsv_on_continuation_fails() {
        let mut assembler = assembler();
        assembler
            .push(Frame::new(false, OpCode::Binary, vec![1]))
            .unwrap();
        let frame = Frame::continuation(true, vec![2]).with_rsv(RsvBits::RSV1);
        assert!(matches!(
            assembler.push(frame),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_reset_discards_partial_message() {
        let mut assembler = assembler();
        assembler
            .push(Frame::new(false, OpCode::Text, b"abc".to_vec()))
            .unwrap();
        assembler.reset();
        assert!(!assembler.is_assembling());
        assert_eq!(assembler.buffered(), 0);
        complete(assembler.push(Frame::text("fresh")));
    }
}
