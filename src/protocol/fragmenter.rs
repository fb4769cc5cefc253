//! Outbound message fragmentation (RFC 6455 Section 5.4).

use crate::protocol::frame::{Frame, RsvBits};
use crate::protocol::opcode::OpCode;

/// Splits a message frame into frames of at most `fragment_size` payload
/// bytes.
///
/// The first frame keeps the message opcode and reserved bits; later frames
/// are continuations with clear reserved bits. Only the last frame has fin
/// set. A message that already fits is yielded unchanged.
#[derive(Debug)]
pub struct MessageFragmenter {
    whole: Option<Frame>,
    payload: Vec<u8>,
    opcode: OpCode,
    rsv: RsvBits,
    fragment_size: usize,
    offset: usize,
    started: bool,
}

impl MessageFragmenter {
    #[must_use]
    pub fn new(frame: Frame, fragment_size: usize) -> Self {
        let fragment_size = fragment_size.max(1);
        if frame.opcode.is_control() || frame.payload.len() <= fragment_size {
            return Self {
                opcode: frame.opcode,
                rsv: frame.rsv,
                whole: Some(frame),
                payload: Vec::new(),
                fragment_size,
                offset: 0,
                started: true,
            };
        }
        Self {
            opcode: frame.opcode,
            rsv: frame.rsv,
            whole: None,
            payload: frame.payload,
            fragment_size,
            offset: 0,
            started: false,
        }
    }

    /// Whether the message is split into more than one frame.
    #[must_use]
    pub fn needs_fragmentation(&self) -> bool {
        self.whole.is_none()
    }

    /// Payload bytes not yet yielded.
    #[must_use]
    pub fn remaining(&self) -> usize {
        match &self.whole {
            Some(frame) => frame.payload.len(),
            None => self.payload.len() - self.offset,
        }
    }
}

impl Iterator for MessageFragmenter {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if let Some(frame) = self.whole.take() {
            return Some(frame);
        }
        if self.offset >= self.payload.len() {
            return None;
        }

        let end = (self.offset + self.fragment_size).min(self.payload.len());
        let chunk = self.payload[self.offset..end].to_vec();
        self.offset = end;
        let fin = end == self.payload.len();

        let frame = if self.started {
            Frame::continuation(fin, chunk)
        } else {
            self.started = true;
            Frame::new(fin, self.opcode, chunk).with_rsv(self.rsv)
        };
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_fragmentation_needed() {
        let mut fragmenter = MessageFragmenter::new(Frame::binary(vec![1, 2, 3]), 10);
        assert!(!fragmenter.needs_fragmentation());
        assert_eq!(fragmenter.next(), Some(Frame::binary(vec![1, 2, 3])));
        assert_eq!(fragmenter.next(), None);
    }

    #[test]
    fn test_empty_payload_yields_one_frame() {
        let frames: Vec<_> = MessageFragmenter::new(Frame::text(""), 4).collect();
        assert_eq!(frames, vec![Frame::text("")]);
    }

    #[test]
    fn test_exact_fragmentation() {
        let frames: Vec<_> = MessageFragmenter::new(Frame::binary(vec![0u8; 12]), 4).collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].opcode, OpCode::Binary);
        assert!(!frames[0].fin);
        assert_eq!(frames[1].opcode, OpCode::Continuation);
        assert!(!frames[1].fin);
        assert_eq!(frames[2].opcode, OpCode::Continuation);
        assert!(frames[2].fin);
        assert!(frames.iter().all(|f| f.payload.len() == 4));
    }

    #[test]
    fn test_uneven_fragmentation() {
        let mut fragmenter = MessageFragmenter::new(Frame::text("Hello, World"), 5);
        assert!(fragmenter.needs_fragmentation());
        assert_eq!(fragmenter.remaining(), 12);
        let sizes: Vec<_> = fragmenter.by_ref().map(|f| f.payload.len()).collect();
        assert_eq!(sizes, vec![5, 5, 2]);
        assert_eq!(fragmenter.remaining(), 0);
    }

    #[test]
    fn test_rsv_only_on_first_frame() {
        let frame = Frame::binary(vec![7u8; 10]).with_rsv(RsvBits::RSV1);
        let frames: Vec<_> = MessageFragmenter::new(frame, 3).collect();
        assert_eq!(frames[0].rsv, RsvBits::RSV1);
        assert!(frames[1..].iter().all(|f| f.rsv.is_empty()));
    }

    #[test]
    fn test_control_frames_are_never_split() {
        let frames: Vec<_> = MessageFragmenter::new(Frame::ping(vec![0u8; 100]), 10).collect();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_zero_fragment_size_treated_as_one() {
        let frames: Vec<_> = MessageFragmenter::new(Frame::binary(vec![1, 2]), 0).collect();
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn test_text_split_at_byte_offsets() {
        let frames: Vec<_> = MessageFragmenter::new(Frame::text("é"), 1).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].opcode, OpCode::Text);
        assert_eq!(frames[0].payload, vec![0xC3]);
        assert_eq!(frames[1].opcode, OpCode::Continuation);
        assert_eq!(frames[1].payload, vec![0xA9]);
        assert!(frames[1].fin);
    }
}
