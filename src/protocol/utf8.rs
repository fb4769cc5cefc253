//! UTF-8 validation for text messages.
//!
//! Text messages may be split across frames at any byte, including inside a
//! multi-byte sequence, so the incremental validator carries up to three
//! bytes of an unfinished character from one fragment to the next.

use crate::error::{Error, Result};

/// Incremental validator for fragmented text messages.
#[derive(Debug, Clone, Default)]
pub struct Utf8Validator {
    pending: [u8; 4],
    pending_len: usize,
}

/// Width of the sequence started by a lead byte already accepted by
/// `std::str::from_utf8` as a valid prefix.
const fn sequence_width(lead: u8) -> usize {
    match lead {
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        _ => 4,
    }
}

fn invalid() -> Error {
    Error::InvalidPayload("text message is not valid UTF-8".into())
}

impl Utf8Validator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the next fragment of a text message.
    ///
    /// A trailing partial character is held back when `is_final` is false
    /// and must be completed by the next fragment.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPayload` on the first invalid sequence, or on a
    /// partial character left at the end of the final fragment.
    pub fn validate(&mut self, data: &[u8], is_final: bool) -> Result<()> {
        let mut rest = data;

        if self.pending_len > 0 {
            let width = sequence_width(self.pending[0]);
            let take = (width - self.pending_len).min(rest.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&rest[..take]);
            self.pending_len += take;
            rest = &rest[take..];

            match std::str::from_utf8(&self.pending[..self.pending_len]) {
                Ok(_) => self.pending_len = 0,
                Err(e) if e.error_len().is_none() => {
                    // still unfinished, so `rest` is empty
                    return if is_final { Err(invalid()) } else { Ok(()) };
                }
                Err(_) => return Err(invalid()),
            }
        }

        match std::str::from_utf8(rest) {
            Ok(_) => Ok(()),
            Err(e) if e.error_len().is_none() && !is_final => {
                let tail = &rest[e.valid_up_to()..];
                self.pending[..tail.len()].copy_from_slice(tail);
                self.pending_len = tail.len();
                Ok(())
            }
            Err(_) => Err(invalid()),
        }
    }

    /// Discard any held-back partial character.
    pub fn reset(&mut self) {
        self.pending_len = 0;
    }

    #[must_use]
    pub fn has_incomplete(&self) -> bool {
        self.pending_len > 0
    }
}

/// Validate a complete text payload.
///
/// # Errors
///
/// Returns `Error::InvalidPayload` if `data` is not valid UTF-8.
pub fn validate_utf8(data: &[u8]) -> Result<()> {
    std::str::from_utf8(data).map(|_| ()).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_utf8() {
        let mut validator = Utf8Validator::new();
        assert!(validator.validate(b"Hello, World!", true).is_ok());
        assert!(validator.validate("Hello 世界 🌍".as_bytes(), true).is_ok());
        assert!(validate_utf8("émoji 🎉".as_bytes()).is_ok());
    }

    #[test]
    fn test_invalid_utf8() {
        let mut validator = Utf8Validator::new();
        assert!(validator.validate(&[0x80], true).is_err());

        // overlong encoding
        validator.reset();
        assert!(validator.validate(&[0xc0, 0x80], true).is_err());

        validator.reset();
        assert!(validator.validate(&[0xff], false).is_err());

        assert!(matches!(
            validate_utf8(&[0x80, 0x81]),
            Err(Error::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_incomplete_sequence_carried_over() {
        // € = E2 82 AC
        let mut validator = Utf8Validator::new();
        assert!(validator.validate(&[0xe2], false).is_ok());
        assert!(validator.has_incomplete());
        assert!(validator.validate(&[0x82, 0xac], true).is_ok());
        assert!(!validator.has_incomplete());
    }

    #[test]
    fn test_incomplete_sequence_final_fails() {
        let mut validator = Utf8Validator::new();
        assert!(validator.validate(&[0xe2], true).is_err());

        let mut validator = Utf8Validator::new();
        assert!(validator.validate(&[0xf0, 0x9f], false).is_ok());
        assert!(validator.validate(&[0x8e], true).is_err());
    }

    #[test]
    fn test_multibyte_split_every_way() {
        // 🎉 = F0 9F 8E 89
        let bytes = [0xf0, 0x9f, 0x8e, 0x89];
        for first in 0..=4 {
            for second in first..=4 {
                let mut validator = Utf8Validator::new();
                assert!(validator.validate(&bytes[..first], false).is_ok());
                assert!(validator.validate(&bytes[first..second], false).is_ok());
                assert!(
                    validator.validate(&bytes[second..], true).is_ok(),
                    "split at {first}/{second}"
                );
            }
        }
    }

    #[test]
    fn test_invalid_continuation_after_split() {
        let mut validator = Utf8Validator::new();
        assert!(validator.validate(&[0xe2], false).is_ok());
        // 0x41 is not a continuation byte
        assert!(validator.validate(&[0x41, 0x42], false).is_err());
    }

    #[test]
    fn test_empty_fragment_preserves_pending() {
        let mut validator = Utf8Validator::new();
        assert!(validator.validate(&[0xe2], false).is_ok());
        assert!(validator.validate(&[], false).is_ok());
        assert!(validator.has_incomplete());
        assert!(validator.validate(&[0x82, 0xac], true).is_ok());
    }

    #[test]
    fn test_invalid_in_middle_of_fragment() {
        let mut validator = Utf8Validator::new();
        assert!(validator.validate(&[0x48, 0x65, 0x80, 0x6c, 0x6f], false).is_err());
    }

    #[test]
    fn test_validator_reset() {
        let mut validator = Utf8Validator::new();
        assert!(validator.validate(&[0xe2], false).is_ok());
        validator.reset();
        assert!(!validator.has_incomplete());
        assert!(validator.validate(b"Fresh start", true).is_ok());
    }
}
