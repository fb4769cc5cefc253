//! Payload masking (RFC 6455 Section 5.3).

/// XOR `data` in place with `mask[i % 4]`.
///
/// Applying the same mask twice restores the original bytes.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    let mask_word = u32::from_ne_bytes(mask);
    let mut chunks = data.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let word = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ mask_word;
        chunk.copy_from_slice(&word.to_ne_bytes());
    }
    for (byte, key) in chunks.into_remainder().iter_mut().zip(mask) {
        *byte ^= key;
    }
}

/// Source of client masking keys.
///
/// Seeded from the operating system once, then advanced with a
/// multiplicative mix per frame so a busy writer does not make a syscall
/// for every frame.
#[derive(Debug)]
pub struct MaskGenerator {
    state: u32,
}

impl MaskGenerator {
    #[must_use]
    pub fn new() -> Self {
        let mut seed = [0u8; 4];
        if getrandom::getrandom(&mut seed).is_err() {
            // Fall back to the clock; masks only need to be unpredictable to
            // intermediaries, not cryptographically strong.
            let nanos = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.subsec_nanos())
                .unwrap_or(0);
            seed = nanos.to_le_bytes();
        }
        Self {
            state: u32::from_le_bytes(seed),
        }
    }

    /// Next 4-byte masking key.
    pub fn next_mask(&mut self) -> [u8; 4] {
        self.state = self.state.wrapping_add(0x9E37_79B9);
        let mut x = self.state;
        x = x.wrapping_mul(0x85EB_CA6B);
        x ^= x >> 13;
        x = x.wrapping_mul(0xC2B2_AE35);
        x ^= x >> 16;
        x.to_le_bytes()
    }
}

impl Default for MaskGenerator {
    fn default() -> Self {
        Self::new()
    }
}
