//! Mask flag and key.

/// Payload mask with a 32-bit key.
///
/// Client frames carry a key; the server never masks what it sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mask {
    Key([u8; 4]),
    None,
}

impl Mask {
    /// Read the flag which indicates whether mask is used.
    #[inline]
    pub const fn flag_set(b: u8) -> bool {
        b & 0x80 != 0
    }

    /// Get the flag byte.
    #[inline]
    pub const fn to_flag(&self) -> u8 {
        match self {
            Mask::Key(_) => 0x80,
            Mask::None => 0x00,
        }
    }
}

/// XOR the buffer against the key, one byte at a time.
#[inline]
pub fn apply_mask(key: [u8; 4], buf: &mut [u8]) {
    for (b, k) in buf.iter_mut().zip(key.iter().cycle()) {
        *b ^= k;
    }
}

/// XOR the buffer against the key, eight bytes at a time.
///
/// The key repeats every 4 bytes, so a doubled key XORed over whole
/// 8-byte chunks keeps the phase without any per-byte index math; the
/// sub-chunk tail falls back to the byte loop. Both variants start the
/// key at the first byte of `buf`, which is where a frame payload
/// always begins.
#[inline]
pub fn apply_mask_wide(key: [u8; 4], buf: &mut [u8]) {
    let wide = {
        let mut doubled = [0_u8; 8];
        doubled[..4].copy_from_slice(&key);
        doubled[4..].copy_from_slice(&key);
        u64::from_ne_bytes(doubled)
    };

    let mut chunks = buf.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let mut word = [0_u8; 8];
        word.copy_from_slice(chunk);
        chunk.copy_from_slice(&(u64::from_ne_bytes(word) ^ wide).to_ne_bytes());
    }

    apply_mask(key, chunks.into_remainder());
}
