//! Websocket data frame.
//!
//! [RFC-6455 Section5](https://datatracker.ietf.org/doc/html/rfc6455#section-5)
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! :                     Payload Data continued ...                :
//! + - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - +
//! |                     Payload Data continued ...                |
//! +---------------------------------------------------------------+
//! ```
//!
//! The payload length is kept as a plain `u64`; the 7-bit, 7+16-bit and
//! 7+64-bit wire encodings exist only inside [`FrameHead::encode`] and
//! [`FrameHead::decode`], which pick the shortest form that fits.

pub mod flag;
pub mod mask;

pub use flag::{Fin, OpCode};
pub use mask::Mask;

use crate::error::Error;

/// Largest possible frame head: 2 + 8 (extended length) + 4 (mask key).
pub const MAX_HEAD_LEN: usize = 14;

/// Payload lengths up to this fit in the length flag byte itself.
const SHORT_LEN_MAX: u64 = 125;

/// Flag byte value announcing a 16-bit extended length.
const LEN_16: u8 = 126;

/// Flag byte value announcing a 64-bit extended length.
const LEN_64: u8 = 127;

/// Websocket frame head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHead {
    pub fin: Fin,
    pub opcode: OpCode,
    pub mask: Mask,
    pub length: u64,
}

impl FrameHead {
    /// Constructor.
    #[inline]
    pub const fn new(fin: Fin, opcode: OpCode, mask: Mask, length: u64) -> Self {
        Self {
            fin,
            opcode,
            mask,
            length,
        }
    }

    /// Head for an outgoing server frame: always final, never masked.
    #[inline]
    pub const fn server(opcode: OpCode, payload_len: u64) -> Self {
        Self::new(Fin::Y, opcode, Mask::None, payload_len)
    }

    /// Encode to the provided buffer, returns the count of written bytes.
    /// The caller should ensure the buffer holds at least
    /// [`MAX_HEAD_LEN`] bytes, otherwise [`Error::BufferFull`] may be
    /// returned.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.len() < self.encoded_len() {
            return Err(Error::BufferFull);
        }

        buf[0] = self.fin as u8 | self.opcode as u8;

        let mut n = 2;
        if self.length <= SHORT_LEN_MAX {
            buf[1] = self.length as u8;
        } else if self.length <= u16::MAX as u64 {
            buf[1] = LEN_16;
            buf[2..4].copy_from_slice(&(self.length as u16).to_be_bytes());
            n = 4;
        } else {
            buf[1] = LEN_64;
            buf[2..10].copy_from_slice(&self.length.to_be_bytes());
            n = 10;
        }
        buf[1] |= self.mask.to_flag();

        if let Mask::Key(key) = self.mask {
            buf[n..n + 4].copy_from_slice(&key);
            n += 4;
        }

        Ok(n)
    }

    /// Number of bytes [`encode`](Self::encode) will write.
    #[inline]
    pub const fn encoded_len(&self) -> usize {
        let base = if self.length <= SHORT_LEN_MAX {
            2
        } else if self.length <= u16::MAX as u64 {
            4
        } else {
            10
        };
        match self.mask {
            Mask::Key(_) => base + 4,
            Mask::None => base,
        }
    }

    /// Parse from the provided buffer, returns [`FrameHead`] and the
    /// count of consumed bytes.
    ///
    /// `Ok(None)` means the view is too short to hold a complete head
    /// (shorter than 2, 4, 10 or head + 4 bytes, as appropriate); the
    /// caller should wait for more data. The payload is never copied.
    pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>, Error> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let fin = Fin::from_flag(buf[0]);
        let opcode = OpCode::from_flag(buf[0])?;
        let masked = Mask::flag_set(buf[1]);

        let (length, mut n) = match buf[1] & 0x7f {
            LEN_16 => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                (u16::from_be_bytes([buf[2], buf[3]]) as u64, 4_usize)
            }
            LEN_64 => {
                if buf.len() < 10 {
                    return Ok(None);
                }
                let mut wide = [0_u8; 8];
                wide.copy_from_slice(&buf[2..10]);
                (u64::from_be_bytes(wide), 10)
            }
            short => (short as u64, 2),
        };

        let mask = if masked {
            if buf.len() < n + 4 {
                return Ok(None);
            }
            let mut key = [0_u8; 4];
            key.copy_from_slice(&buf[n..n + 4]);
            n += 4;
            Mask::Key(key)
        } else {
            Mask::None
        };

        Ok(Some((
            FrameHead {
                fin,
                opcode,
                mask,
                length,
            },
            n,
        )))
    }
}
