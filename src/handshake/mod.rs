//! Websocket handshake.
//!
//! From [RFC-6455 Section 4.2](https://datatracker.ietf.org/doc/html/rfc6455#section-4.2):
//! the server must parse at least part of the client's opening handshake
//! to generate its own part, and reply with a valid HTTP response:
//!
//! ```text
//! HTTP/1.1 101 Switching Protocols
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! ```
//!
//! The request scan here is deliberately minimal: it locates the header
//! terminator, checks the request line method, and extracts the
//! `Sec-WebSocket-Key` value. Nothing else is validated; a peer with
//! otherwise malformed headers still gets upgraded.

pub mod key;

pub use key::derive_accept_key;

use crate::error::Error;

/// 258EAFA5-E914-47DA-95CA-C5AB0DC85B11
pub const GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// HTTP/1.1 101 Switching Protocols
pub const STATUS_LINE: &[u8] = b"HTTP/1.1 101 Switching Protocols\r\n";

/// Response buffer size; the full 101 response is ~130 bytes.
pub const RESPONSE_MAX: usize = 256;

/// CRLF CRLF
const TERMINATOR: &[u8] = b"\r\n\r\n";

/// Only structural check on the request line.
const METHOD: &[u8] = b"GET ";

/// Canonical and all-lowercase key header spellings, with the
/// single-space separator most clients emit.
const KEY_HEADER: &[u8] = b"Sec-WebSocket-Key: ";
const KEY_HEADER_LOWER: &[u8] = b"sec-websocket-key: ";

/// A successfully parsed upgrade request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upgrade {
    /// Bytes of the receive buffer covered by the request, terminator
    /// included.
    pub consumed: usize,

    /// Derived `sec-websocket-accept` value.
    pub accept: [u8; 28],
}

/// Naive subslice search; request heads are small.
#[inline]
fn find(hay: &[u8], needle: &[u8]) -> Option<usize> {
    hay.windows(needle.len()).position(|w| w == needle)
}

/// Scan an upgrade request out of a peeked view.
///
/// `Ok(None)` means the header terminator has not arrived yet and the
/// buffer must be left intact. Everything else either upgrades or fails
/// with [`Error::HandshakeFailed`].
pub fn parse_upgrade(buf: &[u8]) -> Result<Option<Upgrade>, Error> {
    let Some(end) = find(buf, TERMINATOR) else {
        return Ok(None);
    };
    let consumed = end + TERMINATOR.len();
    let head = &buf[..consumed];

    if !head.starts_with(METHOD) {
        return Err(Error::HandshakeFailed);
    }

    let key_pos = match find(head, KEY_HEADER) {
        Some(pos) => pos,
        None => find(head, KEY_HEADER_LOWER).ok_or(Error::HandshakeFailed)?,
    };

    let value_start = key_pos + KEY_HEADER.len();
    let rest = &head[value_start..];
    let value_end = find(rest, b"\r\n").ok_or(Error::HandshakeFailed)?;

    let mut sec_key = &rest[..value_end];
    while let [trimmed @ .., b' ' | b'\t'] = sec_key {
        sec_key = trimmed;
    }

    if sec_key.is_empty() {
        return Err(Error::HandshakeFailed);
    }

    Ok(Some(Upgrade {
        consumed,
        accept: derive_accept_key(sec_key),
    }))
}

/// Format the 101 response into a caller buffer, returns the written
/// length. Overflow is a handshake failure.
pub fn encode_response(accept: &[u8; 28], buf: &mut [u8]) -> Result<usize, Error> {
    use std::io::{Cursor, Write};

    fn write_parts(cursor: &mut Cursor<&mut [u8]>, accept: &[u8; 28]) -> std::io::Result<()> {
        cursor.write_all(STATUS_LINE)?;
        cursor.write_all(b"Upgrade: websocket\r\n")?;
        cursor.write_all(b"Connection: Upgrade\r\n")?;
        cursor.write_all(b"Sec-WebSocket-Accept: ")?;
        cursor.write_all(accept)?;
        cursor.write_all(b"\r\n\r\n")
    }

    let mut cursor = Cursor::new(buf);
    match write_parts(&mut cursor, accept) {
        Ok(()) => Ok(cursor.position() as usize),
        Err(_) => Err(Error::HandshakeFailed),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const REQUEST: &[u8] = b"GET /chat HTTP/1.1\r\n\
        Host: server.example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\
        \r\n";

    #[test]
    fn upgrade_complete() {
        let upgrade = parse_upgrade(REQUEST).unwrap().unwrap();
        assert_eq!(upgrade.consumed, REQUEST.len());
        assert_eq!(&upgrade.accept, b"s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn upgrade_partial() {
        for cut in [0, 1, 4, REQUEST.len() - 1] {
            assert_eq!(parse_upgrade(&REQUEST[..cut]).unwrap(), None);
        }
    }

    #[test]
    fn upgrade_trailing_bytes() {
        // an eager client may pipeline a frame behind the request
        let mut buf = REQUEST.to_vec();
        buf.extend_from_slice(&[0x89, 0x80, 1, 2, 3, 4]);
        let upgrade = parse_upgrade(&buf).unwrap().unwrap();
        assert_eq!(upgrade.consumed, REQUEST.len());
    }

    #[test]
    fn upgrade_lowercase_key() {
        let req = b"GET / HTTP/1.1\r\n\
            sec-websocket-key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            \r\n";
        let upgrade = parse_upgrade(req).unwrap().unwrap();
        assert_eq!(&upgrade.accept, b"s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn upgrade_trailing_whitespace() {
        let req = b"GET / HTTP/1.1\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ== \t\r\n\
            \r\n";
        let upgrade = parse_upgrade(req).unwrap().unwrap();
        assert_eq!(&upgrade.accept, b"s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn upgrade_rejects() {
        // not a GET
        let req = b"POST / HTTP/1.1\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            \r\n";
        assert_eq!(parse_upgrade(req), Err(Error::HandshakeFailed));

        // key header missing
        let req = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        assert_eq!(parse_upgrade(req), Err(Error::HandshakeFailed));

        // key value empty after trim
        let req = b"GET / HTTP/1.1\r\nSec-WebSocket-Key:   \r\n\r\n";
        assert_eq!(parse_upgrade(req), Err(Error::HandshakeFailed));
    }

    #[test]
    fn response_format() {
        let accept = *b"s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";
        let mut buf = [0_u8; RESPONSE_MAX];
        let n = encode_response(&accept, &mut buf).unwrap();

        let expect = b"HTTP/1.1 101 Switching Protocols\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\
            \r\n";
        assert_eq!(&buf[..n], &expect[..]);
    }

    #[test]
    fn response_overflow() {
        let accept = *b"s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";
        let mut buf = [0_u8; 64];
        assert_eq!(
            encode_response(&accept, &mut buf),
            Err(Error::HandshakeFailed)
        );
    }
}
