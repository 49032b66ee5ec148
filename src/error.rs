#![allow(missing_docs)]
//! Errors.
//!
//! A single flat taxonomy shared by every engine operation. I/O and
//! protocol routines return `Result<_, Error>`; `std::io::Error` values
//! are logged and classified at the call site so a connection can keep
//! its most recent error as a plain value.

use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Not enough space in a ring buffer for an all-or-nothing push.
    BufferFull,

    /// A drain was requested on an empty transmit buffer.
    BufferEmpty,

    /// The http upgrade request could not be accepted.
    HandshakeFailed,

    /// A websocket frame could not be parsed, or exceeds the
    /// per-connection message ceiling.
    FrameParse,

    /// The peer closed the stream.
    ConnectionClosed,

    /// The operation is not legal in the connection's current state.
    InvalidState,

    /// The underlying socket reported a non-retriable error.
    SocketError,

    /// A handshake or close deadline expired.
    Timeout,

    /// The connection limit was reached at accept time.
    MaxConnections,

    /// Engine invariant violation.
    Internal,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use Error::*;
        match self {
            BufferFull => write!(f, "Buffer full"),
            BufferEmpty => write!(f, "Buffer empty"),
            HandshakeFailed => write!(f, "Handshake failed"),
            FrameParse => write!(f, "Frame parse error"),
            ConnectionClosed => write!(f, "Connection closed"),
            InvalidState => write!(f, "Invalid state for operation"),
            SocketError => write!(f, "Socket error"),
            Timeout => write!(f, "Deadline expired"),
            MaxConnections => write!(f, "Max connections exceeded"),
            Internal => write!(f, "Internal error"),
        }
    }
}

// use default impl
impl std::error::Error for Error {}
