//! TLS adapter interface.
//!
//! Optional layer between the socket and the ring buffers, compiled in
//! with the `tls` cargo feature. The engine defines only the interface;
//! a backend supplies the implementation and is handed the accepted
//! socket before any ring-buffer I/O happens. Without the feature the
//! sockets are used directly and nothing here exists.

use std::io;

/// Certificate material for a TLS backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    /// Server certificate chain, PEM.
    pub cert_path: String,

    /// Server private key, PEM.
    pub key_path: String,

    /// CA bundle for client authentication; empty disables it.
    pub ca_path: String,

    /// Demand a client certificate during the handshake.
    pub require_client_cert: bool,
}

/// Outcome of one non-blocking handshake step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// More socket readiness is needed; retry next iteration.
    WouldBlock,
    /// The session is established.
    Ready,
    /// The session cannot be established; close the connection.
    Fatal,
}

/// One TLS session over one connection.
///
/// All calls are non-blocking: a session that cannot make progress
/// reports `WouldBlock` (via [`Handshake::WouldBlock`] or an
/// `io::ErrorKind::WouldBlock` error) and is retried on the next
/// readiness event.
pub trait TlsAdapter {
    /// Drive the handshake one step.
    fn handshake(&mut self) -> Handshake;

    /// Read decrypted bytes into `buf`, returns the count.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write plaintext from `buf` for encryption, returns the count
    /// consumed.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Send the close-notify alert.
    fn close_notify(&mut self) -> io::Result<()>;
}
