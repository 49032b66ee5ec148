//! Connection: one socket, two ring buffers, a protocol state tag.
//!
//! Everything here is the per-connection half of the engine: buffer
//! I/O against the non-blocking socket, the handshake step, and frame
//! emission. Dispatch between states, callback firing and the frame
//! receive loop live in [`machine`](crate::machine), which drives these
//! methods.

use std::io::{IoSlice, IoSliceMut, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Instant;

use log::{debug, warn};

use crate::error::Error;
use crate::frame::{FrameHead, OpCode, MAX_HEAD_LEN};
use crate::handshake;
use crate::machine::ConnState;
use crate::ring::RingBuffer;
use crate::slab::ConnId;

/// Receive ring capacity; also the implicit per-message ceiling.
pub(crate) const RX_BUFFER_SIZE: usize = 4096;

/// Transmit ring capacity.
pub(crate) const TX_BUFFER_SIZE: usize = 8192;

/// Peek window for the handshake scan.
pub(crate) const HANDSHAKE_PEEK: usize = 1024;

/// Stack scratch for the frame receive loop.
pub(crate) const FRAME_SCRATCH: usize = 4096;

/// Copy chunk for the non-vectored write path.
pub(crate) const WRITE_CHUNK: usize = 512;

pub(crate) struct Connection {
    serial: u64,
    id: ConnId,
    sock: TcpStream,

    pub(crate) rx: RingBuffer<RX_BUFFER_SIZE>,
    pub(crate) tx: RingBuffer<TX_BUFFER_SIZE>,

    pub(crate) state: ConnState,
    pub(crate) opened: bool,

    pub(crate) created: Instant,
    pub(crate) entered_closing: Option<Instant>,
    pub(crate) last_activity: Instant,

    pub(crate) last_error: Option<Error>,
    pub(crate) write_paused: bool,
}

impl Connection {
    /// Wrap an accepted stream; the socket is non-blocking for the
    /// connection's entire life.
    pub(crate) fn new(sock: TcpStream, serial: u64) -> std::io::Result<Self> {
        sock.set_nonblocking(true)?;
        let now = Instant::now();
        Ok(Self {
            serial,
            id: ConnId::new(0, 0),
            sock,
            rx: RingBuffer::new(),
            tx: RingBuffer::new(),
            state: ConnState::Handshaking,
            opened: false,
            created: now,
            entered_closing: None,
            last_activity: now,
            last_error: None,
            write_paused: false,
        })
    }

    #[inline]
    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    #[inline]
    pub(crate) fn id(&self) -> ConnId {
        self.id
    }

    #[inline]
    pub(crate) fn set_id(&mut self, id: ConnId) {
        self.id = id;
    }

    #[inline]
    pub(crate) fn fd(&self) -> RawFd {
        self.sock.as_raw_fd()
    }

    #[inline]
    pub(crate) fn has_pending_tx(&self) -> bool {
        !self.tx.is_empty()
    }

    /// Half-close both directions; the fd itself lives until the slab
    /// releases the connection.
    pub(crate) fn shutdown(&mut self) {
        let _ = self.sock.shutdown(Shutdown::Both);
    }

    /// Gathered read into the receive ring.
    ///
    /// Returns the committed byte count; zero means would-block. A full
    /// ring is [`Error::BufferFull`], end of stream is
    /// [`Error::ConnectionClosed`], anything else non-retriable is
    /// [`Error::SocketError`].
    pub(crate) fn fill(&mut self) -> Result<usize, Error> {
        let n = {
            let (a, b) = self.rx.writable();
            if a.is_empty() && b.is_empty() {
                warn!("#{}: rx buffer full", self.serial);
                self.last_error = Some(Error::BufferFull);
                return Err(Error::BufferFull);
            }

            let mut bufs = [IoSliceMut::new(a), IoSliceMut::new(b)];
            match self.sock.read_vectored(&mut bufs) {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(0),
                Err(e) => {
                    debug!("#{}: read error: {}", self.serial, e);
                    self.last_error = Some(Error::SocketError);
                    return Err(Error::SocketError);
                }
            }
        };

        if n == 0 {
            self.last_error = Some(Error::ConnectionClosed);
            return Err(Error::ConnectionClosed);
        }

        self.rx.commit(n);
        self.last_activity = Instant::now();
        Ok(n)
    }

    /// Drain a prefix of the transmit ring to the socket; gathered
    /// (two-span vectored write) or single-span chunked, per
    /// configuration.
    ///
    /// Returns the transferred byte count; zero means would-block.
    pub(crate) fn flush(&mut self, gathered: bool) -> Result<usize, Error> {
        if self.tx.is_empty() {
            return Err(Error::BufferEmpty);
        }

        let n = if gathered {
            let (a, b) = self.tx.readable();
            let bufs = [IoSlice::new(a), IoSlice::new(b)];
            self.sock.write_vectored(&bufs)
        } else {
            let mut chunk = [0_u8; WRITE_CHUNK];
            let len = self.tx.peek(&mut chunk);
            self.sock.write(&chunk[..len])
        };

        let n = match n {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(0),
            Err(e) => {
                debug!("#{}: write error: {}", self.serial, e);
                self.last_error = Some(Error::SocketError);
                return Err(Error::SocketError);
            }
        };

        self.tx.advance(n);
        self.last_activity = Instant::now();
        Ok(n)
    }

    /// One handshake attempt over the buffered request bytes.
    ///
    /// `Ok(false)` means the terminator has not arrived; the receive
    /// ring is left intact. `Ok(true)` means the 101 response has been
    /// queued and the connection should enter the open state.
    pub(crate) fn handshake_step(&mut self) -> Result<bool, Error> {
        let mut scratch = [0_u8; HANDSHAKE_PEEK];
        let len = self.rx.peek(&mut scratch);
        if len == 0 {
            return Ok(false);
        }

        let upgrade = match handshake::parse_upgrade(&scratch[..len]) {
            Ok(Some(upgrade)) => upgrade,
            Ok(None) => return Ok(false),
            Err(e) => {
                debug!("#{}: {}", self.serial, e);
                self.last_error = Some(e);
                return Err(e);
            }
        };

        let mut response = [0_u8; handshake::RESPONSE_MAX];
        let n = handshake::encode_response(&upgrade.accept, &mut response)?;

        self.rx.advance(upgrade.consumed);

        if let Err(e) = self.tx.push(&response[..n]) {
            self.last_error = Some(e);
            return Err(e);
        }

        Ok(true)
    }

    /// Queue one outgoing frame: head encoded on the stack, head and
    /// payload pushed to the transmit ring. An overflow leaves whatever
    /// was pushed so far in place.
    pub(crate) fn write_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<(), Error> {
        let mut head = [0_u8; MAX_HEAD_LEN];
        let head_len = FrameHead::server(opcode, payload.len() as u64)
            .encode(&mut head)
            .map_err(|_| Error::Internal)?;

        if let Err(e) = self.tx.push(&head[..head_len]) {
            warn!("#{}: tx buffer overflow (head)", self.serial);
            self.last_error = Some(e);
            return Err(e);
        }
        if !payload.is_empty() {
            if let Err(e) = self.tx.push(payload) {
                warn!("#{}: tx buffer overflow (payload)", self.serial);
                self.last_error = Some(e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Queue a close frame carrying the status code as a 2-byte
    /// big-endian payload.
    pub(crate) fn write_close_frame(&mut self, code: u16) -> Result<(), Error> {
        self.write_frame(OpCode::Close, &code.to_be_bytes())
    }
}
