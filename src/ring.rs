//! Fixed-capacity circular byte buffer.
//!
//! Storage, both indices and the occupancy counter live inline; nothing
//! is allocated after construction. Besides the copying `push` / `peek` /
//! `advance` surface, the buffer exposes its readable and writable
//! regions as at most two contiguous spans so that socket I/O can go
//! through `readv`/`writev`-style vectored calls without an intermediate
//! copy: a vectored read into [`writable`](RingBuffer::writable) followed
//! by [`commit`](RingBuffer::commit) logically appends, a vectored write
//! from [`readable`](RingBuffer::readable) followed by
//! [`advance`](RingBuffer::advance) logically removes.

use crate::error::Error;

/// Circular byte buffer of compile-time capacity `N`.
#[derive(Debug)]
pub struct RingBuffer<const N: usize> {
    buf: [u8; N],
    rd: usize,
    wr: usize,
    count: usize,
}

impl<const N: usize> RingBuffer<N> {
    /// Constructor, empty.
    #[inline]
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            rd: 0,
            wr: 0,
            count: 0,
        }
    }

    /// Total capacity.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Bytes currently stored.
    #[inline]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// Free space.
    #[inline]
    pub const fn available(&self) -> usize {
        N - self.count
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Append all of `data`, or nothing: fails with
    /// [`Error::BufferFull`] when free space is short.
    pub fn push(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.available() < data.len() {
            return Err(Error::BufferFull);
        }

        let head = (N - self.wr).min(data.len());
        self.buf[self.wr..self.wr + head].copy_from_slice(&data[..head]);
        self.buf[..data.len() - head].copy_from_slice(&data[head..]);

        self.wr = (self.wr + data.len()) % N;
        self.count += data.len();
        Ok(())
    }

    /// Copy out up to `out.len()` bytes without consuming them, returns
    /// the copied count.
    pub fn peek(&self, out: &mut [u8]) -> usize {
        let len = out.len().min(self.count);
        let head = (N - self.rd).min(len);
        out[..head].copy_from_slice(&self.buf[self.rd..self.rd + head]);
        out[head..len].copy_from_slice(&self.buf[..len - head]);
        len
    }

    /// Discard a prefix, clamped to the occupancy.
    pub fn advance(&mut self, len: usize) {
        let len = len.min(self.count);
        self.rd = (self.rd + len) % N;
        self.count -= len;
    }

    /// Drop everything.
    #[inline]
    pub fn clear(&mut self) {
        self.rd = 0;
        self.wr = 0;
        self.count = 0;
    }

    /// Readable region as at most two spans whose lengths sum to exactly
    /// [`len`](Self::len). The second span is empty unless the data
    /// wraps.
    pub fn readable(&self) -> (&[u8], &[u8]) {
        let head = (N - self.rd).min(self.count);
        (
            &self.buf[self.rd..self.rd + head],
            &self.buf[..self.count - head],
        )
    }

    /// Writable region as at most two spans whose lengths sum to exactly
    /// [`available`](Self::available). Never aliases the readable
    /// region.
    pub fn writable(&mut self) -> (&mut [u8], &mut [u8]) {
        let avail = N - self.count;
        let head = (N - self.wr).min(avail);
        let tail = avail - head;
        let (left, right) = self.buf.split_at_mut(self.wr);
        (&mut right[..head], &mut left[..tail])
    }

    /// Advance the write index after a vectored read filled the
    /// [`writable`](Self::writable) spans in order.
    pub fn commit(&mut self, len: usize) {
        debug_assert!(len <= self.available());
        self.wr = (self.wr + len) % N;
        self.count += len;
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}
