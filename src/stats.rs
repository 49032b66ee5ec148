//! Server statistics.
//!
//! Monotone counters with relaxed atomicity. The engine itself is
//! single-threaded; the atomics exist only so that an external
//! monitoring thread can read a shared snapshot while the reactor runs.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared counter block, usually behind an `Arc`.
#[derive(Debug, Default)]
pub struct ServerStats {
    // connection counters
    pub total_connections: AtomicU64,
    pub active_connections: AtomicU64,
    pub rejected_connections: AtomicU64,

    // throughput counters
    pub messages_in: AtomicU64,
    pub messages_out: AtomicU64,
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,

    // error counters
    pub handshake_errors: AtomicU64,
    pub socket_errors: AtomicU64,
    pub buffer_overflows: AtomicU64,

    // poll latency, microseconds
    pub last_poll_wait_us: AtomicU64,
    pub max_poll_wait_us: AtomicU64,
}

impl ServerStats {
    pub const fn new() -> Self {
        Self {
            total_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            rejected_connections: AtomicU64::new(0),
            messages_in: AtomicU64::new(0),
            messages_out: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            handshake_errors: AtomicU64::new(0),
            socket_errors: AtomicU64::new(0),
            buffer_overflows: AtomicU64::new(0),
            last_poll_wait_us: AtomicU64::new(0),
            max_poll_wait_us: AtomicU64::new(0),
        }
    }

    /// Bump a counter.
    #[inline]
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Record one poll wait, maintaining last and max.
    pub(crate) fn record_poll_wait(&self, us: u64) {
        self.last_poll_wait_us.store(us, Ordering::Relaxed);
        if us > self.max_poll_wait_us.load(Ordering::Relaxed) {
            self.max_poll_wait_us.store(us, Ordering::Relaxed);
        }
    }

    /// Load-shedding predicate: active above 90% of the configured
    /// limit.
    pub fn overloaded(&self, limit: usize) -> bool {
        let active = self.active_connections.load(Ordering::Relaxed);
        active > (limit as u64) * 9 / 10
    }

    /// Zero every counter.
    pub fn reset(&self) {
        self.total_connections.store(0, Ordering::Relaxed);
        self.active_connections.store(0, Ordering::Relaxed);
        self.rejected_connections.store(0, Ordering::Relaxed);
        self.messages_in.store(0, Ordering::Relaxed);
        self.messages_out.store(0, Ordering::Relaxed);
        self.bytes_in.store(0, Ordering::Relaxed);
        self.bytes_out.store(0, Ordering::Relaxed);
        self.handshake_errors.store(0, Ordering::Relaxed);
        self.socket_errors.store(0, Ordering::Relaxed);
        self.buffer_overflows.store(0, Ordering::Relaxed);
        self.last_poll_wait_us.store(0, Ordering::Relaxed);
        self.max_poll_wait_us.store(0, Ordering::Relaxed);
    }
}
