//! Server configuration.

use std::net::IpAddr;
use std::time::Duration;

use crate::conn::TX_BUFFER_SIZE;
use crate::slab::MAX_CONNECTIONS;

/// Per-connection TCP socket tuning, applied at accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpTuning {
    /// Disable the Nagle algorithm.
    pub nodelay: bool,

    /// Reduce delayed-ack latency (Linux).
    pub quickack: bool,

    /// Enable TCP keepalive probing.
    pub keepalive: bool,

    /// Idle time before the first probe.
    pub keepalive_idle: Duration,

    /// Interval between probes.
    pub keepalive_interval: Duration,

    /// Probes before the connection is dropped.
    pub keepalive_count: u32,
}

impl Default for TcpTuning {
    fn default() -> Self {
        Self {
            nodelay: false,
            quickack: false,
            keepalive: false,
            keepalive_idle: Duration::from_secs(60),
            keepalive_interval: Duration::from_secs(10),
            keepalive_count: 5,
        }
    }
}

/// Engine options.
///
/// `Default` carries the documented defaults; [`ServerConfig::new`] only
/// fills in the listen port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Listen port. `0` lets the kernel pick (useful in tests).
    pub port: u16,

    /// Bind address; unspecified binds all interfaces.
    pub bind_addr: Option<IpAddr>,

    /// Admission threshold and overload divisor; clamped to the
    /// compile-time capacity [`MAX_CONNECTIONS`].
    pub max_connections: usize,

    /// Upper bound on each reactor blocking wait.
    pub poll_timeout_ms: i32,

    /// Drain the transmit buffer with a gathered (vectored) write
    /// instead of a single-span copy-and-write.
    pub gathered_write: bool,

    /// Accept-time socket tuning.
    pub tcp: TcpTuning,

    /// Upper bound on time spent in the handshaking state.
    pub handshake_deadline: Duration,

    /// Upper bound on time spent in the closing state.
    pub close_deadline: Duration,

    /// Transmit occupancy that trips `on_backpressure`.
    pub high_watermark: usize,

    /// Transmit occupancy that releases into `on_drain`.
    pub low_watermark: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            bind_addr: None,
            max_connections: 50,
            poll_timeout_ms: 1000,
            gathered_write: true,
            tcp: TcpTuning::default(),
            handshake_deadline: Duration::from_secs(5),
            close_deadline: Duration::from_secs(5),
            high_watermark: TX_BUFFER_SIZE * 3 / 4,
            low_watermark: TX_BUFFER_SIZE / 4,
        }
    }
}

impl ServerConfig {
    /// Defaults on the given port.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Clamp out-of-range values; called once at server construction.
    pub(crate) fn normalize(&mut self) {
        self.max_connections = self.max_connections.clamp(1, MAX_CONNECTIONS);
        self.high_watermark = self.high_watermark.min(TX_BUFFER_SIZE);
        if self.low_watermark >= self.high_watermark {
            // restore the default 1:3 hysteresis gap
            self.low_watermark = self.high_watermark / 3;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::new(8080);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.max_connections, 50);
        assert_eq!(cfg.high_watermark, 6144);
        assert_eq!(cfg.low_watermark, 2048);
        assert_eq!(cfg.handshake_deadline, Duration::from_secs(5));
        assert_eq!(cfg.close_deadline, Duration::from_secs(5));
        assert!(cfg.gathered_write);
    }

    #[test]
    fn normalize_clamps() {
        let mut cfg = ServerConfig::new(0);
        cfg.max_connections = 10_000;
        cfg.high_watermark = 1 << 20;
        cfg.low_watermark = 1 << 20;
        cfg.normalize();

        assert_eq!(cfg.max_connections, MAX_CONNECTIONS);
        assert_eq!(cfg.high_watermark, TX_BUFFER_SIZE);
        assert!(cfg.low_watermark < cfg.high_watermark);
    }
}
