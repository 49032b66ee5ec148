//! Reactor.
//!
//! One thread, one `poll(2)` loop. Each iteration rebuilds the
//! descriptor set (listener first, then every active connection),
//! blocks once, accepts under admission control, services ready
//! connections read-then-write, sweeps the two deadlines, and compacts
//! the connection list. The poll syscall is the engine's only
//! suspension point; everything downstream of it runs to completion on
//! non-blocking sockets.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};
use socket2::{Domain, Protocol, Socket, Type};

use crate::callback::{self, Callbacks, Ops};
use crate::config::ServerConfig;
use crate::conn::Connection;
use crate::error::Error;
use crate::machine::{self, ConnState};
use crate::slab::{ConnId, ConnSlab, MAX_CONNECTIONS};
use crate::stats::ServerStats;

/// Listener backlog.
const LISTEN_BACKLOG: i32 = 128;

/// Engine state shared by the reactor and the state machine: the
/// connection slab, the statistics block and the configuration. Kept
/// apart from the callback set so that a running callback can borrow
/// the whole core.
pub(crate) struct Core {
    pub(crate) slab: ConnSlab,
    pub(crate) stats: Arc<ServerStats>,
    pub(crate) cfg: ServerConfig,
    next_serial: u64,
}

impl Core {
    pub(crate) fn new(cfg: ServerConfig) -> Self {
        Self {
            slab: ConnSlab::new(MAX_CONNECTIONS),
            stats: Arc::new(ServerStats::new()),
            cfg,
            next_serial: 1,
        }
    }
}

/// Cloneable switch that makes [`Server::run`] return at the next
/// iteration boundary.
#[derive(Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The websocket server engine.
pub struct Server {
    listener: TcpListener,
    core: Core,
    hooks: Callbacks,
    running: Arc<AtomicBool>,
}

impl Server {
    /// Bind the listener and prepare the engine. Bind or listen
    /// failures escape here; a running reactor never faults.
    pub fn new(mut cfg: ServerConfig) -> io::Result<Self> {
        cfg.normalize();

        let ip = cfg
            .bind_addr
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let addr = SocketAddr::new(ip, cfg.port);

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;

        let listener: TcpListener = socket.into();
        listener.set_nonblocking(true)?;

        info!("listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            core: Core::new(cfg),
            hooks: Callbacks::default(),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Bound address, useful when the configured port was `0`.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared statistics block; safe to read from other threads.
    pub fn stats(&self) -> Arc<ServerStats> {
        self.core.stats.clone()
    }

    /// Active connection count.
    pub fn connection_count(&self) -> usize {
        self.core.slab.len()
    }

    /// Switch for stopping the reactor from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.running.clone())
    }

    /// Request the reactor to exit at the next iteration boundary.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    // --- callback slots ---

    pub fn on_open(&mut self, f: impl FnMut(&mut Ops, ConnId) + Send + 'static) {
        self.hooks.open = Some(Box::new(f));
    }

    pub fn on_message(&mut self, f: impl FnMut(&mut Ops, ConnId, &[u8], bool) + Send + 'static) {
        self.hooks.message = Some(Box::new(f));
    }

    pub fn on_close(&mut self, f: impl FnMut(&mut Ops, ConnId, bool) + Send + 'static) {
        self.hooks.close = Some(Box::new(f));
    }

    pub fn on_error(&mut self, f: impl FnMut(&mut Ops, ConnId, Error) + Send + 'static) {
        self.hooks.error = Some(Box::new(f));
    }

    pub fn on_backpressure(&mut self, f: impl FnMut(&mut Ops, ConnId) + Send + 'static) {
        self.hooks.backpressure = Some(Box::new(f));
    }

    pub fn on_drain(&mut self, f: impl FnMut(&mut Ops, ConnId) + Send + 'static) {
        self.hooks.drain = Some(Box::new(f));
    }

    /// Run the reactor until [`stop`](Self::stop) is called. Blocking.
    pub fn run(&mut self) {
        self.running.store(true, Ordering::Release);
        info!("server starting");

        let mut fds: Vec<libc::pollfd> = Vec::with_capacity(MAX_CONNECTIONS + 1);

        while self.running.load(Ordering::Acquire) {
            fds.clear();
            fds.push(libc::pollfd {
                fd: self.listener.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            });
            for &slot in self.core.slab.active() {
                let Some(conn) = self.core.slab.slot_ref(slot) else {
                    continue;
                };
                let mut events = libc::POLLIN;
                if conn.has_pending_tx() {
                    events |= libc::POLLOUT;
                }
                fds.push(libc::pollfd {
                    fd: conn.fd(),
                    events,
                    revents: 0,
                });
            }

            let poll_start = Instant::now();
            let ret = unsafe {
                libc::poll(
                    fds.as_mut_ptr(),
                    fds.len() as libc::nfds_t,
                    self.core.cfg.poll_timeout_ms,
                )
            };
            let waited = poll_start.elapsed();
            self.core.stats.record_poll_wait(waited.as_micros() as u64);

            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!("poll failed: {}", err);
                break;
            }

            if ret > 0 {
                if fds[0].revents & libc::POLLIN != 0 {
                    self.accept_ready();
                }

                // the active list only grows (by accepts) during this
                // pass, so positions map 1:1 onto the polled entries
                for i in 1..fds.len() {
                    if i - 1 >= self.core.slab.len() {
                        break;
                    }
                    let revents = fds[i].revents;
                    if revents == 0 {
                        continue;
                    }
                    let slot = self.core.slab.active()[i - 1];
                    self.service(slot, revents);
                }
            }

            self.sweep_deadlines();

            let removed = self
                .core
                .slab
                .compact(|conn| conn.state == ConnState::Closed);
            if removed > 0 {
                self.core
                    .stats
                    .active_connections
                    .fetch_sub(removed as u64, Ordering::Relaxed);
            }
        }

        info!("server stopped");
    }

    /// Listener readiness: shed load above the overload mark, otherwise
    /// try to admit.
    fn accept_ready(&mut self) {
        if self.core.stats.overloaded(self.core.cfg.max_connections) {
            ServerStats::add(&self.core.stats.rejected_connections, 1);
            // accept and drop to drain the kernel backlog
            if let Ok((sock, peer)) = self.listener.accept() {
                debug!("rejecting {}: overloaded", peer);
                drop(sock);
            }
            return;
        }
        self.accept_connection();
    }

    fn accept_connection(&mut self) {
        if self.core.slab.len() >= self.core.cfg.max_connections {
            warn!("max connections reached");
            ServerStats::add(&self.core.stats.rejected_connections, 1);
            return;
        }

        let (sock, peer) = match self.listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) => {
                error!("accept error: {}", e);
                ServerStats::add(&self.core.stats.socket_errors, 1);
                return;
            }
        };

        if let Err(e) = self.apply_tcp_tuning(&sock) {
            warn!("tcp tuning on {}: {}", peer, e);
        }

        let serial = self.core.next_serial;
        let conn = match Connection::new(sock, serial) {
            Ok(conn) => conn,
            Err(e) => {
                error!("socket setup for {}: {}", peer, e);
                ServerStats::add(&self.core.stats.socket_errors, 1);
                return;
            }
        };
        self.core.next_serial += 1;

        if self.core.slab.insert(conn).is_none() {
            ServerStats::add(&self.core.stats.rejected_connections, 1);
            return;
        }

        ServerStats::add(&self.core.stats.total_connections, 1);
        ServerStats::add(&self.core.stats.active_connections, 1);
        debug!("accepted {} as #{}", peer, serial);
    }

    fn apply_tcp_tuning(&self, sock: &TcpStream) -> io::Result<()> {
        let tuning = &self.core.cfg.tcp;
        let sock = socket2::SockRef::from(sock);

        if tuning.nodelay {
            sock.set_nodelay(true)?;
        }

        #[cfg(target_os = "linux")]
        if tuning.quickack {
            sock.set_quickack(true)?;
        }

        if tuning.keepalive {
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(tuning.keepalive_idle)
                .with_interval(tuning.keepalive_interval)
                .with_retries(tuning.keepalive_count);
            sock.set_tcp_keepalive(&keepalive)?;
        }

        Ok(())
    }

    /// Read then write, as flagged by poll; any classified error closes
    /// the connection.
    fn service(&mut self, slot: usize, revents: libc::c_short) {
        let core = &mut self.core;
        let hooks = &mut self.hooks;

        if revents & libc::POLLIN != 0 {
            if let Err(e) = machine::service_read(core, hooks, slot) {
                Self::fail(core, hooks, slot, e);
            }
        }

        if Self::state_of(core, slot) == Some(ConnState::Closed) {
            return;
        }

        if revents & libc::POLLOUT != 0 {
            if let Err(e) = machine::service_write(core, hooks, slot) {
                Self::fail(core, hooks, slot, e);
            }
        }

        if revents & (libc::POLLERR | libc::POLLHUP) != 0 {
            machine::transition(core, hooks, slot, ConnState::Closed, false);
        }
    }

    fn state_of(core: &Core, slot: usize) -> Option<ConnState> {
        core.slab.slot_ref(slot).map(|conn| conn.state)
    }

    /// Record, count and report a classified error, then close.
    fn fail(core: &mut Core, hooks: &mut Callbacks, slot: usize, err: Error) {
        let id = {
            let Some(conn) = core.slab.slot_mut(slot) else {
                return;
            };
            conn.last_error = Some(err);
            conn.id()
        };

        match err {
            Error::SocketError => ServerStats::add(&core.stats.socket_errors, 1),
            Error::HandshakeFailed => ServerStats::add(&core.stats.handshake_errors, 1),
            Error::BufferFull => ServerStats::add(&core.stats.buffer_overflows, 1),
            _ => {}
        }

        callback::fire_error(core, hooks, id, err);
        machine::transition(core, hooks, slot, ConnState::Closed, false);
    }

    /// Time out connections stuck in handshaking or closing. Runs every
    /// iteration, poll timeouts included.
    fn sweep_deadlines(&mut self) {
        let now = Instant::now();
        let handshake_deadline = self.core.cfg.handshake_deadline;
        let close_deadline = self.core.cfg.close_deadline;

        for i in 0..self.core.slab.len() {
            let slot = self.core.slab.active()[i];
            let expired = {
                let Some(conn) = self.core.slab.slot_ref(slot) else {
                    continue;
                };
                match conn.state {
                    ConnState::Handshaking => {
                        now.duration_since(conn.created) > handshake_deadline
                    }
                    ConnState::Closing => conn
                        .entered_closing
                        .map_or(false, |since| now.duration_since(since) > close_deadline),
                    _ => false,
                }
            };

            if expired {
                if let Some(conn) = self.core.slab.slot_mut(slot) {
                    debug!("#{}: deadline expired while {:?}", conn.serial(), conn.state);
                    conn.last_error = Some(Error::Timeout);
                }
                machine::transition(
                    &mut self.core,
                    &mut self.hooks,
                    slot,
                    ConnState::Closed,
                    false,
                );
            }
        }
    }
}
