//! Embedded-class websocket server engine.
//!
//! A single-threaded [RFC-6455](https://datatracker.ietf.org/doc/html/rfc6455)
//! server built around a `poll(2)` reactor and a fixed-capacity set of
//! connections. Each connection owns two circular byte buffers with
//! scatter/gather views, so the hot path performs no heap allocation:
//! frames are parsed out of a stack scratch, headers are encoded into a
//! stack buffer, and socket I/O goes through vectored reads and writes
//! over the buffer spans.
//!
//! ```no_run
//! use embws::{Server, ServerConfig};
//!
//! let mut server = Server::new(ServerConfig::new(8080)).unwrap();
//! server.on_message(|ops, id, msg, binary| {
//!     let _ = if binary {
//!         ops.send_binary(id, msg)
//!     } else {
//!         ops.send(id, msg)
//!     };
//! });
//! server.run();
//! ```

pub mod config;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod ring;
pub mod stats;

mod callback;
mod conn;
mod machine;
mod server;
mod slab;

#[cfg(feature = "tls")]
pub mod tls;

pub use callback::Ops;
pub use config::{ServerConfig, TcpTuning};
pub use error::Error;
pub use machine::ConnState;
pub use server::{Server, StopHandle};
pub use slab::{ConnId, MAX_CONNECTIONS};
pub use stats::ServerStats;
