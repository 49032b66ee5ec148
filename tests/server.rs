//! Admission control, deadlines and handshake failure scenarios.

mod common;

use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use embws::{Server, ServerConfig};

use common::{masked_frame, read_frame, reads_eof, upgrade, wait_for};

#[test]
fn admission_overload_rejects_fifth_client() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut cfg = ServerConfig::new(0);
    cfg.max_connections = 4;
    cfg.poll_timeout_ms = 50;

    let mut server = Server::new(cfg).unwrap();
    server.on_message(|ops, id, msg, binary| {
        let _ = if binary {
            ops.send_binary(id, msg)
        } else {
            ops.send(id, msg)
        };
    });

    let stats = server.stats();
    let stop = server.stop_handle();
    let addr = server.local_addr().unwrap();
    let thread = thread::spawn(move || server.run());

    let mut clients: Vec<TcpStream> = (0..4).map(|_| upgrade(addr)).collect();
    assert!(wait_for(
        || stats.active_connections.load(Relaxed) == 4,
        Duration::from_secs(2)
    ));

    // the fifth connect is accepted and immediately dropped
    let mut fifth = TcpStream::connect(addr).unwrap();
    fifth
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    assert!(wait_for(
        || stats.rejected_connections.load(Relaxed) == 1,
        Duration::from_secs(2)
    ));
    assert!(reads_eof(&mut fifth));

    // the original four remain serviceable
    let frame = masked_frame(0x01, [1, 2, 3, 4], b"still here");
    clients[0].write_all(&frame).unwrap();
    let (opcode, payload) = read_frame(&mut clients[0]);
    assert_eq!(opcode, 0x01);
    assert_eq!(payload, b"still here");

    assert_eq!(stats.active_connections.load(Relaxed), 4);

    stop.stop();
    thread.join().unwrap();
}

#[test]
fn handshake_deadline_closes_silent_client() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut cfg = ServerConfig::new(0);
    cfg.poll_timeout_ms = 50;
    cfg.handshake_deadline = Duration::from_millis(300);

    let callbacks = Arc::new(AtomicUsize::new(0));
    let cb1 = callbacks.clone();
    let cb2 = callbacks.clone();
    let cb3 = callbacks.clone();

    let mut server = Server::new(cfg).unwrap();
    server.on_open(move |_ops, _id| {
        cb1.fetch_add(1, Relaxed);
    });
    server.on_message(move |_ops, _id, _msg, _binary| {
        cb2.fetch_add(1, Relaxed);
    });
    server.on_close(move |_ops, _id, _clean| {
        cb3.fetch_add(1, Relaxed);
    });

    let stats = server.stats();
    let stop = server.stop_handle();
    let addr = server.local_addr().unwrap();
    let thread = thread::spawn(move || server.run());

    // send a request line fragment and go silent
    let mut client = TcpStream::connect(addr).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    client.write_all(b"GET / HTTP").unwrap();

    assert!(wait_for(
        || stats.active_connections.load(Relaxed) == 1,
        Duration::from_secs(2)
    ));

    // closed no later than the deadline (plus reactor slack)
    assert!(wait_for(
        || stats.active_connections.load(Relaxed) == 0,
        Duration::from_secs(2)
    ));
    assert!(reads_eof(&mut client));

    // no application callbacks fired for the stillborn connection
    assert_eq!(callbacks.load(Relaxed), 0);

    stop.stop();
    thread.join().unwrap();
}

#[test]
fn malformed_request_line_fails_handshake() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut cfg = ServerConfig::new(0);
    cfg.poll_timeout_ms = 50;

    let mut server = Server::new(cfg).unwrap();
    server.on_message(|_ops, _id, _msg, _binary| {});

    let stats = server.stats();
    let stop = server.stop_handle();
    let addr = server.local_addr().unwrap();
    let thread = thread::spawn(move || server.run());

    let mut client = TcpStream::connect(addr).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    client
        .write_all(b"BREW /coffee HTCPCP/1.0\r\nSec-WebSocket-Key: x\r\n\r\n")
        .unwrap();

    assert!(wait_for(
        || stats.handshake_errors.load(Relaxed) == 1,
        Duration::from_secs(2)
    ));
    assert!(reads_eof(&mut client));

    stop.stop();
    thread.join().unwrap();
}

#[test]
fn oversized_frame_closes_connection() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut cfg = ServerConfig::new(0);
    cfg.poll_timeout_ms = 50;

    let mut server = Server::new(cfg).unwrap();
    server.on_message(|_ops, _id, _msg, _binary| {});

    let stats = server.stats();
    let stop = server.stop_handle();
    let addr = server.local_addr().unwrap();
    let thread = thread::spawn(move || server.run());

    let mut client = upgrade(addr);
    assert!(wait_for(
        || stats.active_connections.load(Relaxed) == 1,
        Duration::from_secs(2)
    ));

    // announce a payload far beyond the per-message ceiling
    let huge = vec![0_u8; 100];
    let mut frame = vec![0x82, 0x80 | 127];
    frame.extend_from_slice(&(1_u64 << 20).to_be_bytes());
    frame.extend_from_slice(&[0, 0, 0, 0]);
    frame.extend_from_slice(&huge);
    client.write_all(&frame).unwrap();

    assert!(wait_for(
        || stats.active_connections.load(Relaxed) == 0,
        Duration::from_secs(2)
    ));
    assert!(reads_eof(&mut client));

    stop.stop();
    thread.join().unwrap();
}

#[test]
fn stop_handle_ends_run() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut cfg = ServerConfig::new(0);
    cfg.poll_timeout_ms = 50;

    let mut server = Server::new(cfg).unwrap();
    let stop = server.stop_handle();
    let thread = thread::spawn(move || server.run());

    thread::sleep(Duration::from_millis(100));
    stop.stop();

    // run() returns at the next iteration boundary
    let joined = thread.join();
    assert!(joined.is_ok());
}

#[test]
fn poll_wait_statistics_update() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut cfg = ServerConfig::new(0);
    cfg.poll_timeout_ms = 20;

    let mut server = Server::new(cfg).unwrap();
    let stats = server.stats();
    let stop = server.stop_handle();
    let thread = thread::spawn(move || server.run());

    // idle iterations run into the poll timeout
    assert!(wait_for(
        || stats.max_poll_wait_us.load(Relaxed) >= 10_000,
        Duration::from_secs(2)
    ));

    stop.stop();
    thread.join().unwrap();
}
