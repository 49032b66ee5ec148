//! Shared loopback test harness: a raw tcp client speaking just enough
//! websocket to exercise the server, plus an eventually-style waiter.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

pub const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
pub const SAMPLE_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

/// Connect and complete the upgrade handshake, asserting the accept
/// key on the way.
pub fn upgrade(addr: SocketAddr) -> TcpStream {
    let mut sock = TcpStream::connect(addr).unwrap();
    sock.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let request = format!(
        "GET /chat HTTP/1.1\r\n\
         Host: localhost\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {SAMPLE_KEY}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    );
    sock.write_all(request.as_bytes()).unwrap();

    let response = read_http_head(&mut sock);
    assert!(
        response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"),
        "unexpected response: {response}"
    );
    assert!(response.contains(&format!("Sec-WebSocket-Accept: {SAMPLE_ACCEPT}\r\n")));

    sock
}

/// Read until the blank line ending the response head.
pub fn read_http_head(sock: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0_u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        sock.read_exact(&mut byte).unwrap();
        head.push(byte[0]);
        assert!(head.len() < 4096, "response head too large");
    }
    String::from_utf8(head).unwrap()
}

/// Build a masked client frame.
pub fn masked_frame(opcode: u8, key: [u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0x80 | opcode];
    match payload.len() {
        len if len < 126 => frame.push(0x80 | len as u8),
        len if len < 65536 => {
            frame.push(0x80 | 126);
            frame.extend_from_slice(&(len as u16).to_be_bytes());
        }
        len => {
            frame.push(0x80 | 127);
            frame.extend_from_slice(&(len as u64).to_be_bytes());
        }
    }
    frame.extend_from_slice(&key);
    frame.extend(
        payload
            .iter()
            .enumerate()
            .map(|(i, byte)| byte ^ key[i & 3]),
    );
    frame
}

/// Read one unmasked server frame, returns `(opcode, payload)`.
pub fn read_frame(sock: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut head = [0_u8; 2];
    sock.read_exact(&mut head).unwrap();
    assert_eq!(head[1] & 0x80, 0, "server frames are never masked");

    let len = match head[1] & 0x7f {
        126 => {
            let mut ext = [0_u8; 2];
            sock.read_exact(&mut ext).unwrap();
            u16::from_be_bytes(ext) as usize
        }
        127 => {
            let mut ext = [0_u8; 8];
            sock.read_exact(&mut ext).unwrap();
            u64::from_be_bytes(ext) as usize
        }
        len => len as usize,
    };

    let mut payload = vec![0_u8; len];
    sock.read_exact(&mut payload).unwrap();
    (head[0] & 0x0f, payload)
}

/// Poll a predicate until it holds or the timeout passes.
pub fn wait_for(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    predicate()
}

/// True once the peer has closed the stream (read returns 0 or a
/// reset).
pub fn reads_eof(sock: &mut TcpStream) -> bool {
    let mut buf = [0_u8; 64];
    loop {
        match sock.read(&mut buf) {
            Ok(0) => return true,
            Ok(_) => continue,
            Err(_) => return true,
        }
    }
}
