// Copyright 2024 Mcbridge Contributors
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! End-to-end tests: a real proxy instance between a raw binary client
//! and a scripted mock of an ASCII upstream. Every byte crossing either
//! socket is asserted exactly.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::JoinHandle;
use std::time::Duration;

use mcbridge::{Config, Mcbridge};
use protocol_memcache::{Opcode, ResponseHeader, ResponseStatus};

const GET: u8 = 0x00;
const SET: u8 = 0x01;
const ADD: u8 = 0x02;
const DELETE: u8 = 0x04;
const INCREMENT: u8 = 0x05;
const GETQ: u8 = 0x09;
const GETK: u8 = 0x0c;
const SETQ: u8 = 0x11;

/// Launch a mock upstream that accepts one connection and walks a script
/// of (expected command bytes, reply bytes) exchanges, then drains until
/// the proxy lets go of the connection.
fn mock_upstream(script: Vec<(Vec<u8>, Vec<u8>)>) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind mock upstream");
    let addr = listener.local_addr().unwrap();

    let handle = std::thread::spawn(move || {
        let (mut sock, _) = listener.accept().expect("upstream accept failed");
        sock.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        for (expect, reply) in script {
            let mut buf = vec![0; expect.len()];
            sock.read_exact(&mut buf).expect("upstream read failed");
            assert_eq!(
                buf,
                expect,
                "upstream saw {:?}, expected {:?}",
                String::from_utf8_lossy(&buf),
                String::from_utf8_lossy(&expect)
            );
            sock.write_all(&reply).expect("upstream write failed");
        }

        let mut rest = Vec::new();
        let _ = sock.read_to_end(&mut rest);
        assert!(
            rest.is_empty(),
            "upstream saw trailing bytes: {:?}",
            String::from_utf8_lossy(&rest)
        );
    });

    (addr, handle)
}

fn proxy(upstream: SocketAddr) -> Mcbridge {
    proxy_with_timeout(upstream, Duration::from_secs(2))
}

fn proxy_with_timeout(upstream: SocketAddr, timeout: Duration) -> Mcbridge {
    let mut config = Config::default();
    config.set_listen("127.0.0.1:0".to_string());
    config.set_endpoints(vec![upstream.to_string()]);
    config.set_timeout(timeout);
    Mcbridge::new(config).expect("failed to launch proxy")
}

fn connect(proxy: &Mcbridge) -> TcpStream {
    let addr = proxy.local_addr().expect("proxy is not listening on tcp");
    let sock = TcpStream::connect(addr).expect("failed to connect to proxy");
    sock.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    sock.set_nodelay(true).unwrap();
    sock
}

fn request(opcode: u8, key: &[u8], extras: &[u8], value: &[u8]) -> Vec<u8> {
    let total = extras.len() + key.len() + value.len();

    let mut buf = Vec::with_capacity(24 + total);
    buf.push(0x80);
    buf.push(opcode);
    buf.extend_from_slice(&(key.len() as u16).to_be_bytes());
    buf.push(extras.len() as u8);
    buf.push(0); // data type
    buf.extend_from_slice(&[0, 0]); // reserved
    buf.extend_from_slice(&(total as u32).to_be_bytes());
    buf.extend_from_slice(&[0; 4]); // opaque
    buf.extend_from_slice(&[0; 8]); // cas
    buf.extend_from_slice(extras);
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    buf
}

fn storage_extras(flags: u32, expiry: u32) -> Vec<u8> {
    let mut extras = Vec::with_capacity(8);
    extras.extend_from_slice(&flags.to_be_bytes());
    extras.extend_from_slice(&expiry.to_be_bytes());
    extras
}

fn read_response(sock: &mut TcpStream) -> (ResponseHeader, Vec<u8>) {
    let mut hdr = [0u8; 24];
    sock.read_exact(&mut hdr).expect("failed to read response header");

    let (_, header) = ResponseHeader::parse(&hdr).expect("malformed response header");

    let mut body = vec![0; header.total_body_len as usize];
    sock.read_exact(&mut body).expect("failed to read response body");

    (header, body)
}

fn expect_eof(sock: &mut TcpStream) {
    let mut buf = [0u8; 1];
    match sock.read(&mut buf) {
        Ok(0) => {}
        Ok(n) => panic!("expected a closed connection, read {n} bytes"),
        Err(e) => panic!("expected a clean close: {e}"),
    }
}

#[test]
fn set_then_get_round_trip() {
    let (upstream, mock) = mock_upstream(vec![
        (
            b"set foo 0 0 3\r\nbar\r\n".to_vec(),
            b"STORED\r\n".to_vec(),
        ),
        (
            b"get foo\r\n".to_vec(),
            b"VALUE foo 7 3\r\nbar\r\nEND\r\n".to_vec(),
        ),
    ]);
    let proxy = proxy(upstream);
    let mut client = connect(&proxy);

    client
        .write_all(&request(SET, b"foo", &storage_extras(0, 0), b"bar"))
        .unwrap();
    let (header, body) = read_response(&mut client);
    assert_eq!(header.opcode, Opcode::Set);
    assert_eq!(header.status, ResponseStatus::NoError);
    assert_eq!(header.total_body_len, 0);
    assert_eq!(header.cas, 0);
    assert!(body.is_empty());

    client.write_all(&request(GET, b"foo", &[], &[])).unwrap();
    let (header, body) = read_response(&mut client);
    assert_eq!(header.opcode, Opcode::Get);
    assert_eq!(header.status, ResponseStatus::NoError);
    assert_eq!(header.extras_len, 4);
    assert_eq!(header.key_len, 0);
    assert_eq!(header.total_body_len, 7);
    assert_eq!(header.opaque, 0);
    assert_eq!(&body[..4], &[0, 0, 0, 7]);
    assert_eq!(&body[4..], b"bar");

    drop(client);
    proxy.shutdown();
    mock.join().unwrap();
}

#[test]
fn get_miss() {
    let (upstream, mock) =
        mock_upstream(vec![(b"get foo\r\n".to_vec(), b"END\r\n".to_vec())]);
    let proxy = proxy(upstream);
    let mut client = connect(&proxy);

    client.write_all(&request(GET, b"foo", &[], &[])).unwrap();
    let (header, body) = read_response(&mut client);
    assert_eq!(header.opcode, Opcode::Get);
    assert_eq!(header.status, ResponseStatus::KeyNotFound);
    assert_eq!(header.total_body_len, 0);
    assert!(body.is_empty());

    drop(client);
    proxy.shutdown();
    mock.join().unwrap();
}

#[test]
fn getk_echoes_the_key() {
    let (upstream, mock) = mock_upstream(vec![(
        b"get foo\r\n".to_vec(),
        b"VALUE foo 0 3\r\nbar\r\nEND\r\n".to_vec(),
    )]);
    let proxy = proxy(upstream);
    let mut client = connect(&proxy);

    client.write_all(&request(GETK, b"foo", &[], &[])).unwrap();
    let (header, body) = read_response(&mut client);
    assert_eq!(header.opcode, Opcode::Getk);
    assert_eq!(header.status, ResponseStatus::NoError);
    assert_eq!(header.extras_len, 4);
    assert_eq!(header.key_len, 3);
    assert_eq!(header.total_body_len, 10);
    assert_eq!(&body[..4], &[0, 0, 0, 0]);
    assert_eq!(&body[4..7], b"foo");
    assert_eq!(&body[7..], b"bar");

    drop(client);
    proxy.shutdown();
    mock.join().unwrap();
}

#[test]
fn add_uses_its_own_verb() {
    let (upstream, mock) = mock_upstream(vec![(
        b"add foo 0 60 3\r\nbar\r\n".to_vec(),
        b"NOT_STORED\r\n".to_vec(),
    )]);
    let proxy = proxy(upstream);
    let mut client = connect(&proxy);

    client
        .write_all(&request(ADD, b"foo", &storage_extras(0, 60), b"bar"))
        .unwrap();
    let (header, _) = read_response(&mut client);
    assert_eq!(header.opcode, Opcode::Add);
    assert_eq!(header.status, ResponseStatus::ItemNotStored);

    drop(client);
    proxy.shutdown();
    mock.join().unwrap();
}

#[test]
fn delete_hit_and_miss() {
    let (upstream, mock) = mock_upstream(vec![
        (b"delete foo\r\n".to_vec(), b"DELETED\r\n".to_vec()),
        (b"delete foo\r\n".to_vec(), b"NOT_FOUND\r\n".to_vec()),
    ]);
    let proxy = proxy(upstream);
    let mut client = connect(&proxy);

    client.write_all(&request(DELETE, b"foo", &[], &[])).unwrap();
    let (header, _) = read_response(&mut client);
    assert_eq!(header.opcode, Opcode::Delete);
    assert_eq!(header.status, ResponseStatus::NoError);
    assert_eq!(header.total_body_len, 0);

    client.write_all(&request(DELETE, b"foo", &[], &[])).unwrap();
    let (header, _) = read_response(&mut client);
    assert_eq!(header.status, ResponseStatus::KeyNotFound);

    drop(client);
    proxy.shutdown();
    mock.join().unwrap();
}

#[test]
fn error_lines_map_to_statuses() {
    let (upstream, mock) = mock_upstream(vec![
        (
            b"set foo 0 0 3\r\nbar\r\n".to_vec(),
            b"CLIENT_ERROR bad data chunk\r\n".to_vec(),
        ),
        (
            b"set foo 0 0 3\r\nbar\r\n".to_vec(),
            b"SERVER_ERROR out of memory\r\n".to_vec(),
        ),
        (
            b"set foo 0 0 3\r\nbar\r\n".to_vec(),
            b"ERROR\r\n".to_vec(),
        ),
    ]);
    let proxy = proxy(upstream);
    let mut client = connect(&proxy);

    let set = request(SET, b"foo", &storage_extras(0, 0), b"bar");

    for expected in [
        ResponseStatus::InvalidArguments,
        ResponseStatus::InternalError,
        ResponseStatus::UnknownCommand,
    ] {
        client.write_all(&set).unwrap();
        let (header, body) = read_response(&mut client);
        assert_eq!(header.status, expected);
        assert_eq!(header.total_body_len, 0);
        assert!(body.is_empty());
    }

    drop(client);
    proxy.shutdown();
    mock.join().unwrap();
}

#[test]
fn pipelined_requests_stay_ordered() {
    let (upstream, mock) = mock_upstream(vec![
        (b"get a\r\n".to_vec(), b"END\r\n".to_vec()),
        (b"get b\r\n".to_vec(), b"VALUE b 0 1\r\nB\r\nEND\r\n".to_vec()),
        (b"get c\r\n".to_vec(), b"END\r\n".to_vec()),
    ]);
    let proxy = proxy(upstream);
    let mut client = connect(&proxy);

    // all three requests in a single write
    let mut burst = Vec::new();
    burst.extend_from_slice(&request(GET, b"a", &[], &[]));
    burst.extend_from_slice(&request(GET, b"b", &[], &[]));
    burst.extend_from_slice(&request(GET, b"c", &[], &[]));
    client.write_all(&burst).unwrap();

    let (header, _) = read_response(&mut client);
    assert_eq!(header.status, ResponseStatus::KeyNotFound);

    let (header, body) = read_response(&mut client);
    assert_eq!(header.status, ResponseStatus::NoError);
    assert_eq!(&body[4..], b"B");

    let (header, _) = read_response(&mut client);
    assert_eq!(header.status, ResponseStatus::KeyNotFound);

    drop(client);
    proxy.shutdown();
    mock.join().unwrap();
}

#[test]
fn quiet_opcodes_still_get_replies() {
    let (upstream, mock) = mock_upstream(vec![
        (b"get foo\r\n".to_vec(), b"END\r\n".to_vec()),
        (
            b"set foo 0 0 3\r\nbar\r\n".to_vec(),
            b"STORED\r\n".to_vec(),
        ),
    ]);
    let proxy = proxy(upstream);
    let mut client = connect(&proxy);

    client.write_all(&request(GETQ, b"foo", &[], &[])).unwrap();
    let (header, _) = read_response(&mut client);
    assert_eq!(header.opcode, Opcode::Getq);
    assert_eq!(header.status, ResponseStatus::KeyNotFound);

    client
        .write_all(&request(SETQ, b"foo", &storage_extras(0, 0), b"bar"))
        .unwrap();
    let (header, _) = read_response(&mut client);
    assert_eq!(header.opcode, Opcode::Setq);
    assert_eq!(header.status, ResponseStatus::NoError);

    drop(client);
    proxy.shutdown();
    mock.join().unwrap();
}

#[test]
fn large_values_stream_through() {
    let value = vec![b'x'; 64 * 1024];

    let mut expect = b"set big 0 0 65536\r\n".to_vec();
    expect.extend_from_slice(&value);
    expect.extend_from_slice(b"\r\n");

    let mut reply = format!("VALUE big 0 {}\r\n", value.len()).into_bytes();
    reply.extend_from_slice(&value);
    reply.extend_from_slice(b"\r\nEND\r\n");

    let (upstream, mock) = mock_upstream(vec![
        (expect, b"STORED\r\n".to_vec()),
        (b"get big\r\n".to_vec(), reply),
    ]);
    let proxy = proxy(upstream);
    let mut client = connect(&proxy);

    client
        .write_all(&request(SET, b"big", &storage_extras(0, 0), &value))
        .unwrap();
    let (header, _) = read_response(&mut client);
    assert_eq!(header.status, ResponseStatus::NoError);

    client.write_all(&request(GET, b"big", &[], &[])).unwrap();
    let (header, body) = read_response(&mut client);
    assert_eq!(header.status, ResponseStatus::NoError);
    assert_eq!(header.total_body_len as usize, 4 + value.len());
    assert_eq!(&body[4..], &value[..]);

    drop(client);
    proxy.shutdown();
    mock.join().unwrap();
}

#[test]
fn oversized_body_closes_connection_without_forwarding() {
    // an upstream that must see no bytes at all
    let (upstream, mock) = mock_upstream(vec![]);
    let proxy = proxy(upstream);
    let mut client = connect(&proxy);

    // header claims a value one byte past the limit; the body is never
    // sent and must never be needed
    let value_len: u32 = 1024 * 1024 + 1;
    let total = 8 + 3 + value_len;
    let mut hdr = vec![0x80, SET, 0x00, 0x03, 0x08, 0x00, 0x00, 0x00];
    hdr.extend_from_slice(&total.to_be_bytes());
    hdr.extend_from_slice(&[0; 12]);
    client.write_all(&hdr).unwrap();

    expect_eof(&mut client);

    proxy.shutdown();
    mock.join().unwrap();
}

#[test]
fn unsupported_opcode_closes_connection() {
    let (upstream, mock) = mock_upstream(vec![]);
    let proxy = proxy(upstream);
    let mut client = connect(&proxy);

    client
        .write_all(&request(INCREMENT, b"counter", &[], &[]))
        .unwrap();

    expect_eof(&mut client);

    proxy.shutdown();
    mock.join().unwrap();
}

#[test]
fn bad_magic_closes_connection() {
    let (upstream, mock) = mock_upstream(vec![]);
    let proxy = proxy(upstream);
    let mut client = connect(&proxy);

    let mut req = request(GET, b"foo", &[], &[]);
    req[0] = 0x55;
    client.write_all(&req).unwrap();

    expect_eof(&mut client);

    proxy.shutdown();
    mock.join().unwrap();
}

#[test]
fn upstream_connection_is_reused_across_clients() {
    // one upstream connection serves two client connections in turn; if
    // the proxy dialed again the second exchange would never arrive
    let (upstream, mock) = mock_upstream(vec![
        (b"get foo\r\n".to_vec(), b"END\r\n".to_vec()),
        (b"get bar\r\n".to_vec(), b"END\r\n".to_vec()),
    ]);
    let proxy = proxy(upstream);

    let mut first = connect(&proxy);
    first.write_all(&request(GET, b"foo", &[], &[])).unwrap();
    let (header, _) = read_response(&mut first);
    assert_eq!(header.status, ResponseStatus::KeyNotFound);
    drop(first);

    // allow the bridge to wind down and release the connection
    std::thread::sleep(Duration::from_millis(300));

    let mut second = connect(&proxy);
    second.write_all(&request(GET, b"bar", &[], &[])).unwrap();
    let (header, _) = read_response(&mut second);
    assert_eq!(header.status, ResponseStatus::KeyNotFound);
    drop(second);

    proxy.shutdown();
    mock.join().unwrap();
}

#[test]
fn malformed_reply_closes_connection() {
    let (upstream, mock) =
        mock_upstream(vec![(b"get foo\r\n".to_vec(), b"BOGUS\r\n".to_vec())]);
    let proxy = proxy(upstream);
    let mut client = connect(&proxy);

    client.write_all(&request(GET, b"foo", &[], &[])).unwrap();

    expect_eof(&mut client);

    proxy.shutdown();
    mock.join().unwrap();
}

#[test]
fn upstream_timeout_closes_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let upstream = listener.local_addr().unwrap();

    let mock = std::thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();
        let mut buf = vec![0; b"get foo\r\n".len()];
        sock.read_exact(&mut buf).unwrap();
        // never reply; the proxy's deadline has to fire
        std::thread::sleep(Duration::from_secs(1));
    });

    let proxy = proxy_with_timeout(upstream, Duration::from_millis(200));
    let mut client = connect(&proxy);

    client.write_all(&request(GET, b"foo", &[], &[])).unwrap();

    expect_eof(&mut client);

    proxy.shutdown();
    mock.join().unwrap();
}
