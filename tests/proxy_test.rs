//! End-to-end tests driving a real reactor over loopback sockets

mod common;

use common::socks5_mock::*;
use common::*;
use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpListener};
use std::thread;
use std::time::Duration;

const SUCCEEDED: u8 = 0x00;
const HOST_UNREACHABLE: u8 = 0x04;
const COMMAND_NOT_SUPPORTED: u8 = 0x07;
const ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

fn echo_roundtrip(stream: &mut std::net::TcpStream, payload: &[u8]) {
    stream.write_all(payload).unwrap();
    assert_eq!(read_exact(stream, payload.len()), payload.to_vec());
}

#[test]
fn test_greeting_no_auth() {
    let proxy = TestProxy::start(TestConfigBuilder::new().build());
    let mut client = proxy.connect();

    client.write_all(&create_auth_request_no_auth()).unwrap();
    assert_eq!(read_exact(&mut client, 2), vec![0x05, 0x00]);
}

#[test]
fn test_greeting_split_across_writes() {
    let proxy = TestProxy::start(TestConfigBuilder::new().build());
    let mut client = proxy.connect();

    client.write_all(&[0x05]).unwrap();
    thread::sleep(Duration::from_millis(50));
    client.write_all(&[0x02, 0x02]).unwrap();
    thread::sleep(Duration::from_millis(50));
    client.write_all(&[0x00]).unwrap();

    assert_eq!(read_exact(&mut client, 2), vec![0x05, 0x00]);
}

#[test]
fn test_greeting_without_no_auth_rejected() {
    let proxy = TestProxy::start(TestConfigBuilder::new().build());
    let mut client = proxy.connect();

    client.write_all(&create_auth_request_password()).unwrap();
    assert_eq!(read_exact(&mut client, 2), vec![0x05, 0xFF]);
    assert_closed(&mut client);
}

#[test]
fn test_bind_command_not_supported() {
    let proxy = TestProxy::start(TestConfigBuilder::new().build());
    let mut client = proxy.connect_greeted();

    let mut request = create_connect_ipv4([127, 0, 0, 1], 80);
    request[1] = 0x02;
    client.write_all(&request).unwrap();

    let reply = read_exact(&mut client, 10);
    assert_eq!(reply[0], 0x05);
    assert_eq!(reply[1], COMMAND_NOT_SUPPORTED);
    assert_closed(&mut client);
}

#[test]
fn test_ipv6_address_not_supported() {
    let proxy = TestProxy::start(TestConfigBuilder::new().build());
    let mut client = proxy.connect_greeted();

    let mut request = vec![0x05, 0x01, 0x00, 0x04];
    request.extend_from_slice(&Ipv4Addr::LOCALHOST.to_ipv6_mapped().octets());
    request.extend_from_slice(&80u16.to_be_bytes());
    client.write_all(&request).unwrap();

    let reply = read_exact(&mut client, 10);
    assert_eq!(reply[1], ADDRESS_TYPE_NOT_SUPPORTED);
    assert_closed(&mut client);
}

#[test]
fn test_connect_ipv4_and_relay() {
    let echo = EchoServer::start();
    let proxy = TestProxy::start(TestConfigBuilder::new().build());
    let mut client = proxy.connect_greeted();

    client
        .write_all(&create_connect_ipv4([127, 0, 0, 1], echo.port()))
        .unwrap();
    assert_eq!(
        read_exact(&mut client, 10),
        expected_reply(SUCCEEDED, [127, 0, 0, 1], echo.port())
    );

    echo_roundtrip(&mut client, b"hello through the proxy");
    echo_roundtrip(&mut client, b"and once more");
}

#[test]
fn test_request_pipelined_with_greeting_rejected() {
    let proxy = TestProxy::start(TestConfigBuilder::new().build());
    let mut client = proxy.connect();

    // A greeting must arrive alone; trailing bytes make it over-long
    let mut bytes = create_auth_request_no_auth();
    bytes.extend(create_connect_ipv4([127, 0, 0, 1], 80));
    client.write_all(&bytes).unwrap();

    assert_eq!(read_exact(&mut client, 2), vec![0x05, 0xFF]);
    assert_closed(&mut client);
}

#[test]
fn test_connect_refused_host_unreachable() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let proxy = TestProxy::start(TestConfigBuilder::new().build());
    let mut client = proxy.connect_greeted();

    client
        .write_all(&create_connect_ipv4([127, 0, 0, 1], port))
        .unwrap();
    assert_eq!(
        read_exact(&mut client, 10),
        expected_reply(HOST_UNREACHABLE, [127, 0, 0, 1], port)
    );
    assert_closed(&mut client);
}

#[test]
fn test_connect_domain_resolved() {
    let echo = EchoServer::start();
    let dns = FakeDns::start(&[("echo.test", Ipv4Addr::LOCALHOST)]);
    let proxy = TestProxy::start(TestConfigBuilder::new().dns_server(dns.addr()).build());
    let mut client = proxy.connect_greeted();

    client
        .write_all(&create_connect_domain("Echo.Test", echo.port()))
        .unwrap();
    assert_eq!(
        read_exact(&mut client, 10),
        expected_reply(SUCCEEDED, [127, 0, 0, 1], echo.port())
    );
    assert_eq!(dns.queries(), 1);

    echo_roundtrip(&mut client, b"resolved");
}

#[test]
fn test_unknown_domain_fails_without_retry() {
    let dns = FakeDns::start(&[]);
    let proxy = TestProxy::start(TestConfigBuilder::new().dns_server(dns.addr()).build());
    let mut client = proxy.connect_greeted();

    client
        .write_all(&create_connect_domain("nowhere.test", 443))
        .unwrap();
    assert_eq!(
        read_exact(&mut client, 10),
        expected_reply(HOST_UNREACHABLE, [0, 0, 0, 0], 443)
    );
    assert_closed(&mut client);
    assert_eq!(dns.queries(), 1);
}

#[test]
fn test_dns_retry_then_success() {
    let echo = EchoServer::start();
    let dns = FakeDns::start_dropping(&[("slow.test", Ipv4Addr::LOCALHOST)], 2);
    let proxy = TestProxy::start(
        TestConfigBuilder::new()
            .dns_server(dns.addr())
            .retry_interval_ms(100)
            .max_attempts(3)
            .build(),
    );
    let mut client = proxy.connect_greeted();

    client
        .write_all(&create_connect_domain("slow.test", echo.port()))
        .unwrap();
    assert_eq!(
        read_exact(&mut client, 10),
        expected_reply(SUCCEEDED, [127, 0, 0, 1], echo.port())
    );
    assert_eq!(dns.queries(), 3);

    echo_roundtrip(&mut client, b"third time lucky");
}

#[test]
fn test_dns_retry_exhausted() {
    let dns = FakeDns::start_dropping(&[("lost.test", Ipv4Addr::LOCALHOST)], usize::MAX);
    let proxy = TestProxy::start(
        TestConfigBuilder::new()
            .dns_server(dns.addr())
            .retry_interval_ms(100)
            .max_attempts(3)
            .build(),
    );
    let mut client = proxy.connect_greeted();

    client
        .write_all(&create_connect_domain("lost.test", 8080))
        .unwrap();
    assert_eq!(
        read_exact(&mut client, 10),
        expected_reply(HOST_UNREACHABLE, [0, 0, 0, 0], 8080)
    );
    assert_closed(&mut client);

    // No further attempts after the limit
    thread::sleep(Duration::from_millis(300));
    assert_eq!(dns.queries(), 3);
}

#[test]
fn test_client_gone_while_resolving() {
    let echo = EchoServer::start();
    let dns = FakeDns::start_dropping(&[("late.test", Ipv4Addr::LOCALHOST)], 1);
    let proxy = TestProxy::start(
        TestConfigBuilder::new()
            .dns_server(dns.addr())
            .retry_interval_ms(200)
            .build(),
    );

    {
        let mut client = proxy.connect_greeted();
        client
            .write_all(&create_connect_domain("late.test", echo.port()))
            .unwrap();
    }
    thread::sleep(Duration::from_millis(50));

    // The proxy keeps serving
    let mut client = proxy.connect_greeted();
    client
        .write_all(&create_connect_ipv4([127, 0, 0, 1], echo.port()))
        .unwrap();
    assert_eq!(read_exact(&mut client, 10)[1], SUCCEEDED);
    echo_roundtrip(&mut client, b"still alive");
}

#[test]
fn test_upstream_close_flushes_then_closes() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.write_all(b"goodbye").unwrap();
    });

    let proxy = TestProxy::start(TestConfigBuilder::new().build());
    let mut client = proxy.connect_greeted();
    client
        .write_all(&create_connect_ipv4([127, 0, 0, 1], port))
        .unwrap();
    assert_eq!(read_exact(&mut client, 10)[1], SUCCEEDED);

    assert_eq!(read_exact(&mut client, 7), b"goodbye".to_vec());
    assert_closed(&mut client);
}

#[test]
fn test_large_transfer_with_slow_reader() {
    const TOTAL: usize = 1 << 20;

    let echo = EchoServer::start();
    let proxy = TestProxy::start(TestConfigBuilder::new().buffer_size(512).build());
    let mut client = proxy.connect_greeted();
    client
        .write_all(&create_connect_ipv4([127, 0, 0, 1], echo.port()))
        .unwrap();
    assert_eq!(read_exact(&mut client, 10)[1], SUCCEEDED);

    let payload: Vec<u8> = (0..TOTAL).map(|i| (i * 31 % 251) as u8).collect();
    let mut writer = client.try_clone().unwrap();
    let sent = payload.clone();
    let writer = thread::spawn(move || {
        for chunk in sent.chunks(16 * 1024) {
            writer.write_all(chunk).unwrap();
        }
    });

    let mut received = Vec::with_capacity(TOTAL);
    let mut buf = [0u8; 4096];
    while received.len() < TOTAL {
        let n = client.read(&mut buf).unwrap();
        assert!(n > 0, "proxy closed after {} bytes", received.len());
        received.extend_from_slice(&buf[..n]);
        if received.len() < 64 * 1024 {
            thread::sleep(Duration::from_millis(1));
        }
    }

    writer.join().unwrap();
    assert_eq!(received.len(), TOTAL);
    assert!(received == payload, "relayed bytes differ");
}

#[test]
fn test_concurrent_clients() {
    let echo = EchoServer::start();
    let dns = FakeDns::start(&[("shared.test", Ipv4Addr::LOCALHOST)]);
    let proxy = TestProxy::start(TestConfigBuilder::new().dns_server(dns.addr()).build());
    let port = echo.port();

    let workers: Vec<_> = (0..16)
        .map(|i| {
            let mut client = proxy.connect_greeted();
            thread::spawn(move || {
                let request = if i % 2 == 0 {
                    create_connect_ipv4([127, 0, 0, 1], port)
                } else {
                    create_connect_domain("shared.test", port)
                };
                client.write_all(&request).unwrap();
                assert_eq!(read_exact(&mut client, 10)[1], SUCCEEDED);

                let message = format!("client {}", i);
                echo_roundtrip(&mut client, message.as_bytes());
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    assert!(dns.queries() >= 1);
}
