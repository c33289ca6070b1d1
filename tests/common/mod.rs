//! Test utilities and mocks for nbsocks
//!
//! This module provides common test utilities used across integration tests:
//! a reactor running on a background thread, a scripted UDP DNS server and a
//! TCP echo upstream.

#![allow(dead_code)]

use hickory_proto::op::{Message, MessageType};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{RData, Record};
use nbsocks::{Config, Reactor, ShutdownHandle};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Read timeout applied to every test client socket
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Test configuration builder
pub struct TestConfigBuilder {
    dns_server: SocketAddr,
    buffer_size: usize,
    retry_interval_ms: u64,
    max_attempts: u32,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        TestConfigBuilder {
            // Discard port; nothing answers
            dns_server: "127.0.0.1:9".parse().unwrap(),
            buffer_size: 4096,
            retry_interval_ms: 100,
            max_attempts: 3,
        }
    }
}

impl TestConfigBuilder {
    /// Create a new test config builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the upstream DNS server
    pub fn dns_server(mut self, addr: SocketAddr) -> Self {
        self.dns_server = addr;
        self
    }

    /// Set the relay buffer size
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set the DNS retry interval
    pub fn retry_interval_ms(mut self, millis: u64) -> Self {
        self.retry_interval_ms = millis;
        self
    }

    /// Set the DNS attempt limit
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        let mut config = Config::default();
        config.server.listen_addr = "127.0.0.1:0".to_string();
        config.server.buffer_size = self.buffer_size;
        config.dns.server = Some(self.dns_server.to_string());
        config.dns.retry_interval_ms = self.retry_interval_ms;
        config.dns.max_attempts = self.max_attempts;
        config
    }
}

/// A reactor running on its own thread; stopped on drop
pub struct TestProxy {
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    worker: Option<JoinHandle<()>>,
}

impl TestProxy {
    /// Bind a reactor for `config` and run it in the background
    pub fn start(config: Config) -> Self {
        let mut reactor = Reactor::bind(&config).unwrap();
        let addr = reactor.local_addr();
        let shutdown = reactor.shutdown_handle();
        let worker = thread::spawn(move || reactor.run().unwrap());

        TestProxy {
            addr,
            shutdown,
            worker: Some(worker),
        }
    }

    /// Proxy listen address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Open a raw client connection to the proxy
    pub fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(self.addr).unwrap();
        stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
        stream.set_nodelay(true).unwrap();
        stream
    }

    /// Open a client connection and complete the no-auth greeting
    pub fn connect_greeted(&self) -> TcpStream {
        let mut stream = self.connect();
        stream
            .write_all(&socks5_mock::create_auth_request_no_auth())
            .unwrap();
        assert_eq!(read_exact(&mut stream, 2), vec![0x05, 0x00]);
        stream
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        let _ = self.shutdown.shutdown();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Read exactly `len` bytes or panic
pub fn read_exact(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).unwrap();
    buf
}

/// Assert that the peer has closed the connection
pub fn assert_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 1];
    match stream.read(&mut buf) {
        Ok(0) => {}
        Ok(n) => panic!("expected EOF, read {} bytes", n),
        Err(e) => assert_ne!(e.kind(), std::io::ErrorKind::WouldBlock, "connection still open"),
    }
}

/// TCP server echoing everything back on every accepted connection
pub struct EchoServer {
    addr: SocketAddr,
}

impl EchoServer {
    /// Start the server on an ephemeral loopback port
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                thread::spawn(move || {
                    let mut buf = [0u8; 8192];
                    loop {
                        match stream.read(&mut buf) {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if stream.write_all(&buf[..n]).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        });

        EchoServer { addr }
    }

    /// Listen address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Listen port
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

/// Scripted UDP name server
///
/// Answers A queries from a fixed table; names not in the table get a
/// response without answers. The first `drop_first` queries are ignored.
pub struct FakeDns {
    addr: SocketAddr,
    queries: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl FakeDns {
    /// Start a server answering every query
    pub fn start(records: &[(&str, Ipv4Addr)]) -> Self {
        Self::start_dropping(records, 0)
    }

    /// Start a server that ignores its first `drop_first` queries
    pub fn start_dropping(records: &[(&str, Ipv4Addr)], drop_first: usize) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        let addr = socket.local_addr().unwrap();

        let table: HashMap<String, Ipv4Addr> = records
            .iter()
            .map(|(name, addr)| (name.trim_end_matches('.').to_ascii_lowercase(), *addr))
            .collect();
        let table = Arc::new(Mutex::new(table));
        let queries = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let queries = queries.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut buf = [0u8; 512];
                while !stop.load(Ordering::SeqCst) {
                    let Ok((n, from)) = socket.recv_from(&mut buf) else {
                        continue;
                    };
                    let seen = queries.fetch_add(1, Ordering::SeqCst);
                    if seen < drop_first {
                        continue;
                    }
                    let Ok(query) = Message::from_vec(&buf[..n]) else {
                        continue;
                    };
                    let table = table.lock().unwrap();
                    let response = answer(&query, &table);
                    let _ = socket.send_to(&response, from);
                }
            })
        };

        FakeDns {
            addr,
            queries,
            stop,
            worker: Some(worker),
        }
    }

    /// Server address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of queries received so far
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl Drop for FakeDns {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn answer(query: &Message, table: &HashMap<String, Ipv4Addr>) -> Vec<u8> {
    let mut response = Message::new();
    response
        .set_id(query.id())
        .set_message_type(MessageType::Response);
    response.add_queries(query.queries().to_vec());

    if let Some(question) = query.queries().first() {
        let name = question
            .name()
            .to_ascii()
            .trim_end_matches('.')
            .to_ascii_lowercase();
        if let Some(addr) = table.get(&name) {
            response.add_answer(Record::from_rdata(
                question.name().clone(),
                60,
                RData::A(A::from(*addr)),
            ));
        }
    }
    response.to_vec().unwrap()
}

/// Mock SOCKS5 handshake data
pub mod socks5_mock {
    use nbsocks::socks::*;

    /// Create a no-auth method selection request
    pub fn create_auth_request_no_auth() -> Vec<u8> {
        vec![SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_NONE]
    }

    /// Create a method selection request offering only username/password
    pub fn create_auth_request_password() -> Vec<u8> {
        vec![SOCKS5_VERSION, 1, 0x02]
    }

    /// Create a connect command to IPv4 address
    pub fn create_connect_ipv4(ip: [u8; 4], port: u16) -> Vec<u8> {
        let mut cmd = vec![
            SOCKS5_VERSION,
            SOCKS5_CMD_TCP_CONNECT,
            SOCKS5_RESERVED,
            SOCKS5_ADDR_TYPE_IPV4,
        ];
        cmd.extend_from_slice(&ip);
        cmd.extend_from_slice(&port.to_be_bytes());
        cmd
    }

    /// Create a connect command to domain
    pub fn create_connect_domain(domain: &str, port: u16) -> Vec<u8> {
        let mut cmd = vec![
            SOCKS5_VERSION,
            SOCKS5_CMD_TCP_CONNECT,
            SOCKS5_RESERVED,
            SOCKS5_ADDR_TYPE_DOMAIN,
            domain.len() as u8,
        ];
        cmd.extend_from_slice(domain.as_bytes());
        cmd.extend_from_slice(&port.to_be_bytes());
        cmd
    }

    /// Expected reply bytes for `code` bound to `ip:port`
    pub fn expected_reply(code: u8, ip: [u8; 4], port: u16) -> Vec<u8> {
        let mut reply = vec![SOCKS5_VERSION, code, SOCKS5_RESERVED, SOCKS5_ADDR_TYPE_IPV4];
        reply.extend_from_slice(&ip);
        reply.extend_from_slice(&port.to_be_bytes());
        reply
    }
}
