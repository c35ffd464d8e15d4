//! Integration tests for Umbra Relay
//!
//! Exercises the full relay flow over real sockets:
//! - Request handshake, IPv4 and domain forms
//! - Bidirectional encrypted relaying and the round-trip law
//! - Protocol errors, unreachable destinations, and teardown
//! - Backpressure without byte loss

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use umbra_relay::crypto::{CipherConfig, CipherContext, Direction, Method};
use umbra_relay::relay::{RelayListener, RelayState};

const PASSWORD: &str = "integration test password";

/// A running relay server plus the material needed to speak to it
struct TestRelay {
    addr: SocketAddr,
    state: Arc<RelayState>,
    cipher: CipherConfig,
}

async fn start_relay(method: Method) -> TestRelay {
    start_relay_with_timeout(method, Duration::from_secs(5)).await
}

async fn start_relay_with_timeout(method: Method, timeout: Duration) -> TestRelay {
    let cipher = CipherConfig::new(PASSWORD, method).expect("cipher config");
    let state = Arc::new(RelayState::new(cipher.clone(), timeout));
    let listener = RelayListener::bind("127.0.0.1", 0, Arc::clone(&state))
        .await
        .expect("bind relay listener");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(listener.run());
    TestRelay {
        addr,
        state,
        cipher,
    }
}

/// A client speaking the relay's wire protocol
struct TestClient {
    stream: TcpStream,
    enc: CipherContext,
    dec: CipherContext,
}

impl TestClient {
    async fn connect(relay: &TestRelay) -> Self {
        let stream = TcpStream::connect(relay.addr).await.expect("connect to relay");
        Self {
            stream,
            // The client's encryptor pairs with the server's decrypt
            // context and vice versa
            enc: relay.cipher.context(Direction::Encrypt),
            dec: relay.cipher.context(Direction::Decrypt),
        }
    }

    async fn send(&mut self, data: &[u8]) {
        let mut buf = data.to_vec();
        self.enc.apply(&mut buf);
        self.stream.write_all(&buf).await.expect("send to relay");
    }

    async fn recv_exact(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf).await.expect("recv from relay");
        self.dec.apply(&mut buf);
        buf
    }

    /// Read until EOF, decrypting everything received
    async fn recv_to_end(&mut self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.stream.read_to_end(&mut buf).await.expect("recv to end");
        self.dec.apply(&mut buf);
        buf
    }

    async fn expect_eof(&mut self) {
        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(10), self.stream.read(&mut buf))
            .await
            .expect("timed out waiting for relay to close")
            .expect("read after close");
        assert_eq!(n, 0, "expected EOF from relay");
    }

    async fn send_ipv4_request(&mut self, ip: Ipv4Addr, port: u16, payload: &[u8]) {
        let mut frame = vec![0x01];
        frame.extend_from_slice(&ip.octets());
        frame.extend_from_slice(&port.to_be_bytes());
        frame.extend_from_slice(payload);
        self.send(&frame).await;
    }

    async fn send_domain_request(&mut self, host: &str, port: u16, payload: &[u8]) {
        let mut frame = vec![0x03, host.len() as u8];
        frame.extend_from_slice(host.as_bytes());
        frame.extend_from_slice(&port.to_be_bytes());
        frame.extend_from_slice(payload);
        self.send(&frame).await;
    }
}

fn ipv4_of(addr: SocketAddr) -> Ipv4Addr {
    match addr.ip() {
        std::net::IpAddr::V4(ip) => ip,
        other => panic!("expected IPv4 listener, got {other}"),
    }
}

/// Round-trip: what the client sends reaches the destination verbatim, and
/// what the destination sends back reaches the client verbatim
#[tokio::test]
async fn ipv4_handshake_relays_both_directions() {
    for method in [Method::Plain, Method::Table, Method::Rc4] {
        let relay = start_relay(method).await;

        let dest = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dest_addr = dest.local_addr().unwrap();
        let request = b"GET / HTTP/1.0\r\n\r\n";
        let response = b"HTTP/1.0 200 OK\r\n\r\nhello";

        let dest_task = tokio::spawn(async move {
            let (mut sock, _) = dest.accept().await.unwrap();
            let mut buf = vec![0u8; request.len()];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(response).await.unwrap();
            buf
        });

        let mut client = TestClient::connect(&relay).await;
        client
            .send_ipv4_request(ipv4_of(dest_addr), dest_addr.port(), request)
            .await;

        let got = client.recv_exact(response.len()).await;
        assert_eq!(got, response, "method {method}");
        assert_eq!(dest_task.await.unwrap(), request, "method {method}");
    }
}

/// A domain-form header resolves and connects by name
#[tokio::test]
async fn domain_handshake_resolves_destination() {
    let relay = start_relay(Method::Table).await;

    let dest = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dest_port = dest.local_addr().unwrap().port();

    let dest_task = tokio::spawn(async move {
        let (mut sock, _) = dest.accept().await.unwrap();
        let mut buf = [0u8; 4];
        sock.read_exact(&mut buf).await.unwrap();
        buf
    });

    let mut client = TestClient::connect(&relay).await;
    client
        .send_domain_request("localhost", dest_port, b"EHLO")
        .await;

    assert_eq!(&dest_task.await.unwrap(), b"EHLO");
}

/// An unsupported ATYP tears the pair down; the listener keeps accepting
#[tokio::test]
async fn unsupported_address_type_closes_connection() {
    let relay = start_relay(Method::Table).await;

    let mut client = TestClient::connect(&relay).await;
    client.send(&[0x02, 0xde, 0xad, 0xbe, 0xef]).await;
    client.expect_eof().await;

    // The relay must still serve new connections afterwards
    let dest = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dest_addr = dest.local_addr().unwrap();
    let dest_task = tokio::spawn(async move {
        let (mut sock, _) = dest.accept().await.unwrap();
        let mut buf = [0u8; 2];
        sock.read_exact(&mut buf).await.unwrap();
        buf
    });

    let mut client = TestClient::connect(&relay).await;
    client
        .send_ipv4_request(ipv4_of(dest_addr), dest_addr.port(), b"ok")
        .await;
    assert_eq!(&dest_task.await.unwrap(), b"ok");
}

/// An unreachable destination ends the pair; the listener survives
#[tokio::test]
async fn unreachable_destination_tears_down_pair() {
    let relay = start_relay_with_timeout(Method::Plain, Duration::from_secs(1)).await;

    let mut client = TestClient::connect(&relay).await;
    // TEST-NET-1 address: never routable, so the connect either times out
    // or fails fast; both must close the client connection
    client
        .send_ipv4_request(Ipv4Addr::new(192, 0, 2, 1), 9, b"")
        .await;
    client.expect_eof().await;

    // New connections still work
    let dest = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dest_addr = dest.local_addr().unwrap();
    let dest_task = tokio::spawn(async move {
        let (mut sock, _) = dest.accept().await.unwrap();
        let mut buf = [0u8; 5];
        sock.read_exact(&mut buf).await.unwrap();
        buf
    });

    let mut client = TestClient::connect(&relay).await;
    client
        .send_ipv4_request(ipv4_of(dest_addr), dest_addr.port(), b"still")
        .await;
    assert_eq!(&dest_task.await.unwrap(), b"still");
}

/// A slow destination stalls the client side without losing bytes
#[tokio::test]
async fn backpressure_loses_no_bytes() {
    let relay = start_relay(Method::Rc4).await;

    let payload: Vec<u8> = (0..1024 * 1024).map(|i| (i * 31 % 251) as u8).collect();
    let expected = payload.clone();

    let dest = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dest_addr = dest.local_addr().unwrap();
    let dest_task = tokio::spawn(async move {
        let (mut sock, _) = dest.accept().await.unwrap();
        // Let the relay fill its buffer and stall before draining
        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut buf = vec![0u8; expected.len()];
        sock.read_exact(&mut buf).await.unwrap();
        sock.write_all(b"done").await.unwrap();
        buf
    });

    let mut client = TestClient::connect(&relay).await;
    client
        .send_ipv4_request(ipv4_of(dest_addr), dest_addr.port(), b"")
        .await;
    client.send(&payload).await;

    assert_eq!(client.recv_exact(4).await, b"done");
    let received = dest_task.await.unwrap();
    assert_eq!(received.len(), payload.len());
    assert_eq!(received, payload);
}

/// Destination EOF: the client gets exactly the destination's bytes, then
/// sees its own connection closed
#[tokio::test]
async fn destination_eof_propagates_to_client() {
    let relay = start_relay(Method::Rc4).await;

    let dest = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dest_addr = dest.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut sock, _) = dest.accept().await.unwrap();
        sock.write_all(b"OK").await.unwrap();
        // Drop closes the destination side immediately after the write
    });

    let mut client = TestClient::connect(&relay).await;
    client
        .send_ipv4_request(ipv4_of(dest_addr), dest_addr.port(), b"")
        .await;

    assert_eq!(client.recv_to_end().await, b"OK");
}

/// Endpoint counters return to zero once pairs are torn down
#[tokio::test]
async fn counters_drain_after_teardown() {
    let relay = start_relay(Method::Table).await;

    let dest = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dest_addr = dest.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut sock, _) = dest.accept().await.unwrap();
        let mut buf = [0u8; 3];
        sock.read_exact(&mut buf).await.unwrap();
        sock.write_all(b"bye").await.unwrap();
    });

    let mut client = TestClient::connect(&relay).await;
    client
        .send_ipv4_request(ipv4_of(dest_addr), dest_addr.port(), b"hey")
        .await;
    assert_eq!(client.recv_exact(3).await, b"bye");
    drop(client);

    for _ in 0..100 {
        if relay.state.open_clients() == 0 && relay.state.open_upstreams() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "counters did not drain: {} clients, {} upstreams",
        relay.state.open_clients(),
        relay.state.open_upstreams()
    );
}
