// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relays served on real loopback sockets.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use enclave_bridge::relay::{
    self, BoxedStream, ConnectionHandler, Dialer, LoopbackRelay, NetworkRelay, NetworkRelayConfig,
    TcpConnector,
};

const WAIT: Duration = Duration::from_secs(5);

fn client_hello(host: &str) -> Vec<u8> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(rustls::RootCertStore::empty())
        .with_no_client_auth();
    let name = ServerName::try_from(host.to_string()).unwrap();
    let mut conn = rustls::ClientConnection::new(Arc::new(config), name).unwrap();

    let mut out = Vec::new();
    conn.write_tls(&mut out).unwrap();
    out
}

async fn echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

async fn spawn_relay<H>(handler: H) -> (SocketAddr, CancellationToken, JoinHandle<io::Result<()>>)
where
    H: ConnectionHandler + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(relay::serve(listener, Arc::new(handler), shutdown.clone()));
    (addr, shutdown, task)
}

/// Sends every dial to a local address and records what was asked for.
#[derive(Clone)]
struct LocalDialer {
    target: SocketAddr,
    dialed: Arc<Mutex<Vec<(String, u16)>>>,
}

impl LocalDialer {
    fn new(target: SocketAddr) -> Self {
        Self {
            target,
            dialed: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl Dialer for LocalDialer {
    async fn dial(&self, host: &str, port: u16) -> io::Result<BoxedStream> {
        self.dialed.lock().unwrap().push((host.to_string(), port));
        Ok(Box::new(TcpStream::connect(self.target).await?))
    }
}

async fn read_until_closed(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    // a reset is as good as a close here
    let _ = tokio::time::timeout(WAIT, stream.read_to_end(&mut buf)).await.unwrap();
    buf
}

#[tokio::test]
async fn network_relay_routes_by_sni_and_replays_hello() {
    let upstream = echo_server().await;
    let dialer = LocalDialer::new(upstream);
    let (addr, shutdown, task) = spawn_relay(NetworkRelay::new(NetworkRelayConfig::default(), dialer.clone())).await;

    let hello = client_hello("api.openai.com");
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(&hello).await.unwrap();
    client.write_all(b"after-hello").await.unwrap();

    let mut echoed = vec![0u8; hello.len() + b"after-hello".len()];
    tokio::time::timeout(WAIT, client.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&echoed[..hello.len()], hello.as_slice());
    assert_eq!(&echoed[hello.len()..], b"after-hello");

    assert_eq!(
        dialer.dialed.lock().unwrap().as_slice(),
        &[("api.openai.com".to_string(), 443)]
    );

    shutdown.cancel();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn network_relay_dials_real_tcp_on_configured_port() {
    let upstream = echo_server().await;
    let config = NetworkRelayConfig {
        upstream_port: upstream.port(),
        ..NetworkRelayConfig::default()
    };
    let (addr, shutdown, _task) = spawn_relay(NetworkRelay::tcp(config)).await;

    let hello = client_hello("localhost");
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(&hello).await.unwrap();

    let mut echoed = vec![0u8; hello.len()];
    tokio::time::timeout(WAIT, client.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echoed, hello);
    shutdown.cancel();
}

#[tokio::test]
async fn plaintext_is_dropped_without_dialing() {
    let upstream = echo_server().await;
    let dialer = LocalDialer::new(upstream);
    let (addr, shutdown, _task) = spawn_relay(NetworkRelay::new(NetworkRelayConfig::default(), dialer.clone())).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n")
        .await
        .unwrap();

    assert!(read_until_closed(&mut client).await.is_empty());
    assert!(dialer.dialed.lock().unwrap().is_empty());
    shutdown.cancel();
}

#[tokio::test]
async fn hello_larger_than_budget_is_dropped() {
    let upstream = echo_server().await;
    let dialer = LocalDialer::new(upstream);
    let config = NetworkRelayConfig {
        peek_budget: 16,
        ..NetworkRelayConfig::default()
    };
    let (addr, shutdown, _task) = spawn_relay(NetworkRelay::new(config, dialer.clone())).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(&client_hello("example.com")).await.unwrap();

    assert!(read_until_closed(&mut client).await.is_empty());
    assert!(dialer.dialed.lock().unwrap().is_empty());
    shutdown.cancel();
}

#[tokio::test]
async fn concurrent_connections_are_independent() {
    let upstream = echo_server().await;
    let dialer = LocalDialer::new(upstream);
    let (addr, shutdown, _task) = spawn_relay(NetworkRelay::new(NetworkRelayConfig::default(), dialer.clone())).await;

    let mut clients = Vec::new();
    for host in ["a.example.com", "b.example.com", "c.example.com"] {
        clients.push(tokio::spawn(async move {
            let hello = client_hello(host);
            let mut client = TcpStream::connect(addr).await.unwrap();
            client.write_all(&hello).await.unwrap();
            let mut echoed = vec![0u8; hello.len()];
            client.read_exact(&mut echoed).await.unwrap();
            assert_eq!(echoed, hello);
        }));
    }
    for client in clients {
        tokio::time::timeout(WAIT, client).await.unwrap().unwrap();
    }

    let mut hosts: Vec<String> = dialer.dialed.lock().unwrap().iter().map(|(h, _)| h.clone()).collect();
    hosts.sort();
    assert_eq!(hosts, ["a.example.com", "b.example.com", "c.example.com"]);
    shutdown.cancel();
}

#[tokio::test]
async fn loopback_relay_forwards_bytes_both_ways() {
    let upstream = echo_server().await;
    let (addr, shutdown, task) = spawn_relay(LoopbackRelay::new(TcpConnector::new(upstream.to_string()))).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"hello enclave").await.unwrap();
    let mut echoed = [0u8; 13];
    tokio::time::timeout(WAIT, client.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&echoed, b"hello enclave");

    shutdown.cancel();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn loopback_relay_closes_client_when_target_is_down() {
    // bind then drop to get a port with nothing listening
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
    let relay = LoopbackRelay::new(TcpConnector::new(closed.to_string()))
        .with_connect_timeout(Some(Duration::from_secs(1)));
    let (addr, shutdown, _task) = spawn_relay(relay).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    assert!(read_until_closed(&mut client).await.is_empty());
    shutdown.cancel();
}
