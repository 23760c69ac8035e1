// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! SNI-routed TCP proxy.
//!
//! The relay reads the start of each inbound stream, up to a fixed budget,
//! until the TLS ClientHello parses. The SNI host name picks the upstream.
//! The bytes read so far are written upstream first and then both directions
//! are spliced. The relay never terminates TLS and never looks past the
//! ClientHello.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{
    pipe, sni, with_timeout, BoxedStream, ConnectionHandler, ConnectionState, RelayConnection,
    RelayError, RelayStats,
};

const READ_CHUNK: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRelayConfig {
    /// Most bytes read while looking for a ClientHello.
    pub peek_budget: usize,
    pub upstream_port: u16,
    pub connect_timeout: Option<Duration>,
}

impl Default for NetworkRelayConfig {
    fn default() -> Self {
        Self {
            peek_budget: 4096,
            upstream_port: 443,
            connect_timeout: Some(Duration::from_secs(10)),
        }
    }
}

/// Opens outbound connections for the relay.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, host: &str, port: u16) -> io::Result<BoxedStream>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, host: &str, port: u16) -> io::Result<BoxedStream> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

pub struct NetworkRelay<D = TcpDialer> {
    config: NetworkRelayConfig,
    dialer: D,
}

impl NetworkRelay<TcpDialer> {
    pub fn tcp(config: NetworkRelayConfig) -> Self {
        Self::new(config, TcpDialer)
    }
}

impl<D: Dialer> NetworkRelay<D> {
    pub fn new(config: NetworkRelayConfig, dialer: D) -> Self {
        Self { config, dialer }
    }

    pub fn config(&self) -> &NetworkRelayConfig {
        &self.config
    }

    /// Relay one client stream. Fails closed, without dialing, when no SNI
    /// host name can be read.
    pub async fn relay_stream<S>(&self, conn: &mut RelayConnection, mut client: S) -> Result<RelayStats, RelayError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        conn.transition(ConnectionState::Peeking);
        let (host, buffered) = match self.read_client_hello(&mut client).await {
            Ok(found) => found,
            Err(e) => {
                conn.transition(ConnectionState::SniMissing);
                return Err(e);
            }
        };
        conn.transition(ConnectionState::SniFound);

        let destination = format!("{host}:{}", self.config.upstream_port);
        conn.destination = Some(destination.clone());
        conn.transition(ConnectionState::Connecting);

        let upstream_err = |source: io::Error| RelayError::Upstream {
            destination: destination.clone(),
            source,
        };
        let mut upstream = with_timeout(
            self.config.connect_timeout,
            self.dialer.dial(&host, self.config.upstream_port),
        )
        .await
        .map_err(upstream_err)?;
        upstream.write_all(&buffered).await.map_err(upstream_err)?;

        conn.transition(ConnectionState::Relaying);
        let mut stats = pipe::splice(client, upstream).await?;
        stats.client_to_upstream += buffered.len() as u64;
        Ok(stats)
    }

    /// Read until the first record yields a host name. Returns the name and
    /// every byte consumed from the client.
    async fn read_client_hello<S>(&self, client: &mut S) -> Result<(String, Vec<u8>), RelayError>
    where
        S: AsyncRead + Unpin,
    {
        let budget = self.config.peek_budget;
        let mut buffered = Vec::with_capacity(READ_CHUNK.min(budget));
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            match sni::server_name(&buffered) {
                Ok(host) => return Ok((host, buffered)),
                Err(sni::SniError::Incomplete) => {}
                Err(e) => return Err(e.into()),
            }

            if buffered.len() >= budget {
                return Err(RelayError::PeekBudgetExceeded(budget));
            }
            let want = READ_CHUNK.min(budget - buffered.len());
            let n = client.read(&mut chunk[..want]).await?;
            if n == 0 {
                return Err(if buffered.is_empty() {
                    RelayError::ClientClosed
                } else {
                    RelayError::Parse(sni::SniError::Incomplete)
                });
            }
            buffered.extend_from_slice(&chunk[..n]);
        }
    }
}

#[async_trait]
impl<D: Dialer + 'static> ConnectionHandler for NetworkRelay<D> {
    fn name(&self) -> &'static str {
        "network"
    }

    async fn handle(&self, conn: &mut RelayConnection, stream: TcpStream) -> Result<RelayStats, RelayError> {
        self.relay_stream(conn, stream).await
    }
}
