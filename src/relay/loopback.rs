// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fixed-destination relay.
//!
//! Bridges a local TCP acceptor to whatever transport the [`Connector`]
//! opens. Inside the enclave it forwards TLS clients to the host proxy;
//! on the host it forwards inbound API traffic to the enclave.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use super::{
    pipe, with_timeout, BoxedStream, ConnectionHandler, ConnectionState, RelayConnection, RelayError,
    RelayStats,
};

/// Opens the outbound half of each relayed connection.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> io::Result<BoxedStream>;

    /// Human-readable destination, for logs.
    fn describe(&self) -> String;
}

/// Connects to a fixed TCP address.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> io::Result<BoxedStream> {
        let stream = TcpStream::connect(self.addr.as_str()).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        self.addr.clone()
    }
}

pub struct LoopbackRelay<C> {
    connector: C,
    connect_timeout: Option<Duration>,
}

impl<C: Connector> LoopbackRelay<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            connect_timeout: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub async fn relay_stream<S>(&self, conn: &mut RelayConnection, client: S) -> Result<RelayStats, RelayError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let destination = self.connector.describe();
        conn.destination = Some(destination.clone());
        conn.transition(ConnectionState::Connecting);

        let upstream = with_timeout(self.connect_timeout, self.connector.connect())
            .await
            .map_err(|source| RelayError::Upstream { destination, source })?;

        conn.transition(ConnectionState::Relaying);
        Ok(pipe::splice(client, upstream).await?)
    }
}

#[async_trait]
impl<C: Connector + 'static> ConnectionHandler for LoopbackRelay<C> {
    fn name(&self) -> &'static str {
        "loopback"
    }

    async fn handle(&self, conn: &mut RelayConnection, stream: TcpStream) -> Result<RelayStats, RelayError> {
        self.relay_stream(conn, stream).await
    }
}
