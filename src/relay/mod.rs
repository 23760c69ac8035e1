// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Network Relay
//!
//! TCP forwarding that gives the enclave indirect network access without
//! terminating TLS.
//!
//! ```text
//! enclave process          enclave boundary          host
//! TLS client -> LoopbackRelay ------------------> NetworkRelay -> sni-host:443
//! ```
//!
//! - [`network::NetworkRelay`]: reads the ClientHello, picks the upstream from
//!   its SNI host name and fails closed when there is none
//! - [`loopback::LoopbackRelay`]: forwards to a fixed destination obtained
//!   from a pluggable [`loopback::Connector`]
//!
//! [`serve`] runs one task per accepted connection. Handler errors only end
//! that connection.

pub mod loopback;
pub mod network;
pub mod pipe;
pub mod sni;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use loopback::{Connector, LoopbackRelay, TcpConnector};
pub use network::{Dialer, NetworkRelay, NetworkRelayConfig, TcpDialer};
pub use sni::SniError;

/// Pause after a failed `accept` so descriptor exhaustion does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("ClientHello carries no server name")]
    NoSni,

    #[error("cannot parse ClientHello: {0}")]
    Parse(SniError),

    #[error("no ClientHello within {0} bytes")]
    PeekBudgetExceeded(usize),

    #[error("client closed before sending data")]
    ClientClosed,

    #[error("upstream {destination} unavailable: {source}")]
    Upstream {
        destination: String,
        #[source]
        source: io::Error,
    },

    #[error("relay I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<SniError> for RelayError {
    fn from(e: SniError) -> Self {
        match e {
            SniError::Missing => Self::NoSni,
            other => Self::Parse(other),
        }
    }
}

/// Lifecycle of one relayed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    Peeking,
    SniFound,
    SniMissing,
    Connecting,
    Relaying,
    Closed,
}

/// Bytes forwarded in each direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
}

/// Bookkeeping for one proxied stream; lives only as long as the connection.
#[derive(Debug, Clone)]
pub struct RelayConnection {
    pub id: Uuid,
    pub peer: SocketAddr,
    pub state: ConnectionState,
    pub destination: Option<String>,
    pub stats: RelayStats,
}

impl RelayConnection {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            state: ConnectionState::Accepted,
            destination: None,
            stats: RelayStats::default(),
        }
    }

    pub fn transition(&mut self, next: ConnectionState) {
        tracing::debug!(
            connection_id = %self.id,
            peer = %self.peer,
            from = ?self.state,
            to = ?next,
            "relay connection state"
        );
        self.state = next;
    }
}

/// Any bidirectional byte stream a relay can forward.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(
        &self,
        conn: &mut RelayConnection,
        stream: TcpStream,
    ) -> Result<RelayStats, RelayError>;
}

/// Accept connections until `shutdown` fires, handing each to `handler` on
/// its own task.
pub async fn serve<H>(listener: TcpListener, handler: Arc<H>, shutdown: CancellationToken) -> io::Result<()>
where
    H: ConnectionHandler + 'static,
{
    let local = listener.local_addr()?;
    tracing::info!(relay = handler.name(), addr = %local, "relay listening");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!(relay = handler.name(), "relay shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(relay = handler.name(), error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };
                let _ = stream.set_nodelay(true);

                let handler = handler.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let mut conn = RelayConnection::new(peer);
                    let result = tokio::select! {
                        r = handler.handle(&mut conn, stream) => Some(r),
                        _ = shutdown.cancelled() => None,
                    };
                    conn.transition(ConnectionState::Closed);

                    match result {
                        Some(Ok(stats)) => {
                            conn.stats = stats;
                            tracing::info!(
                                relay = handler.name(),
                                connection_id = %conn.id,
                                peer = %conn.peer,
                                destination = conn.destination.as_deref().unwrap_or("-"),
                                client_to_upstream = stats.client_to_upstream,
                                upstream_to_client = stats.upstream_to_client,
                                "relay connection closed"
                            );
                        }
                        Some(Err(e)) => {
                            tracing::warn!(
                                relay = handler.name(),
                                connection_id = %conn.id,
                                peer = %conn.peer,
                                destination = conn.destination.as_deref().unwrap_or("-"),
                                error = %e,
                                "relay connection failed"
                            );
                        }
                        None => {
                            tracing::debug!(connection_id = %conn.id, "relay connection cancelled");
                        }
                    }
                });
            }
        }
    }
}

/// Dial with an optional timeout, mapping expiry to `TimedOut`.
async fn with_timeout<F>(timeout: Option<Duration>, connect: F) -> io::Result<BoxedStream>
where
    F: std::future::Future<Output = io::Result<BoxedStream>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, connect)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))?,
        None => connect.await,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use rustls::pki_types::ServerName;
    use rustls::{ClientConfig, ClientConnection, RootCertStore};

    /// First flight of a real TLS client connecting to `host`.
    pub(crate) fn client_hello(host: &str) -> Vec<u8> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(RootCertStore::empty())
            .with_no_client_auth();
        let name = ServerName::try_from(host.to_string()).unwrap();
        let mut conn = ClientConnection::new(Arc::new(config), name).unwrap();

        let mut out = Vec::new();
        conn.write_tls(&mut out).unwrap();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sni_maps_to_no_sni() {
        assert!(matches!(RelayError::from(SniError::Missing), RelayError::NoSni));
        assert!(matches!(
            RelayError::from(SniError::NotTls),
            RelayError::Parse(SniError::NotTls)
        ));
    }

    #[test]
    fn connection_starts_accepted() {
        let conn = RelayConnection::new("127.0.0.1:4000".parse().unwrap());
        assert_eq!(conn.state, ConnectionState::Accepted);
        assert_eq!(conn.stats, RelayStats::default());
        assert!(conn.destination.is_none());
    }

    #[tokio::test]
    async fn timeout_maps_to_timed_out() {
        let pending = std::future::pending::<io::Result<BoxedStream>>();
        let err = match with_timeout(Some(Duration::from_millis(10)), pending).await {
            Ok(_) => panic!("pending connect must time out"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
