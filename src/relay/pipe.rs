// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bidirectional byte forwarding between two established streams.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::RelayStats;

const BUFFER_SIZE: usize = 8 * 1024;

/// Forward bytes both ways until either direction ends.
///
/// Both copy loops run inside one `select!`; as soon as one finishes (EOF or
/// error) the other is dropped and both streams are closed when this
/// function returns.
pub async fn splice<C, U>(client: C, upstream: U) -> io::Result<RelayStats>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_rx, mut client_tx) = tokio::io::split(client);
    let (mut upstream_rx, mut upstream_tx) = tokio::io::split(upstream);

    let to_upstream = AtomicU64::new(0);
    let to_client = AtomicU64::new(0);

    let result = tokio::select! {
        r = pump(&mut client_rx, &mut upstream_tx, &to_upstream) => r,
        r = pump(&mut upstream_rx, &mut client_tx, &to_client) => r,
    };

    let stats = RelayStats {
        client_to_upstream: to_upstream.load(Ordering::Relaxed),
        upstream_to_client: to_client.load(Ordering::Relaxed),
    };

    match result {
        Ok(()) => Ok(stats),
        Err(e) if is_normal_close(&e) => Ok(stats),
        Err(e) => Err(e),
    }
}

async fn pump<R, W>(reader: &mut R, writer: &mut W, counter: &AtomicU64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            // Best effort: the peer may already be gone.
            let _ = writer.shutdown().await;
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

fn is_normal_close(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn forwards_both_directions_and_counts() {
        let (client, mut client_peer) = duplex(64 * 1024);
        let (upstream, mut upstream_peer) = duplex(64 * 1024);

        let relay = tokio::spawn(splice(client, upstream));

        client_peer.write_all(b"request bytes").await.unwrap();
        let mut got = [0u8; 13];
        upstream_peer.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"request bytes");

        upstream_peer.write_all(b"response").await.unwrap();
        let mut got = [0u8; 8];
        client_peer.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"response");

        drop(upstream_peer);
        let stats = relay.await.unwrap().unwrap();
        assert_eq!(stats.client_to_upstream, 13);
        assert_eq!(stats.upstream_to_client, 8);
    }

    #[tokio::test]
    async fn closing_one_side_closes_the_other() {
        let (client, client_peer) = duplex(1024);
        let (upstream, mut upstream_peer) = duplex(1024);

        let relay = tokio::spawn(splice(client, upstream));
        drop(client_peer);

        relay.await.unwrap().unwrap();
        let mut buf = Vec::new();
        upstream_peer.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn large_transfer_is_forwarded_unmodified() {
        let (client, mut client_peer) = duplex(4 * 1024);
        let (upstream, mut upstream_peer) = duplex(4 * 1024);
        let relay = tokio::spawn(splice(client, upstream));

        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            client_peer.write_all(&payload).await.unwrap();
            client_peer
        });

        let mut received = vec![0u8; expected.len()];
        upstream_peer.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);

        drop(writer.await.unwrap());
        let stats = relay.await.unwrap().unwrap();
        assert_eq!(stats.client_to_upstream, expected.len() as u64);
    }

    #[test]
    fn resets_count_as_normal_closes() {
        assert!(is_normal_close(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(is_normal_close(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(!is_normal_close(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
