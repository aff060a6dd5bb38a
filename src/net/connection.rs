//! Tracked connection wrapper.
//!
//! # Responsibilities
//! - Own the raw TCP stream of an accepted connection
//! - Report closure to the connection tracker exactly once
//! - Stay transparent to the HTTP layer (AsyncRead/AsyncWrite passthrough)

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;

use crate::net::tracker::{ConnectionGuard, ConnectionId};

/// A connection whose closure is observable by the shutdown coordinator.
///
/// Closing happens either through [`TrackedConnection::close`] or by dropping the
/// value; either way the tracker is decremented exactly once.
#[derive(Debug)]
pub struct TrackedConnection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    id: ConnectionId,
    guard: Option<ConnectionGuard>,
}

impl TrackedConnection {
    pub(crate) fn new(stream: TcpStream, peer_addr: SocketAddr, guard: ConnectionGuard) -> Self {
        Self {
            stream,
            peer_addr,
            id: guard.id(),
            guard: Some(guard),
        }
    }

    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address of the peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Whether [`close`](Self::close) has already run.
    pub fn is_closed(&self) -> bool {
        self.guard.is_none()
    }

    /// Shut down the stream and release the tracking slot.
    ///
    /// The slot is released even if the shutdown itself fails. Subsequent calls
    /// return `Ok(())` without touching the stream or the tracker.
    pub async fn close(&mut self) -> io::Result<()> {
        let Some(guard) = self.guard.take() else {
            return Ok(());
        };

        let result = self.stream.shutdown().await;
        drop(guard);

        if let Err(e) = &result {
            tracing::debug!(connection_id = %self.id, error = %e, "Stream shutdown failed");
        }
        result
    }
}

impl AsyncRead for TrackedConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for TrackedConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.stream.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::tracker::ConnectionTracker;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn tracked_pair(tracker: &ConnectionTracker) -> (TrackedConnection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        (TrackedConnection::new(server, peer, tracker.track()), client)
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let tracker = ConnectionTracker::new();
        let (mut conn, _client) = tracked_pair(&tracker).await;
        let _other = tracker.track();
        assert_eq!(tracker.open_count(), 2);

        conn.close().await.unwrap();
        assert_eq!(tracker.open_count(), 1);
        assert!(conn.is_closed());

        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert_eq!(tracker.open_count(), 1);

        drop(conn);
        assert_eq!(tracker.open_count(), 1);
    }

    #[tokio::test]
    async fn drop_releases_slot() {
        let tracker = ConnectionTracker::new();
        let (conn, _client) = tracked_pair(&tracker).await;
        assert_eq!(tracker.open_count(), 1);
        drop(conn);
        assert_eq!(tracker.open_count(), 0);
    }

    #[tokio::test]
    async fn passes_bytes_through() {
        let tracker = ConnectionTracker::new();
        let (mut conn, mut client) = tracked_pair(&tracker).await;

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        conn.write_all(b"pong").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn close_signals_eof_to_peer() {
        let tracker = ConnectionTracker::new();
        let (mut conn, mut client) = tracked_pair(&tracker).await;
        conn.close().await.unwrap();

        let mut buf = Vec::new();
        let n = client.read_to_end(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }
}
