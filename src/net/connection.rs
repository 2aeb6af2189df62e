//! Point-to-point byte connections between the two parties.
//! The 'medium' can be anything that implements `AsyncRead`/`AsyncWrite`.
//! There is built-in support for TCP and in-memory duplex-based connections.
//!
//! Nothing here frames messages: the protocol knows how many bytes each
//! message has, so a send is a plain write and a receive reads exactly the
//! requested amount. A receive can be bounded by a deadline so a stalled peer
//! does not hang the run forever.

use std::{io::ErrorKind, net::SocketAddr, time::Duration};

use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream, ToSocketAddrs,
    },
    time::error::Elapsed,
};

use crate::net::Channel;

/// Attempts made by `TcpConnection::connect` while the listener is not up yet
const CONNECT_ATTEMPTS: usize = 50;
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Connection<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> {
    reader: R,
    writer: W,
    timeout: Option<Duration>,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Connection<R, W> {
    /// Construct a new connection from a reader and writer
    ///
    /// * `reader`: Reader to receive bytes from
    /// * `writer`: Writer to send bytes to
    pub fn new(reader: R, writer: W) -> Self {
        Connection {
            reader,
            writer,
            timeout: None,
        }
    }

    /// Bound every receive by `timeout`, `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Close the sending side, the peer will observe end of stream.
    pub async fn shutdown(&mut self) -> Result<(), ConnectionError> {
        self.writer.shutdown().await.map_err(ConnectionError::from_io)
    }
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Connection timed out after {0}")]
    TimeOut(Elapsed),
    #[error("Connection closed by peer")]
    Closed,
    #[error("I/O failure: {0}")]
    Io(std::io::Error),
}

impl ConnectionError {
    fn from_io(e: std::io::Error) -> Self {
        match e.kind() {
            ErrorKind::UnexpectedEof
            | ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted => ConnectionError::Closed,
            _ => ConnectionError::Io(e),
        }
    }
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Channel for Connection<R, W> {
    /// Write all of `buf`, waiting until it is handed to the medium
    async fn send_bytes(&mut self, buf: &[u8]) -> Result<(), ConnectionError> {
        self.writer
            .write_all(buf)
            .await
            .map_err(ConnectionError::from_io)?;
        self.writer.flush().await.map_err(ConnectionError::from_io)
    }

    /// Receive exactly `len` bytes, waiting for arrival
    async fn recv_exact(&mut self, len: usize) -> Result<Vec<u8>, ConnectionError> {
        let mut buf = vec![0u8; len];
        let read = self.reader.read_exact(&mut buf);
        let res = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, read)
                .await
                .map_err(ConnectionError::TimeOut)?,
            None => read.await,
        };
        res.map_err(ConnectionError::from_io)?;
        Ok(buf)
    }
}

pub type TcpConnection = Connection<OwnedReadHalf, OwnedWriteHalf>;
impl TcpConnection {
    /// New TCP-based connection from a stream
    ///
    /// * `stream`: TCP stream to use
    pub fn from_tcp(stream: TcpStream) -> Self {
        // Messages are written whole, no point in Nagle's algorithm
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer)
    }

    /// Connect to a listening peer.
    ///
    /// Refused connections are retried for a few seconds, so the peers can be
    /// started in any order.
    pub async fn connect(addr: impl ToSocketAddrs + Clone) -> Result<Self, ConnectionError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match TcpStream::connect(addr.clone()).await {
                Ok(stream) => {
                    tracing::debug!(attempt, "Connected to peer");
                    return Ok(Self::from_tcp(stream));
                }
                Err(e) if e.kind() == ErrorKind::ConnectionRefused && attempt < CONNECT_ATTEMPTS => {
                    tokio::time::sleep(CONNECT_BACKOFF).await;
                }
                Err(e) => return Err(ConnectionError::Io(e)),
            }
        }
    }

    /// Listen on all interfaces at `port` and accept a single peer.
    pub async fn listen(port: u16) -> Result<Self, ConnectionError> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(ConnectionError::Io)?;
        Self::accept(&listener).await
    }

    pub async fn accept(listener: &TcpListener) -> Result<Self, ConnectionError> {
        let (stream, peer): (TcpStream, SocketAddr) =
            listener.accept().await.map_err(ConnectionError::Io)?;
        tracing::debug!(%peer, "Accepted peer");
        Ok(Self::from_tcp(stream))
    }
}

/// Connection to a in-memory data stream.
/// This always have a corresponding other connection in the same process.
pub type DuplexConnection = Connection<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;
impl DuplexConnection {
    /// Construct a duplex/in-memory connection pair
    pub fn in_memory() -> (Self, Self) {
        let (s1, s2) = tokio::io::duplex(1024);

        let (r1, w1) = tokio::io::split(s1);
        let (r2, w2) = tokio::io::split(s2);

        (Self::new(r1, w1), Self::new(r2, w2))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn in_memory() {
        let (conn1, conn2) = DuplexConnection::in_memory();
        let h1 = async move {
            let mut conn = conn1;
            conn.send_bytes(b"Hello").await.unwrap();
            conn.send_bytes(b"Buddy").await.unwrap();
            let msg = conn.recv_exact(16).await.unwrap();
            assert_eq!(msg, b"Greetings friend");
        };
        let h2 = async move {
            let mut conn = conn2;
            // Framing is up to the reader
            let msg = conn.recv_exact(10).await.unwrap();
            assert_eq!(msg, b"HelloBuddy");
            conn.send_bytes(b"Greetings friend").await.unwrap();
        };

        futures::join!(h1, h2);
    }

    #[tokio::test]
    async fn larger_than_buffer() {
        let (mut conn1, mut conn2) = DuplexConnection::in_memory();
        let payload: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
        let (sent, received) = futures::join!(
            conn1.send_bytes(&payload),
            conn2.recv_exact(payload.len())
        );
        sent.unwrap();
        assert_eq!(received.unwrap(), payload);
    }

    #[tokio::test]
    async fn closed_peer() {
        let (conn1, mut conn2) = DuplexConnection::in_memory();
        let mut conn1 = conn1;
        conn1.send_bytes(b"abc").await.unwrap();
        drop(conn1);
        // Buffered bytes are still delivered, then the stream ends.
        assert_eq!(conn2.recv_exact(3).await.unwrap(), b"abc");
        assert!(matches!(
            conn2.recv_exact(1).await,
            Err(ConnectionError::Closed)
        ));
    }

    #[tokio::test]
    async fn partial_message_then_close() {
        let (mut conn1, conn2) = DuplexConnection::in_memory();
        conn1.send_bytes(b"abc").await.unwrap();
        drop(conn1);
        let mut conn2 = conn2;
        assert!(matches!(
            conn2.recv_exact(4).await,
            Err(ConnectionError::Closed)
        ));
    }

    #[tokio::test]
    async fn stalled_peer_times_out() {
        let (_conn1, conn2) = DuplexConnection::in_memory();
        let mut conn2 = conn2.with_timeout(Some(Duration::from_millis(50)));
        assert_eq!(conn2.timeout(), Some(Duration::from_millis(50)));
        assert!(matches!(
            conn2.recv_exact(1).await,
            Err(ConnectionError::TimeOut(_))
        ));
    }

    #[tokio::test]
    async fn tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let h1 = async move {
            let mut conn = TcpConnection::connect(addr).await.unwrap();
            conn.send_bytes(b"Hello").await.unwrap();
            let msg = conn.recv_exact(16).await.unwrap();
            assert_eq!(msg, b"Greetings friend");
        };
        let h2 = async move {
            let mut conn = TcpConnection::accept(&listener).await.unwrap();
            let msg = conn.recv_exact(5).await.unwrap();
            assert_eq!(msg, b"Hello");
            conn.send_bytes(b"Greetings friend").await.unwrap();
        };

        futures::join!(h1, h2);
    }

    #[tokio::test]
    async fn connect_waits_for_listener() {
        // Reserve a free port, then give it up until the peer is already waiting
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();
        let h1 = async move {
            let mut conn = TcpConnection::connect(addr).await.unwrap();
            conn.send_bytes(b"late").await.unwrap();
        };
        let h2 = async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            let listener = TcpListener::bind(addr).await.unwrap();
            let mut conn = TcpConnection::accept(&listener).await.unwrap();
            assert_eq!(conn.recv_exact(4).await.unwrap(), b"late");
        };

        futures::join!(h1, h2);
    }
}
