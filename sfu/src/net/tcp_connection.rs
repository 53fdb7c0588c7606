use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use shared::error::{Error, Result};
use shared::tcp_framing::{TcpFramer, MAX_FRAMED_PACKET_SIZE};
use shared::{TcpConnectionId, TransportSource};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Decrements the owning server's connection count when the connection goes
/// away.
#[derive(Debug)]
pub(crate) struct ConnectionGuard(pub(crate) Arc<AtomicUsize>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// An accepted RTC TCP connection carrying RFC 4571 framed packets.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    id: TcpConnectionId,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    framer: TcpFramer,
    _guard: ConnectionGuard,
}

impl TcpConnection {
    pub(crate) fn new(
        stream: TcpStream,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        guard: ConnectionGuard,
    ) -> TcpConnection {
        TcpConnection {
            stream,
            id: TcpConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)),
            local_addr,
            peer_addr,
            framer: TcpFramer::default(),
            _guard: guard,
        }
    }

    pub fn id(&self) -> TcpConnectionId {
        self.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// The transport source packets on this connection arrive on.
    pub fn source(&self) -> TransportSource {
        TransportSource::Tcp {
            connection: self.id,
            remote: self.peer_addr,
        }
    }

    /// Read once into the framing buffer.
    ///
    /// Returns the number of bytes received; 0 means the peer closed.
    /// `ErrBufferFull` means an incomplete frame can never fit and the
    /// connection must be dropped.
    pub async fn read(&mut self) -> Result<usize> {
        self.framer.ensure_capacity()?;

        let n = self.stream.read(self.framer.spare_mut()).await?;
        self.framer.commit(n);
        Ok(n)
    }

    /// Next complete frame out of the buffered bytes.
    pub fn next_frame(&mut self) -> Option<&[u8]> {
        self.framer.next_frame()
    }

    /// Send one packet with its RFC 4571 length prefix.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > MAX_FRAMED_PACKET_SIZE {
            return Err(Error::ErrPacketTooBig);
        }

        let header = (data.len() as u16).to_be_bytes();
        self.stream.write_all(&header).await?;
        self.stream.write_all(data).await?;
        Ok(())
    }
}
