use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;

use log::{debug, warn};
use shared::error::{Error, Result};
use shared::TcpServerId;

use super::port_probe_order;
use super::tcp_connection::{ConnectionGuard, TcpConnection};

static NEXT_SERVER_ID: AtomicU64 = AtomicU64::new(1);

/// Accepted connections per server unless configured otherwise.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;

/// An RTC TCP server.
#[derive(Debug)]
pub struct TcpServer {
    listener: TcpListener,
    id: TcpServerId,
    local_addr: SocketAddr,
    max_connections: usize,
    connections: Arc<AtomicUsize>,
}

impl TcpServer {
    /// Bind on the given IP, probing random ports within the range.
    pub async fn bind(
        ip: IpAddr,
        min_port: u16,
        max_port: u16,
        max_connections: usize,
    ) -> Result<TcpServer> {
        for port in port_probe_order(min_port, max_port)? {
            match TcpListener::bind(SocketAddr::new(ip, port)).await {
                Ok(listener) => {
                    let local_addr = listener.local_addr()?;
                    debug!("TCP server bound on {local_addr}");

                    return Ok(TcpServer {
                        listener,
                        id: TcpServerId(NEXT_SERVER_ID.fetch_add(1, Ordering::Relaxed)),
                        local_addr,
                        max_connections,
                        connections: Arc::new(AtomicUsize::new(0)),
                    });
                }
                Err(err) => {
                    debug!("cannot bind TCP port {port}: {err}");
                }
            }
        }

        Err(Error::ErrPortSpaceExhausted)
    }

    pub fn id(&self) -> TcpServerId {
        self.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Accept the next connection.
    ///
    /// Connections beyond the per-server cap are closed right away and the
    /// server keeps listening.
    pub async fn accept(&self) -> Result<TcpConnection> {
        loop {
            let (stream, peer_addr) = self.listener.accept().await?;

            if self.connections.load(Ordering::Relaxed) >= self.max_connections {
                warn!(
                    "too many connections on {}, closing connection from {peer_addr}",
                    self.local_addr
                );
                continue;
            }

            self.connections.fetch_add(1, Ordering::Relaxed);
            debug!("accepted TCP connection from {peer_addr}");

            return Ok(TcpConnection::new(
                stream,
                self.local_addr,
                peer_addr,
                ConnectionGuard(Arc::clone(&self.connections)),
            ));
        }
    }
}
