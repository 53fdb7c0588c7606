use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, warn};
use shared::error::{Error, Result};
use shared::{TransportSource, UdpSocketId};

use super::port_probe_order;

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

/// A bound RTC UDP socket.
#[derive(Debug)]
pub struct UdpSocket {
    socket: tokio::net::UdpSocket,
    id: UdpSocketId,
    local_addr: SocketAddr,
}

impl UdpSocket {
    /// Bind on the given IP, probing random ports within the range.
    pub async fn bind(ip: IpAddr, min_port: u16, max_port: u16) -> Result<UdpSocket> {
        for port in port_probe_order(min_port, max_port)? {
            match tokio::net::UdpSocket::bind(SocketAddr::new(ip, port)).await {
                Ok(socket) => {
                    let local_addr = socket.local_addr()?;
                    debug!("UDP socket bound on {local_addr}");

                    return Ok(UdpSocket {
                        socket,
                        id: UdpSocketId(NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed)),
                        local_addr,
                    });
                }
                Err(err) => {
                    debug!("cannot bind UDP port {port}: {err}");
                }
            }
        }

        Err(Error::ErrPortSpaceExhausted)
    }

    pub fn id(&self) -> UdpSocketId {
        self.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The transport source a datagram from `remote` arrived on.
    pub fn source_for(&self, remote: SocketAddr) -> TransportSource {
        TransportSource::Udp {
            socket: self.id,
            remote,
        }
    }

    pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Ok(self.socket.recv_from(buf).await?)
    }

    pub async fn send_to(&self, data: &[u8], remote: SocketAddr) -> Result<()> {
        let sent = self.socket.send_to(data, remote).await?;
        if sent != data.len() {
            warn!(
                "sent only {sent} bytes of a {} byte datagram to {remote}",
                data.len()
            );
        }

        Ok(())
    }
}
