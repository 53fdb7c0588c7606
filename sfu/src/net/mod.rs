//! Socket layer.
//!
//! Thin non-blocking wrappers owning the actual sockets: UDP sockets and TCP
//! servers bound inside the worker's port range, plus framed TCP
//! connections. The sans-io [`crate::transport::Transport`] never touches
//! these; the worker reads here, feeds the transport, and writes whatever
//! the transport queues.

pub mod tcp_connection;
pub mod tcp_server;
pub mod udp_socket;

pub use tcp_connection::TcpConnection;
pub use tcp_server::TcpServer;
pub use udp_socket::UdpSocket;

use rand::Rng;
use shared::error::{Error, Result};

/// Ports of `[min_port, max_port]` starting at a random one, each visited
/// once.
pub(crate) fn port_probe_order(min_port: u16, max_port: u16) -> Result<impl Iterator<Item = u16>> {
    if max_port < min_port {
        return Err(Error::ErrEndPortLessThanStart);
    }

    let span = (max_port - min_port) as u32 + 1;
    let start = rand::rng().random_range(0..span);

    Ok((0..span).map(move |i| min_port + ((start + i) % span) as u16))
}
