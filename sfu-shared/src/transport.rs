use bytes::BytesMut;
use std::net::SocketAddr;

/// Type of transport protocol, either UDP or TCP
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransportProtocol {
    /// UDP
    #[default]
    UDP,
    /// TCP
    TCP,
}

/// Identity of a bound UDP socket within a worker.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UdpSocketId(pub u64);

/// Identity of a bound TCP server within a worker.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TcpServerId(pub u64);

/// Identity of an accepted TCP connection within a worker.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TcpConnectionId(pub u64);

/// The path a packet arrived on, and the address outgoing data is sent to.
///
/// A source is either a (UDP socket, remote address) pair or an accepted TCP
/// connection. Sources are plain values: promoting one into a transport's
/// valid list copies it, so the remote address is always owned storage.
#[derive(Debug, Copy, Clone)]
pub enum TransportSource {
    Udp {
        socket: UdpSocketId,
        remote: SocketAddr,
    },
    Tcp {
        connection: TcpConnectionId,
        remote: SocketAddr,
    },
}

impl TransportSource {
    pub fn is_udp(&self) -> bool {
        matches!(self, TransportSource::Udp { .. })
    }

    pub fn is_tcp(&self) -> bool {
        matches!(self, TransportSource::Tcp { .. })
    }

    pub fn protocol(&self) -> TransportProtocol {
        match self {
            TransportSource::Udp { .. } => TransportProtocol::UDP,
            TransportSource::Tcp { .. } => TransportProtocol::TCP,
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        match self {
            TransportSource::Udp { remote, .. } => *remote,
            TransportSource::Tcp { remote, .. } => *remote,
        }
    }

    /// Whether this is a TCP source on the given connection.
    pub fn is_tcp_connection(&self, id: TcpConnectionId) -> bool {
        matches!(self, TransportSource::Tcp { connection, .. } if *connection == id)
    }
}

/// UDP sources match on socket plus full remote address, TCP sources match on
/// the connection identity alone (the peer address is fixed for its lifetime).
impl PartialEq for TransportSource {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                TransportSource::Udp { socket, remote },
                TransportSource::Udp {
                    socket: other_socket,
                    remote: other_remote,
                },
            ) => socket == other_socket && remote == other_remote,
            (
                TransportSource::Tcp { connection, .. },
                TransportSource::Tcp {
                    connection: other_connection,
                    ..
                },
            ) => connection == other_connection,
            _ => false,
        }
    }
}

impl Eq for TransportSource {}

/// An outgoing packet together with the source it must be sent through.
#[derive(Debug)]
pub struct Transmit {
    pub source: TransportSource,
    pub payload: BytesMut,
}
