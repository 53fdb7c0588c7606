//! WebRTC transport.
//!
//! A [`Transport`] composes, for the most demanding case:
//!
//! - an ICE-Lite server answering received checks and reporting valid pairs,
//! - a DTLS agent negotiating the session that keys SRTP,
//! - a pair of SRTP sessions protecting outbound and unprotecting inbound
//!   media,
//! - a bounded list of validated [`TransportSource`]s from which incoming
//!   data is accepted (anything else is discarded),
//! - one source marked as "sending source", the chosen path for outgoing
//!   data.
//!
//! Considerations:
//!
//! - ICE responses travel back through the same source that delivered the
//!   request.
//! - Outgoing DTLS data goes to the currently selected sending source.
//! - The sending source moves whenever a packet arrives from a valid source
//!   that is not the current one.
//! - `reset()` clears the valid sources, resets the DTLS state and drops the
//!   SRTP sessions; the transport itself stays usable.
//!
//! The transport is sans-io and single-owner: feed it packets with
//! [`Transport::handle_read`], drain [`Transport::poll_transmit`] /
//! [`Transport::poll_event`] and drive the DTLS timer through
//! [`Transport::poll_timeout`] / [`Transport::handle_timeout`].

use bytes::BytesMut;
use std::collections::VecDeque;
use std::ops::BitOr;
use std::time::Instant;

use dtls::{DtlsAgent, DtlsEvent, DtlsMaterials, DtlsRole, FingerprintHash};
use ice::server::{IceServer, IceServerEvent};
use log::{debug, warn};
use shared::classifier::PacketKind;
use shared::error::{Error, Result};
use shared::{TcpConnectionId, TcpServerId, Transmit, TransportSource, UdpSocketId};
use srtp_session::{SessionType, SrtpSession};
use stun::message::StunMessage;

use crate::rtcp::RtcpHeader;
use crate::rtp::RtpHeader;

/// Default bound of the validated source list.
pub const MAX_SOURCES: usize = 8;

/// Capabilities of a transport.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TransportFlags(u8);

impl TransportFlags {
    pub const NONE: TransportFlags = TransportFlags(0);
    pub const ICE: TransportFlags = TransportFlags(1);
    pub const DTLS: TransportFlags = TransportFlags(1 << 1);
    pub const SRTP: TransportFlags = TransportFlags(1 << 2);

    pub fn contains(self, other: TransportFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for TransportFlags {
    type Output = TransportFlags;

    fn bitor(self, rhs: TransportFlags) -> TransportFlags {
        TransportFlags(self.0 | rhs.0)
    }
}

/// Events surfaced to the transport's owner, drained in emission order.
#[derive(Debug)]
pub enum TransportEvent {
    /// A decrypted, validated RTP packet.
    Rtp(Vec<u8>),
    /// A decrypted, validated RTCP packet.
    Rtcp(Vec<u8>),
    DtlsConnected,
    DtlsDisconnected,
    DtlsFailed,
    /// DTLS application data; the media core itself has no use for it.
    DtlsApplicationData(BytesMut),
    /// The owner must close this TCP connection (evicted or transport
    /// closed).
    CloseTcpConnection(TcpConnectionId),
}

pub struct Transport {
    flags: TransportFlags,
    ice_server: Option<IceServer>,
    dtls_agent: Option<DtlsAgent>,
    srtp_recv_session: Option<SrtpSession>,
    srtp_send_session: Option<SrtpSession>,
    udp_sockets: Vec<UdpSocketId>,
    tcp_servers: Vec<TcpServerId>,
    sources: Vec<TransportSource>,
    sending_source: Option<TransportSource>,
    max_sources: usize,
    dtls_role: Option<DtlsRole>,
    is_ice_paired: bool,
    is_ice_paired_with_use_candidate: bool,
    transmits: VecDeque<Transmit>,
    events: VecDeque<TransportEvent>,
    closed: bool,
}

impl Transport {
    /// A transport with ICE, DTLS and SRTP enabled, as WebRTC requires.
    pub fn new_webrtc(materials: &'static DtlsMaterials) -> Transport {
        Transport::new(
            TransportFlags::ICE | TransportFlags::DTLS | TransportFlags::SRTP,
            Some(materials),
        )
    }

    pub fn new(flags: TransportFlags, materials: Option<&'static DtlsMaterials>) -> Transport {
        let ice_server = flags.contains(TransportFlags::ICE).then(|| {
            IceServer::new(ice::rand::generate_ufrag(), ice::rand::generate_pwd())
        });
        let dtls_agent = match (flags.contains(TransportFlags::DTLS), materials) {
            (true, Some(materials)) => Some(DtlsAgent::new(materials)),
            _ => None,
        };

        Transport {
            flags,
            ice_server,
            dtls_agent,
            srtp_recv_session: None,
            srtp_send_session: None,
            udp_sockets: Vec::new(),
            tcp_servers: Vec::new(),
            sources: Vec::new(),
            sending_source: None,
            max_sources: MAX_SOURCES,
            dtls_role: None,
            is_ice_paired: false,
            is_ice_paired_with_use_candidate: false,
            transmits: VecDeque::new(),
            events: VecDeque::new(),
            closed: false,
        }
    }

    /// Override the validated source bound (settings or tests).
    pub fn with_max_sources(mut self, max_sources: usize) -> Transport {
        self.max_sources = max_sources.max(1);
        self
    }

    /// Register a UDP socket whose traffic belongs to this transport.
    ///
    /// The worker owns the socket; registration is bookkeeping so the
    /// transport's listening paths can be enumerated and torn down with it.
    pub fn add_udp_socket(&mut self, socket: UdpSocketId) {
        if !self.udp_sockets.contains(&socket) {
            self.udp_sockets.push(socket);
        }
    }

    /// Register a TCP server whose connections belong to this transport.
    pub fn add_tcp_server(&mut self, server: TcpServerId) {
        if !self.tcp_servers.contains(&server) {
            self.tcp_servers.push(server);
        }
    }

    pub fn udp_sockets(&self) -> &[UdpSocketId] {
        &self.udp_sockets
    }

    pub fn tcp_servers(&self) -> &[TcpServerId] {
        &self.tcp_servers
    }

    pub fn ice_username_fragment(&self) -> Option<&str> {
        self.ice_server.as_ref().map(|ice| ice.username_fragment())
    }

    pub fn ice_password(&self) -> Option<&str> {
        self.ice_server.as_ref().map(|ice| ice.password())
    }

    pub fn sending_source(&self) -> Option<TransportSource> {
        self.sending_source
    }

    /// Whether some source passed an ICE check.
    pub fn is_ice_paired(&self) -> bool {
        self.is_ice_paired
    }

    /// Whether some source was nominated with USE-CANDIDATE.
    pub fn is_ice_paired_with_use_candidate(&self) -> bool {
        self.is_ice_paired_with_use_candidate
    }

    pub fn sources(&self) -> &[TransportSource] {
        &self.sources
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Configure which DTLS role we play; the agent starts as soon as a
    /// sending source exists as well.
    pub fn set_local_dtls_role(&mut self, role: DtlsRole, now: Instant) {
        if self.closed {
            return;
        }

        self.dtls_role = Some(role);
        self.run_dtls_agent_if_ready(now);
        self.assert_invariants();
    }

    /// Store the fingerprint the remote announced for its certificate.
    pub fn set_remote_dtls_fingerprint(&mut self, hash: FingerprintHash, fingerprint: &str) {
        if self.closed {
            return;
        }

        if let Some(dtls_agent) = self.dtls_agent.as_mut() {
            dtls_agent.set_remote_fingerprint(hash, fingerprint);
        }
        self.drain_dtls_agent();
        self.assert_invariants();
    }

    /// Process one packet received from the given source.
    ///
    /// This is the single demultiplex point: the packet is classified once
    /// and dispatched to ICE, DTLS or SRTP. `Err(ErrUnknownPacketKind)` is
    /// the caller's cue to close a TCP source; everything else that is
    /// malformed is logged and dropped here.
    pub fn handle_read(
        &mut self,
        source: TransportSource,
        data: &[u8],
        now: Instant,
    ) -> Result<()> {
        if self.closed {
            return Err(Error::ErrTransportClosed);
        }

        match PacketKind::classify(data) {
            PacketKind::Stun => self.on_stun_data_recv(source, data, now),
            PacketKind::Dtls => self.on_dtls_data_recv(source, data, now),
            PacketKind::Rtp => self.on_rtp_data_recv(source, data),
            PacketKind::Rtcp => self.on_rtcp_data_recv(source, data),
            PacketKind::Unknown => {
                debug!("received packet of unknown kind");
                return Err(Error::ErrUnknownPacketKind);
            }
        }

        self.assert_invariants();
        Ok(())
    }

    /// Encrypt and queue an RTP packet for the peer.
    pub fn send_rtp(&mut self, packet: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::ErrTransportClosed);
        }
        let Some(source) = self.sending_source else {
            debug!("cannot send RTP packet, no sending source");
            return Ok(());
        };

        let payload = if self.has_flag_srtp() {
            let Some(srtp_send_session) = self.srtp_send_session.as_mut() else {
                debug!("cannot send RTP packet, SRTP not ready");
                return Ok(());
            };
            let mut data = packet.to_vec();
            if !srtp_send_session.encrypt_rtp(&mut data) {
                warn!(
                    "RTP packet not sent: {}",
                    srtp_send_session.last_error_desc()
                );
                return Ok(());
            }
            BytesMut::from(&data[..])
        } else {
            BytesMut::from(packet)
        };

        self.transmits.push_back(Transmit { source, payload });
        Ok(())
    }

    /// Encrypt and queue an RTCP packet for the peer.
    pub fn send_rtcp(&mut self, packet: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::ErrTransportClosed);
        }
        let Some(source) = self.sending_source else {
            debug!("cannot send RTCP packet, no sending source");
            return Ok(());
        };

        let payload = if self.has_flag_srtp() {
            let Some(srtp_send_session) = self.srtp_send_session.as_mut() else {
                debug!("cannot send RTCP packet, SRTP not ready");
                return Ok(());
            };
            let mut data = packet.to_vec();
            if !srtp_send_session.encrypt_rtcp(&mut data) {
                warn!(
                    "RTCP packet not sent: {}",
                    srtp_send_session.last_error_desc()
                );
                return Ok(());
            }
            BytesMut::from(&data[..])
        } else {
            BytesMut::from(packet)
        };

        self.transmits.push_back(Transmit { source, payload });
        Ok(())
    }

    /// Whether media can flow in both directions.
    pub fn is_ready_for_media(&self) -> bool {
        if self.closed {
            return false;
        }
        if self.has_flag_dtls()
            && !self
                .dtls_agent
                .as_ref()
                .is_some_and(|dtls_agent| dtls_agent.is_connected())
        {
            return false;
        }
        if self.has_flag_srtp()
            && (self.srtp_recv_session.is_none() || self.srtp_send_session.is_none())
        {
            return false;
        }

        self.sending_source.is_some()
    }

    /// Drop all transport state gathered for the current peer while keeping
    /// the transport itself; it runs again on the next valid pair.
    pub fn reset(&mut self) {
        if self.closed {
            return;
        }

        if let Some(dtls_agent) = self.dtls_agent.as_mut() {
            // The close alert still travels through the sending source.
            dtls_agent.reset();
        }
        self.drain_dtls_agent();

        self.srtp_recv_session = None;
        self.srtp_send_session = None;
        self.clear_sources();
        self.assert_invariants();
    }

    /// Idempotent teardown: close alert, sources dropped, TCP closures
    /// requested. The transport accepts no traffic afterwards.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }

        if let Some(dtls_agent) = self.dtls_agent.as_mut() {
            dtls_agent.close();
        }
        self.drain_dtls_agent();

        self.srtp_recv_session = None;
        self.srtp_send_session = None;
        self.clear_sources();
        self.closed = true;
    }

    /// Remove a no-longer-usable source (closed TCP connection).
    ///
    /// If it was the sending source the next stored one takes over; when the
    /// list drains the ICE pairing state is gone too.
    pub fn remove_source(&mut self, source: &TransportSource) -> bool {
        let Some(index) = self.sources.iter().position(|stored| stored == source) else {
            return false;
        };

        let removed = self.sources.remove(index);
        if self.sending_source == Some(removed) {
            self.sending_source = self.sources.first().copied();

            if self.sending_source.is_none() && self.has_flag_ice() {
                // Only useful when every source was TCP.
                self.is_ice_paired = false;
                self.is_ice_paired_with_use_candidate = false;
            }
        }

        self.assert_invariants();
        true
    }

    /// Remove whatever source rode on a closed TCP connection.
    pub fn remove_tcp_connection(&mut self, connection: TcpConnectionId) -> bool {
        let Some(source) = self
            .sources
            .iter()
            .find(|source| source.is_tcp_connection(connection))
            .copied()
        else {
            return false;
        };

        self.remove_source(&source)
    }

    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.transmits.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.pop_front()
    }

    /// Deadline of the DTLS retransmission timer, if armed.
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.dtls_agent
            .as_ref()
            .and_then(|dtls_agent| dtls_agent.poll_timeout())
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        if self.closed {
            return;
        }

        if let Some(dtls_agent) = self.dtls_agent.as_mut() {
            dtls_agent.handle_timeout(now);
        }
        self.drain_dtls_agent();
        self.assert_invariants();
    }

    fn has_flag_ice(&self) -> bool {
        self.flags.contains(TransportFlags::ICE)
    }

    fn has_flag_dtls(&self) -> bool {
        self.flags.contains(TransportFlags::DTLS)
    }

    fn has_flag_srtp(&self) -> bool {
        self.flags.contains(TransportFlags::SRTP)
    }

    fn on_stun_data_recv(&mut self, source: TransportSource, data: &[u8], now: Instant) {
        if self.ice_server.is_none() {
            debug!("ignoring STUN data, ICE is disabled");
            return;
        }

        let mut msg = match StunMessage::parse(data) {
            Ok(msg) => msg,
            Err(err) => {
                debug!("ignoring invalid STUN message: {err}");
                return;
            }
        };

        let mut valid_pairs = Vec::new();
        if let Some(ice_server) = self.ice_server.as_mut() {
            if let Err(err) = ice_server.process_stun_message(&mut msg, source) {
                warn!("error processing STUN message: {err}");
            }
            while let Some(transmit) = ice_server.poll_transmit() {
                self.transmits.push_back(transmit);
            }
            while let Some(event) = ice_server.poll_event() {
                match event {
                    IceServerEvent::ValidPair {
                        source,
                        has_use_candidate,
                    } => valid_pairs.push((source, has_use_candidate)),
                }
            }
        }

        for (source, has_use_candidate) in valid_pairs {
            self.on_ice_valid_pair(source, has_use_candidate, now);
        }
    }

    fn on_dtls_data_recv(&mut self, source: TransportSource, data: &[u8], now: Instant) {
        if self.dtls_agent.is_none() {
            debug!("ignoring DTLS data, DTLS is disabled");
            return;
        }

        // Promotes the source to sending source when it is a valid one.
        if !self.promote_if_valid(&source) {
            debug!("ignoring DTLS data coming from an invalid source");
            return;
        }

        if let Some(dtls_agent) = self.dtls_agent.as_mut() {
            if !dtls_agent.is_running() {
                debug!("ignoring DTLS data while DTLS agent is not running");
                return;
            }
            if let Err(err) = dtls_agent.process_dtls_data(data, now) {
                warn!("error processing DTLS data: {err}");
            }
        }

        self.drain_dtls_agent();
    }

    fn on_rtp_data_recv(&mut self, _source: TransportSource, data: &[u8]) {
        let mut data = data.to_vec();

        if self.has_flag_srtp() {
            let Some(srtp_recv_session) = self.srtp_recv_session.as_mut() else {
                debug!("ignoring RTP packet, SRTP not ready");
                return;
            };
            if !srtp_recv_session.decrypt_srtp(&mut data) {
                debug!(
                    "RTP packet dropped: {}",
                    srtp_recv_session.last_error_desc()
                );
                return;
            }
        }

        if let Err(err) = RtpHeader::validate(&data) {
            debug!("invalid RTP packet dropped: {err}");
            return;
        }

        self.events.push_back(TransportEvent::Rtp(data));
    }

    fn on_rtcp_data_recv(&mut self, _source: TransportSource, data: &[u8]) {
        let mut data = data.to_vec();

        if self.has_flag_srtp() {
            let Some(srtp_recv_session) = self.srtp_recv_session.as_mut() else {
                debug!("ignoring RTCP packet, SRTP not ready");
                return;
            };
            if !srtp_recv_session.decrypt_srtcp(&mut data) {
                debug!(
                    "RTCP packet dropped: {}",
                    srtp_recv_session.last_error_desc()
                );
                return;
            }
        }

        if let Err(err) = RtcpHeader::validate(&data) {
            debug!("invalid RTCP packet dropped: {err}");
            return;
        }

        self.events.push_back(TransportEvent::Rtcp(data));
    }

    fn on_ice_valid_pair(
        &mut self,
        source: TransportSource,
        has_use_candidate: bool,
        now: Instant,
    ) {
        self.is_ice_paired = true;
        if has_use_candidate {
            self.is_ice_paired_with_use_candidate = true;
        }

        self.set_sending_source(source);
        self.run_dtls_agent_if_ready(now);
    }

    /// Store the source as a valid one and mark it as the sending source.
    ///
    /// Returns true if the source was not already stored. A full list
    /// evicts its oldest entry first.
    fn set_sending_source(&mut self, source: TransportSource) -> bool {
        // An already valid source only moves the sending pointer.
        if self.promote_if_valid(&source) {
            return false;
        }

        if self.sources.len() == self.max_sources {
            if let Some(evicted) = self.sources.pop() {
                debug!("evicting source {evicted:?}");
                self.request_tcp_close(&evicted);
            }
        }

        // Newest source first; it becomes the sending source.
        self.sources.insert(0, source);
        self.sending_source = Some(source);

        true
    }

    /// Whether the source is stored as a valid one. A hit also marks it as
    /// the sending source for outgoing data, so an answering peer keeps
    /// talking through the path it last used.
    fn promote_if_valid(&mut self, source: &TransportSource) -> bool {
        // No sending source means the list is empty.
        let Some(sending_source) = self.sending_source else {
            return false;
        };

        if sending_source == *source {
            return true;
        }

        if let Some(stored) = self.sources.iter().find(|stored| *stored == source) {
            self.sending_source = Some(*stored);
            return true;
        }

        false
    }

    fn run_dtls_agent_if_ready(&mut self, now: Instant) {
        let Some(role) = self.dtls_role else {
            return;
        };
        if self.sending_source.is_none() {
            return;
        }

        if let Some(dtls_agent) = self.dtls_agent.as_mut() {
            if !dtls_agent.is_running() {
                debug!("running DTLS agent as {role:?}");
                if let Err(err) = dtls_agent.run(role, now) {
                    warn!("cannot run DTLS agent: {err}");
                }
            }
        }

        self.drain_dtls_agent();
    }

    /// Forward agent transmits to the sending source and map its events.
    fn drain_dtls_agent(&mut self) {
        let has_srtp = self.has_flag_srtp();
        let Some(dtls_agent) = self.dtls_agent.as_mut() else {
            return;
        };

        while let Some(payload) = dtls_agent.poll_transmit() {
            match self.sending_source {
                Some(source) => self.transmits.push_back(Transmit { source, payload }),
                None => debug!("no sending source for outgoing DTLS data"),
            }
        }

        while let Some(event) = dtls_agent.poll_event() {
            match event {
                DtlsEvent::Connected => {
                    self.events.push_back(TransportEvent::DtlsConnected);
                }
                DtlsEvent::SrtpKeyMaterial {
                    profile,
                    local_key,
                    remote_key,
                } => {
                    if !has_srtp {
                        continue;
                    }

                    // Outbound protects with our keys, inbound expects the
                    // peer's.
                    match SrtpSession::new(SessionType::Outbound, profile, &local_key) {
                        Ok(session) => self.srtp_send_session = Some(session),
                        Err(err) => {
                            warn!("error creating SRTP sending session: {err}");
                        }
                    }
                    match SrtpSession::new(SessionType::Inbound, profile, &remote_key) {
                        Ok(session) => self.srtp_recv_session = Some(session),
                        Err(err) => {
                            warn!("error creating SRTP receiving session: {err}");
                            self.srtp_send_session = None;
                        }
                    }
                }
                DtlsEvent::ApplicationData(data) => {
                    self.events
                        .push_back(TransportEvent::DtlsApplicationData(data));
                }
                DtlsEvent::Disconnected => {
                    self.srtp_recv_session = None;
                    self.srtp_send_session = None;
                    self.events.push_back(TransportEvent::DtlsDisconnected);
                }
                DtlsEvent::Failed => {
                    self.srtp_recv_session = None;
                    self.srtp_send_session = None;
                    self.events.push_back(TransportEvent::DtlsFailed);
                }
            }
        }
    }

    fn clear_sources(&mut self) {
        for source in std::mem::take(&mut self.sources) {
            self.request_tcp_close(&source);
        }
        self.sending_source = None;
        self.is_ice_paired = false;
        self.is_ice_paired_with_use_candidate = false;
    }

    fn request_tcp_close(&mut self, source: &TransportSource) {
        if let TransportSource::Tcp { connection, .. } = source {
            self.events
                .push_back(TransportEvent::CloseTcpConnection(*connection));
        }
    }

    /// State invariants kept on every transition.
    fn assert_invariants(&self) {
        if let Some(sending_source) = self.sending_source {
            debug_assert!(self.sources.contains(&sending_source));
        }
        debug_assert!(self.sending_source.is_some() || self.sources.is_empty());
        debug_assert!(self.sources.len() <= self.max_sources);
        debug_assert_eq!(
            self.srtp_send_session.is_some(),
            self.srtp_recv_session.is_some()
        );
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("flags", &self.flags)
            .field("sources", &self.sources)
            .field("sending_source", &self.sending_source)
            .field("is_ice_paired", &self.is_ice_paired)
            .field(
                "is_ice_paired_with_use_candidate",
                &self.is_ice_paired_with_use_candidate,
            )
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
