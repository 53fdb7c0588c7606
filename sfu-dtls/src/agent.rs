//! Sans-io DTLS agent.
//!
//! The agent drives one DTLS session over in-memory I/O:
//!
//! ```text
//! NEW -run()-> RUNNING -...-> HANDSHAKE_DONE -fingerprint ok-> CONNECTED
//!   ^                                        -mismatch/fatal-> (failed)
//!   +------------------------- reset() ------------------------------+
//! ```
//!
//! Inbound records go in through [`DtlsAgent::process_dtls_data`]; everything
//! the session wants to send is queued and drained with
//! [`DtlsAgent::poll_transmit`] before the call returns. Handshake
//! completion, SRTP keying material, application data and failures surface
//! as [`DtlsEvent`]s. Retransmissions are scheduled through
//! [`DtlsAgent::poll_timeout`] / [`DtlsAgent::handle_timeout`] with the
//! deadline the session itself reports.
//!
//! Every entry point takes `&mut self`, so a caller can never reenter the
//! agent from one of its own events; failure paths mark the agent
//! reset-pending and the reset is applied before the entry point returns.

use bytes::BytesMut;
use openssl::ssl::{ErrorCode, Ssl, SslStream};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::bio::NetworkBio;
use crate::ffi;
use crate::materials::{hex_fingerprint, ssl_error, DtlsMaterials, FingerprintHash};
use log::{debug, error, warn};
use shared::error::{Error, Result};
use shared::SrtpProfile;

const SSL_READ_BUFFER_SIZE: usize = 65536;

const SRTP_MASTER_KEY_LENGTH: usize = 16;
const SRTP_MASTER_SALT_LENGTH: usize = 14;
const SRTP_MASTER_LENGTH: usize = SRTP_MASTER_KEY_LENGTH + SRTP_MASTER_SALT_LENGTH;

/// Sessions asking for retransmission this far away are considered broken.
const MAX_DTLS_TIMEOUT: Duration = Duration::from_secs(30);

/// Datagrams are produced for a path MTU we never probe.
const DTLS_MTU: u32 = 1350;

thread_local! {
    static SSL_READ_BUFFER: RefCell<Vec<u8>> = RefCell::new(vec![0u8; SSL_READ_BUFFER_SIZE]);
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DtlsRole {
    Client,
    Server,
}

/// Events emitted by the agent, drained in emission order.
#[derive(Debug)]
pub enum DtlsEvent {
    /// Handshake finished and the remote fingerprint matched.
    Connected,
    /// Keying material exported right after `Connected`.
    SrtpKeyMaterial {
        profile: SrtpProfile,
        /// 30-byte local master (16-byte key followed by 14-byte salt).
        local_key: Vec<u8>,
        /// 30-byte remote master (16-byte key followed by 14-byte salt).
        remote_key: Vec<u8>,
    },
    /// Application data received after `Connected`.
    ApplicationData(BytesMut),
    /// The peer closed or broke an established session.
    Disconnected,
    /// The session failed before being established.
    Failed,
}

pub struct DtlsAgent {
    materials: &'static DtlsMaterials,
    stream: Option<SslStream<NetworkBio>>,
    role: Option<DtlsRole>,
    running: bool,
    handshake_done: bool,
    connected: bool,
    remote_fingerprint: Option<(FingerprintHash, String)>,
    transmits: VecDeque<BytesMut>,
    events: VecDeque<DtlsEvent>,
    timeout: Option<Instant>,
    reset_pending: bool,
}

impl DtlsAgent {
    pub fn new(materials: &'static DtlsMaterials) -> Self {
        Self {
            materials,
            stream: None,
            role: None,
            running: false,
            handshake_done: false,
            connected: false,
            remote_fingerprint: None,
            transmits: VecDeque::new(),
            events: VecDeque::new(),
            timeout: None,
            reset_pending: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_handshake_done(&self) -> bool {
        self.handshake_done
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn role(&self) -> Option<DtlsRole> {
        self.role
    }

    /// Start the handshake in the given role.
    ///
    /// A client immediately queues its first flight; a server waits for the
    /// peer's ClientHello. Does nothing when already running.
    pub fn run(&mut self, role: DtlsRole, now: Instant) -> Result<()> {
        if self.running {
            return Ok(());
        }

        let mut ssl = Ssl::new(self.materials.ssl_context()).map_err(ssl_error)?;
        ssl.set_mtu(DTLS_MTU).map_err(ssl_error)?;
        match role {
            DtlsRole::Client => ssl.set_connect_state(),
            DtlsRole::Server => ssl.set_accept_state(),
        }

        self.stream = Some(SslStream::new(ssl, NetworkBio::default()).map_err(ssl_error)?);
        self.running = true;
        self.role = Some(role);

        self.drive(now);
        self.apply_pending_reset();

        Ok(())
    }

    /// Feed one inbound DTLS datagram into the session.
    pub fn process_dtls_data(&mut self, data: &[u8], now: Instant) -> Result<()> {
        if !self.running {
            error!("cannot process data while not running");
            return Err(Error::ErrDtlsNotRunning);
        }

        if let Some(stream) = self.stream.as_mut() {
            stream.get_mut().feed_incoming(data);
        }

        self.drive(now);
        self.apply_pending_reset();

        Ok(())
    }

    /// Store (uppercased) the fingerprint announced for the remote
    /// certificate. If the handshake already finished the validation runs
    /// right away.
    pub fn set_remote_fingerprint(&mut self, hash: FingerprintHash, fingerprint: &str) {
        self.remote_fingerprint = Some((hash, fingerprint.to_uppercase()));

        if self.handshake_done && !self.connected {
            debug!("handshake already done, processing it right now");
            self.process_handshake();
            self.apply_pending_reset();
        }
    }

    /// Send application data over the established session.
    pub fn send_application_data(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            error!("cannot send application data while DTLS is not connected");
            return Err(Error::ErrDtlsNotRunning);
        }
        if data.is_empty() {
            debug!("ignoring 0 length data");
            return Ok(());
        }

        if let Some(stream) = self.stream.as_mut() {
            match stream.ssl_write(data) {
                Ok(written) if written != data.len() => {
                    error!(
                        "ssl_write() wrote less ({written} bytes) than given data ({} bytes)",
                        data.len()
                    );
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("ssl_write() failed: {err}");
                    self.handle_failure();
                }
            }
        }

        self.drain_outgoing();
        self.apply_pending_reset();

        Ok(())
    }

    /// Deadline of the session's retransmission timer, if armed.
    pub fn poll_timeout(&self) -> Option<Instant> {
        if self.running {
            self.timeout
        } else {
            None
        }
    }

    /// Retransmit pending flights once the reported deadline expired.
    pub fn handle_timeout(&mut self, now: Instant) {
        if !self.running {
            return;
        }
        let Some(deadline) = self.timeout else {
            return;
        };
        if now < deadline {
            return;
        }

        self.timeout = None;
        if let Some(stream) = self.stream.as_ref() {
            let ret = ffi::dtls_handle_timeout(stream.ssl());
            if ret < 0 {
                debug!("DTLSv1_handle_timeout() returned {ret}");
            }
        }

        self.drain_outgoing();
        self.set_timeout(now);
        self.apply_pending_reset();
    }

    pub fn poll_transmit(&mut self) -> Option<BytesMut> {
        self.transmits.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<DtlsEvent> {
        self.events.pop_front()
    }

    /// Return the agent to NEW, telling the peer with a close alert first.
    ///
    /// The session is rebuilt from the shared context on the next `run()`.
    pub fn reset(&mut self) {
        if !self.running {
            return;
        }

        debug!("resetting DTLS status");

        if let Some(stream) = self.stream.as_mut() {
            let _ = stream.shutdown();
        }
        self.drain_outgoing();
        self.clear();
    }

    /// Idempotent teardown; sends a close alert when a session is running.
    pub fn close(&mut self) {
        if self.running {
            if let Some(stream) = self.stream.as_mut() {
                let _ = stream.shutdown();
            }
            self.drain_outgoing();
        }

        self.clear();
    }

    /// Step the session: handshake first, then pending application data.
    fn drive(&mut self, now: Instant) {
        if !self.handshake_done {
            let Some(stream) = self.stream.as_mut() else {
                return;
            };
            match stream.do_handshake() {
                Ok(()) => {
                    self.handshake_done = true;
                    // The handshake owns no retransmissions anymore.
                    self.timeout = None;
                    self.drain_outgoing();
                    self.process_handshake();
                }
                Err(err) => {
                    let code = err.code();
                    if code == ErrorCode::WANT_READ || code == ErrorCode::WANT_WRITE {
                        self.drain_outgoing();
                        self.set_timeout(now);
                    } else {
                        warn!("DTLS handshake error: {err}");
                        self.drain_outgoing();
                        self.handle_failure();
                    }
                    return;
                }
            }
        }

        if self.reset_pending {
            return;
        }

        // Read whatever the session has decoded: application data once
        // connected, close alerts and fatal errors at any point.
        loop {
            let read = SSL_READ_BUFFER.with(|buffer| {
                let mut buffer = buffer.borrow_mut();
                let Some(stream) = self.stream.as_mut() else {
                    return Ok(BytesMut::new());
                };
                stream
                    .ssl_read(&mut buffer[..])
                    .map(|n| BytesMut::from(&buffer[..n]))
            });

            match read {
                Ok(data) if data.is_empty() => break,
                Ok(data) => {
                    if !self.connected {
                        debug!("ignoring application data received while DTLS not fully connected");
                        continue;
                    }
                    self.events.push_back(DtlsEvent::ApplicationData(data));
                }
                Err(err) => {
                    let code = err.code();
                    if code == ErrorCode::ZERO_RETURN {
                        debug!("close alert received");
                        self.handle_failure();
                    } else if code != ErrorCode::WANT_READ && code != ErrorCode::WANT_WRITE {
                        warn!("SSL read error: {err}");
                        self.handle_failure();
                    }
                    break;
                }
            }
        }

        self.drain_outgoing();
        self.set_timeout(now);
    }

    /// Runs once the handshake is done: validate the remote fingerprint,
    /// flip to CONNECTED and export the SRTP keying material.
    fn process_handshake(&mut self) {
        debug_assert!(self.handshake_done);

        // Wait for the fingerprint if it was not announced yet; this runs
        // again when it is set.
        if self.remote_fingerprint.is_none() {
            debug!("remote fingerprint not yet set, waiting for it");
            return;
        }

        if let Err(err) = self.check_remote_fingerprint() {
            warn!("DTLS handshake failed: {err}");
            self.events.push_back(DtlsEvent::Failed);
            self.reset_pending = true;
            return;
        }

        self.connected = true;
        self.events.push_back(DtlsEvent::Connected);

        match self.extract_srtp_keys() {
            Ok(Some((profile, local_key, remote_key))) => {
                self.events.push_back(DtlsEvent::SrtpKeyMaterial {
                    profile,
                    local_key,
                    remote_key,
                });
            }
            Ok(None) => {
                debug!("SRTP profile not negotiated");
            }
            Err(err) => {
                error!("cannot extract SRTP keys: {err}");
                self.connected = false;
                self.events.push_back(DtlsEvent::Failed);
                self.reset_pending = true;
            }
        }
    }

    fn check_remote_fingerprint(&self) -> Result<()> {
        let Some((hash, expected)) = self.remote_fingerprint.as_ref() else {
            return Err(Error::ErrNoMatchingCertificateFingerprint);
        };
        let Some(stream) = self.stream.as_ref() else {
            return Err(Error::ErrDtlsNotRunning);
        };

        let certificate = stream
            .ssl()
            .peer_certificate()
            .ok_or(Error::ErrNoRemoteCertificate)?;
        let digest = certificate
            .digest(hash.message_digest())
            .map_err(ssl_error)?;
        let actual = hex_fingerprint(&digest);

        if actual != *expected {
            debug!(
                "fingerprint in the remote certificate ({actual}) does not match the announced one ({expected})"
            );
            return Err(Error::ErrNoMatchingCertificateFingerprint);
        }

        debug!("valid remote {hash} fingerprint: {actual}");
        Ok(())
    }

    /// RFC 5764 exporter: 60 bytes laid out as client key, server key,
    /// client salt, server salt; which half is local depends on our role.
    fn extract_srtp_keys(&self) -> Result<Option<(SrtpProfile, Vec<u8>, Vec<u8>)>> {
        let Some(stream) = self.stream.as_ref() else {
            return Err(Error::ErrDtlsNotRunning);
        };
        let ssl = stream.ssl();

        let Some(selected) = ssl.selected_srtp_profile() else {
            return Ok(None);
        };
        let profile = SrtpProfile::from_extension_name(selected.name())
            .ok_or(Error::ErrSrtpProfileNotNegotiated)?;
        debug!("chosen SRTP profile: {profile}");

        let mut material = [0u8; SRTP_MASTER_LENGTH * 2];
        ssl.export_keying_material(&mut material, "EXTRACTOR-dtls_srtp", None)
            .map_err(ssl_error)?;

        let client_key = &material[..SRTP_MASTER_KEY_LENGTH];
        let server_key = &material[SRTP_MASTER_KEY_LENGTH..2 * SRTP_MASTER_KEY_LENGTH];
        let client_salt =
            &material[2 * SRTP_MASTER_KEY_LENGTH..2 * SRTP_MASTER_KEY_LENGTH + SRTP_MASTER_SALT_LENGTH];
        let server_salt = &material[2 * SRTP_MASTER_KEY_LENGTH + SRTP_MASTER_SALT_LENGTH..];

        let (local_key, local_salt, remote_key, remote_salt) = match self.role {
            Some(DtlsRole::Client) => (client_key, client_salt, server_key, server_salt),
            Some(DtlsRole::Server) => (server_key, server_salt, client_key, client_salt),
            None => return Err(Error::ErrInvalidDtlsRole),
        };

        let mut local = Vec::with_capacity(SRTP_MASTER_LENGTH);
        local.extend_from_slice(local_key);
        local.extend_from_slice(local_salt);

        let mut remote = Vec::with_capacity(SRTP_MASTER_LENGTH);
        remote.extend_from_slice(remote_key);
        remote.extend_from_slice(remote_salt);

        Ok(Some((profile, local, remote)))
    }

    /// Close alert, fatal alert or SSL/SYSCALL error: report Disconnected
    /// if the session was established, Failed otherwise, and flag a reset.
    fn handle_failure(&mut self) {
        let was_connected = self.connected;

        self.role = None;
        self.running = false;
        self.handshake_done = false;
        self.connected = false;

        if was_connected {
            debug!("DTLS connection disconnected");
            self.events.push_back(DtlsEvent::Disconnected);
        } else {
            debug!("DTLS connection failed");
            self.events.push_back(DtlsEvent::Failed);
        }

        self.reset_pending = true;
    }

    /// Re-arm the retransmission deadline from the session's own report.
    fn set_timeout(&mut self, now: Instant) {
        let Some(stream) = self.stream.as_ref() else {
            return;
        };

        match ffi::dtls_get_timeout(stream.ssl()) {
            None => {}
            Some(timeout) if timeout.is_zero() => {}
            Some(timeout) if timeout < MAX_DTLS_TIMEOUT => {
                debug!("DTLS timer set in {} ms", timeout.as_millis());
                self.timeout = Some(now + timeout);
            }
            Some(timeout) => {
                debug!(
                    "DTLS timeout too high ({} ms), resetting DTLS status",
                    timeout.as_millis()
                );
                self.reset_pending = true;
            }
        }
    }

    fn drain_outgoing(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            let outgoing = stream.get_mut().take_outgoing();
            if !outgoing.is_empty() {
                debug!("{} bytes of DTLS data ready to be sent to the peer", outgoing.len());
                self.transmits.push_back(outgoing);
            }
        }
    }

    fn apply_pending_reset(&mut self) {
        if !self.reset_pending {
            return;
        }
        self.reset_pending = false;

        if self.running {
            // Still running: a pathological timeout asked for the reset, so
            // say goodbye to the peer like an explicit reset() would.
            self.reset();
        } else {
            self.clear();
        }
    }

    fn clear(&mut self) {
        self.stream = None;
        self.role = None;
        self.running = false;
        self.handshake_done = false;
        self.connected = false;
        self.timeout = None;
        self.reset_pending = false;
    }
}
