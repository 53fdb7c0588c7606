//! Keyed SRTP/SRTCP sessions.
//!
//! One transport owns two sessions: an inbound one keyed with the remote
//! master (decrypting remote→local traffic) and an outbound one keyed with
//! the local master (encrypting local→remote traffic). Streams are matched
//! by wildcard, so any SSRC the peer sends (or we send) is accepted.
//!
//! Packets are transformed in place on a caller-owned buffer; the buffer's
//! spare capacity absorbs the authentication-tag growth.

use shared::error::{Error, Result};
use shared::SrtpProfile;

/// Master key length of both supported profiles (16-byte key, 14-byte salt).
pub const SRTP_MASTER_KEY_LENGTH: usize = 30;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionType {
    /// Decrypts traffic received from the peer.
    Inbound,
    /// Encrypts traffic sent to the peer.
    Outbound,
}

pub struct SrtpSession {
    session: srtp::Session,
    last_error: Option<srtp::Error>,
}

impl SrtpSession {
    /// Create a session for the given direction, profile and 30-byte master.
    pub fn new(session_type: SessionType, profile: SrtpProfile, key: &[u8]) -> Result<SrtpSession> {
        if key.len() != SRTP_MASTER_KEY_LENGTH {
            return Err(Error::ErrInvalidSrtpKeyLength);
        }

        // RTP and RTCP share the profile; the RTCP auth tag follows it.
        let policy = match profile {
            SrtpProfile::AesCm128HmacSha1_80 => srtp::CryptoPolicy::aes_cm_128_hmac_sha1_80(),
            SrtpProfile::AesCm128HmacSha1_32 => srtp::CryptoPolicy::aes_cm_128_hmac_sha1_32(),
        };

        let template = srtp::StreamPolicy {
            rtp: policy,
            rtcp: policy,
            key,
            ..Default::default()
        };

        let session = match session_type {
            SessionType::Inbound => srtp::Session::with_inbound_template(template),
            SessionType::Outbound => srtp::Session::with_outbound_template(template),
        }
        .map_err(|err| Error::OtherSrtpErr(err.to_string()))?;

        Ok(SrtpSession {
            session,
            last_error: None,
        })
    }

    /// Encrypt an RTP packet in place, growing it by the auth tag.
    pub fn encrypt_rtp(&mut self, data: &mut Vec<u8>) -> bool {
        match self.session.protect(data) {
            Ok(()) => true,
            Err(err) => {
                self.last_error = Some(err);
                false
            }
        }
    }

    /// Verify, decrypt and strip the tag of an SRTP packet in place.
    ///
    /// Returns false on replay, authentication failure or unknown SSRC.
    pub fn decrypt_srtp(&mut self, data: &mut Vec<u8>) -> bool {
        match self.session.unprotect(data) {
            Ok(()) => true,
            Err(err) => {
                self.last_error = Some(err);
                false
            }
        }
    }

    /// Encrypt an RTCP packet in place, growing it by the SRTCP trailer.
    pub fn encrypt_rtcp(&mut self, data: &mut Vec<u8>) -> bool {
        match self.session.protect_rtcp(data) {
            Ok(()) => true,
            Err(err) => {
                self.last_error = Some(err);
                false
            }
        }
    }

    /// Verify, decrypt and strip the trailer of an SRTCP packet in place.
    pub fn decrypt_srtcp(&mut self, data: &mut Vec<u8>) -> bool {
        match self.session.unprotect_rtcp(data) {
            Ok(()) => true,
            Err(err) => {
                self.last_error = Some(err);
                false
            }
        }
    }

    /// Description of the last operation error, cleared on read.
    pub fn last_error_desc(&mut self) -> String {
        match self.last_error.take() {
            Some(err) => err.to_string(),
            None => String::from("no error"),
        }
    }
}

impl std::fmt::Debug for SrtpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrtpSession")
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod session_test;
