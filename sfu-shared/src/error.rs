use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("buffer: full")]
    ErrBufferFull,
    #[error("packet too big")]
    ErrPacketTooBig,
    #[error("packet of unknown kind")]
    ErrUnknownPacketKind,

    //STUN codec
    #[error("not a STUN packet")]
    ErrNotStunPacket,
    #[error("STUN length field does not match total size or is not padded")]
    ErrStunLengthMismatch,
    #[error("STUN attribute length exceeds the remaining size")]
    ErrStunBadAttributeLength,
    #[error("attribute after FINGERPRINT is not allowed")]
    ErrStunAttributeAfterFingerprint,
    #[error("attribute after MESSAGE-INTEGRITY other than FINGERPRINT is not allowed")]
    ErrStunAttributeAfterIntegrity,
    #[error("computed FINGERPRINT value does not match the one in the message")]
    ErrStunFingerprintMismatch,
    #[error("USERNAME attribute too long")]
    ErrStunUsernameTooLong,
    #[error("cannot serialize a response for this STUN message class")]
    ErrStunInvalidResponseClass,

    //DTLS agent
    #[error("DTLS agent is not running")]
    ErrDtlsNotRunning,
    #[error("no valid DTLS role given")]
    ErrInvalidDtlsRole,
    #[error("peer didn't provide certificate via DTLS")]
    ErrNoRemoteCertificate,
    #[error("remote certificate does not match the announced fingerprint")]
    ErrNoMatchingCertificateFingerprint,
    #[error("unsupported fingerprint algorithm")]
    ErrUnsupportedFingerprintAlgorithm,
    #[error("SRTP profile not negotiated")]
    ErrSrtpProfileNotNegotiated,

    //SRTP session
    #[error("invalid SRTP master key length")]
    ErrInvalidSrtpKeyLength,

    //RTP/RTCP validation
    #[error("not long enough to be a RTP packet")]
    ErrRTPTooShort,
    #[error("not long enough to be a RTCP packet")]
    ErrRTCPTooShort,
    #[error("invalid RTP version")]
    ErrInvalidRTPVersion,
    #[error("invalid RTCP version")]
    ErrInvalidRTCPVersion,

    //Transport
    #[error("transport is closed")]
    ErrTransportClosed,
    #[error("no sending source available")]
    ErrNoSendingSource,

    //Sockets
    #[error("end port is less than the start")]
    ErrEndPortLessThanStart,
    #[error("port space exhausted")]
    ErrPortSpaceExhausted,
    #[error("listen queue exceeded")]
    ErrListenQueueExceeded,

    //Settings
    #[error("invalid listen IP")]
    ErrInvalidListenIp,

    //Third party error text
    #[error("dtls: {0}")]
    OtherDtlsErr(String),
    #[error("srtp: {0}")]
    OtherSrtpErr(String),
    #[error("{0}")]
    Io(#[source] IoError),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
#[error("io error: {0}")]
pub struct IoError(#[from] pub io::Error);

// Workaround for wanting PartialEq for io::Error.
impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(e))
    }
}
