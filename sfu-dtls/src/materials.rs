//! Process-wide DTLS materials.
//!
//! The certificate, private key, shared `SSL_CTX` and the precomputed
//! certificate fingerprints are initialized once before any transport exists
//! and are read-only afterwards; every DTLS agent in the process borrows
//! them.

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::ssl::{
    SslContext, SslContextBuilder, SslMethod, SslOptions, SslSessionCacheMode, SslVerifyMode,
};
use openssl::x509::{X509Name, X509};
use rand::Rng;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;
use shared::error::{Error, Result};
use shared::SrtpProfile;

/// Name used as O and CN of the generated self-signed certificate.
pub const APP_NAME: &str = "sfu";

/// SRTP profiles offered through the "use_srtp" extension, preference first.
pub const SRTP_PROFILES: [SrtpProfile; 2] = [
    SrtpProfile::AesCm128HmacSha1_80,
    SrtpProfile::AesCm128HmacSha1_32,
];

const CERTIFICATE_VALIDITY_SECS: i64 = 60 * 60 * 24 * 365 * 10;

/// Hash function a certificate fingerprint was computed with.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FingerprintHash {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl FingerprintHash {
    pub const ALL: [FingerprintHash; 5] = [
        FingerprintHash::Sha1,
        FingerprintHash::Sha224,
        FingerprintHash::Sha256,
        FingerprintHash::Sha384,
        FingerprintHash::Sha512,
    ];

    /// Algorithm name as used in SDP "a=fingerprint" lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            FingerprintHash::Sha1 => "sha-1",
            FingerprintHash::Sha224 => "sha-224",
            FingerprintHash::Sha256 => "sha-256",
            FingerprintHash::Sha384 => "sha-384",
            FingerprintHash::Sha512 => "sha-512",
        }
    }

    pub(crate) fn message_digest(&self) -> MessageDigest {
        match self {
            FingerprintHash::Sha1 => MessageDigest::sha1(),
            FingerprintHash::Sha224 => MessageDigest::sha224(),
            FingerprintHash::Sha256 => MessageDigest::sha256(),
            FingerprintHash::Sha384 => MessageDigest::sha384(),
            FingerprintHash::Sha512 => MessageDigest::sha512(),
        }
    }
}

impl std::str::FromStr for FingerprintHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha-1" => Ok(FingerprintHash::Sha1),
            "sha-224" => Ok(FingerprintHash::Sha224),
            "sha-256" => Ok(FingerprintHash::Sha256),
            "sha-384" => Ok(FingerprintHash::Sha384),
            "sha-512" => Ok(FingerprintHash::Sha512),
            _ => Err(Error::ErrUnsupportedFingerprintAlgorithm),
        }
    }
}

impl std::fmt::Display for FingerprintHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the DTLS certificate comes from.
#[derive(Debug, Default, Clone)]
pub struct DtlsSettings {
    /// Path of a PEM certificate file; a certificate is generated when unset.
    pub certificate_file: Option<PathBuf>,
    /// Path of the matching PEM private key file.
    pub private_key_file: Option<PathBuf>,
}

pub struct DtlsMaterials {
    certificate: X509,
    private_key: PKey<Private>,
    ssl_context: SslContext,
    fingerprints: Vec<(FingerprintHash, String)>,
}

static MATERIALS: OnceLock<DtlsMaterials> = OnceLock::new();

impl DtlsMaterials {
    /// Initialize the process-wide materials.
    ///
    /// Must run once before any reactor starts; later calls return the
    /// already-initialized instance.
    pub fn init(settings: &DtlsSettings) -> Result<&'static DtlsMaterials> {
        if let Some(materials) = MATERIALS.get() {
            return Ok(materials);
        }

        let materials = DtlsMaterials::new(settings)?;
        Ok(MATERIALS.get_or_init(|| materials))
    }

    /// The initialized process-wide materials, if any.
    pub fn global() -> Option<&'static DtlsMaterials> {
        MATERIALS.get()
    }

    fn new(settings: &DtlsSettings) -> Result<DtlsMaterials> {
        let (certificate, private_key) =
            match (&settings.certificate_file, &settings.private_key_file) {
                (Some(certificate_file), Some(private_key_file)) => {
                    let certificate = X509::from_pem(&std::fs::read(certificate_file)?)
                        .map_err(ssl_error)?;
                    let private_key =
                        PKey::private_key_from_pem(&std::fs::read(private_key_file)?)
                            .map_err(ssl_error)?;
                    (certificate, private_key)
                }
                _ => generate_certificate().map_err(ssl_error)?,
            };

        let ssl_context =
            create_ssl_context(&certificate, &private_key).map_err(ssl_error)?;

        let mut fingerprints = Vec::with_capacity(FingerprintHash::ALL.len());
        for hash in FingerprintHash::ALL {
            let value = fingerprint_of(&certificate, hash)?;
            debug!("{hash} fingerprint: {value}");
            fingerprints.push((hash, value));
        }

        Ok(DtlsMaterials {
            certificate,
            private_key,
            ssl_context,
            fingerprints,
        })
    }

    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    pub fn private_key(&self) -> &PKey<Private> {
        &self.private_key
    }

    pub fn ssl_context(&self) -> &SslContext {
        &self.ssl_context
    }

    /// Precomputed local certificate fingerprint for the given hash.
    pub fn fingerprint(&self, hash: FingerprintHash) -> &str {
        &self
            .fingerprints
            .iter()
            .find(|(fingerprint_hash, _)| *fingerprint_hash == hash)
            .expect("all hashes are precomputed")
            .1
    }
}

/// Digest of a certificate as uppercase colon-separated hex.
pub(crate) fn fingerprint_of(
    certificate: &X509,
    hash: FingerprintHash,
) -> Result<String> {
    let digest = certificate
        .digest(hash.message_digest())
        .map_err(ssl_error)?;
    Ok(hex_fingerprint(&digest))
}

pub(crate) fn hex_fingerprint(digest: &[u8]) -> String {
    digest
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

pub(crate) fn ssl_error<E: std::fmt::Display>(err: E) -> Error {
    Error::OtherDtlsErr(err.to_string())
}

fn generate_certificate() -> std::result::Result<(X509, PKey<Private>), ErrorStack> {
    let rsa = Rsa::generate(1024)?;
    let private_key = PKey::from_rsa(rsa)?;

    let mut builder = X509::builder()?;
    // Version 3 (zero based).
    builder.set_version(2)?;

    // Random serial number to avoid the default of 0.
    let serial: u32 = rand::rng().random_range(1_000_000..10_000_000);
    let serial_number = BigNum::from_u32(serial)?.to_asn1_integer()?;
    builder.set_serial_number(&serial_number)?;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    let not_before = Asn1Time::from_unix(now - CERTIFICATE_VALIDITY_SECS)?;
    builder.set_not_before(&not_before)?;
    let not_after = Asn1Time::from_unix(now + CERTIFICATE_VALIDITY_SECS)?;
    builder.set_not_after(&not_after)?;

    builder.set_pubkey(&private_key)?;

    let mut name = X509Name::builder()?;
    name.append_entry_by_text("O", APP_NAME)?;
    name.append_entry_by_text("CN", APP_NAME)?;
    let name = name.build();
    builder.set_subject_name(&name)?;
    // Self signed, so the issuer is the subject.
    builder.set_issuer_name(&name)?;

    builder.sign(&private_key, MessageDigest::sha1())?;

    Ok((builder.build(), private_key))
}

fn create_ssl_context(
    certificate: &X509,
    private_key: &PKey<Private>,
) -> std::result::Result<SslContext, ErrorStack> {
    let mut builder: SslContextBuilder = SslContext::builder(SslMethod::dtls())?;

    builder.set_certificate(certificate)?;
    builder.set_private_key(private_key)?;
    builder.check_private_key()?;

    // The agent talks to the session through memory, so the MTU is set
    // explicitly on each SSL rather than queried from a socket.
    builder.set_options(
        SslOptions::CIPHER_SERVER_PREFERENCE | SslOptions::NO_TICKET | SslOptions::NO_QUERY_MTU,
    );
    builder.set_session_cache_mode(SslSessionCacheMode::OFF);
    builder.set_read_ahead(true);
    builder.set_verify_depth(4);

    // Require a certificate from the peer; it is validated against the
    // announced fingerprint instead of a CA chain.
    builder.set_verify_callback(
        SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT,
        |_preverify_ok, _ctx| true,
    );

    builder.set_cipher_list("ALL:!ADH:!LOW:!EXP:!MD5:!aNULL:!eNULL:@STRENGTH")?;

    let srtp_profiles = SRTP_PROFILES
        .iter()
        .map(|profile| profile.extension_name())
        .collect::<Vec<_>>()
        .join(":");
    debug!("setting SRTP profiles for DTLS: {srtp_profiles}");
    builder.set_tlsext_use_srtp(&srtp_profiles)?;

    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_materials() {
        let materials = DtlsMaterials::init(&DtlsSettings::default()).unwrap();

        // Five uppercase colon-separated fingerprints, one per hash.
        for (hash, digest_len) in [
            (FingerprintHash::Sha1, 20),
            (FingerprintHash::Sha224, 28),
            (FingerprintHash::Sha256, 32),
            (FingerprintHash::Sha384, 48),
            (FingerprintHash::Sha512, 64),
        ] {
            let fingerprint = materials.fingerprint(hash);
            assert_eq!(fingerprint.len(), digest_len * 3 - 1);
            assert!(fingerprint
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase() || c == ':'));
        }

        let subject = materials
            .certificate()
            .subject_name()
            .entries()
            .next()
            .is_some();
        assert!(subject);
    }

    #[test]
    fn test_fingerprint_hash_parsing() {
        assert_eq!(
            "sha-256".parse::<FingerprintHash>().unwrap(),
            FingerprintHash::Sha256
        );
        assert_eq!(
            "SHA-1".parse::<FingerprintHash>().unwrap(),
            FingerprintHash::Sha1
        );
        assert!("md5".parse::<FingerprintHash>().is_err());
    }

    #[test]
    fn test_hex_fingerprint_format() {
        assert_eq!(hex_fingerprint(&[0x0A, 0xFF, 0x00]), "0A:FF:00");
    }
}
