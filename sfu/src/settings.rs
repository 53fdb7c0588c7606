//! Worker settings consumed by the transport core.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use dtls::DtlsSettings;
use shared::error::{Error, Result};

/// Settings of one worker process.
///
/// Parsed from the worker's configuration; everything has a usable default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// IP the RTC UDP sockets and TCP servers bind on.
    pub listen_ip: IpAddr,
    /// Lowest RTC port (inclusive).
    pub rtc_min_port: u16,
    /// Highest RTC port (inclusive).
    pub rtc_max_port: u16,
    /// PEM certificate for DTLS; generated at startup when unset.
    pub dtls_certificate_file: Option<PathBuf>,
    /// PEM private key matching `dtls_certificate_file`.
    pub dtls_private_key_file: Option<PathBuf>,
    /// Accepted connections per TCP server.
    pub max_tcp_connections: usize,
    /// Validated sources kept per transport.
    pub max_sources: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            rtc_min_port: 10000,
            rtc_max_port: 59999,
            dtls_certificate_file: None,
            dtls_private_key_file: None,
            max_tcp_connections: 10,
            max_sources: 8,
        }
    }
}

impl Settings {
    /// Fail worker startup on unusable values.
    pub fn validate(&self) -> Result<()> {
        if self.rtc_max_port < self.rtc_min_port {
            return Err(Error::ErrEndPortLessThanStart);
        }
        if self.max_sources == 0 {
            return Err(Error::Other("max_sources must be positive".to_string()));
        }
        if self.dtls_certificate_file.is_some() != self.dtls_private_key_file.is_some() {
            return Err(Error::Other(
                "DTLS certificate and private key files must be given together".to_string(),
            ));
        }

        Ok(())
    }

    /// The DTLS materials portion of the settings.
    pub fn dtls_settings(&self) -> DtlsSettings {
        DtlsSettings {
            certificate_file: self.dtls_certificate_file.clone(),
            private_key_file: self.dtls_private_key_file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn test_inverted_port_range_is_rejected() {
        let settings = Settings {
            rtc_min_port: 2000,
            rtc_max_port: 1000,
            ..Default::default()
        };
        assert_eq!(settings.validate(), Err(Error::ErrEndPortLessThanStart));
    }

    #[test]
    fn test_pem_paths_must_come_together() {
        let settings = Settings {
            dtls_certificate_file: Some(PathBuf::from("/tmp/cert.pem")),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
