//! Minimal RTP packet view.
//!
//! The transport treats media as opaque encrypted bytes until SRTP has
//! unprotected it; this parse validates what a decrypted packet must
//! structurally satisfy before it is surfaced, and locates the payload
//! behind CSRC list, header extension and padding.

use shared::error::{Error, Result};

pub const RTP_HEADER_LEN: usize = 12;

/// Fixed RTP header fields (RFC 3550 §5.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    pub fn parse(data: &[u8]) -> Result<RtpHeader> {
        if data.len() < RTP_HEADER_LEN {
            return Err(Error::ErrRTPTooShort);
        }

        let version = data[0] >> 6;
        if version != 2 {
            return Err(Error::ErrInvalidRTPVersion);
        }

        Ok(RtpHeader {
            version,
            padding: data[0] & 0x20 != 0,
            extension: data[0] & 0x10 != 0,
            csrc_count: data[0] & 0x0F,
            marker: data[1] & 0x80 != 0,
            payload_type: data[1] & 0x7F,
            sequence_number: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        })
    }

    /// Structural check applied to every packet before it is surfaced.
    pub fn validate(data: &[u8]) -> Result<()> {
        RtpPacket::parse(data).map(|_| ())
    }
}

/// A parsed view over one RTP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket<'a> {
    pub header: RtpHeader,
    /// Profile-defined id of the header extension, when present.
    pub extension_profile: Option<u16>,
    pub extension: &'a [u8],
    pub payload: &'a [u8],
}

impl<'a> RtpPacket<'a> {
    /// Parse the whole packet: fixed header, CSRC list, one optional
    /// header extension (RFC 3550 §5.3.1) and trailing padding.
    pub fn parse(data: &'a [u8]) -> Result<RtpPacket<'a>> {
        let header = RtpHeader::parse(data)?;

        let mut pos = RTP_HEADER_LEN + header.csrc_count as usize * 4;
        if data.len() < pos {
            return Err(Error::ErrRTPTooShort);
        }

        let mut extension_profile = None;
        let mut extension: &[u8] = &[];
        if header.extension {
            if data.len() < pos + 4 {
                return Err(Error::ErrRTPTooShort);
            }
            extension_profile = Some(u16::from_be_bytes([data[pos], data[pos + 1]]));
            let extension_words = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;

            let extension_end = pos + 4 + extension_words * 4;
            if data.len() < extension_end {
                return Err(Error::ErrRTPTooShort);
            }
            extension = &data[pos + 4..extension_end];
            pos = extension_end;
        }

        // The last octet of the padding counts the padding octets,
        // including itself.
        let mut end = data.len();
        if header.padding {
            let padding_len = data[data.len() - 1] as usize;
            if padding_len == 0 || pos + padding_len > data.len() {
                return Err(Error::ErrRTPTooShort);
            }
            end -= padding_len;
        }

        Ok(RtpPacket {
            header,
            extension_profile,
            extension,
            payload: &data[pos..end],
        })
    }
}
