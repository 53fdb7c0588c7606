//! First-byte demultiplexing of packets sharing one socket.
//!
//! STUN, DTLS, RTP and RTCP are multiplexed over the same UDP flow or framed
//! TCP stream. Classification follows RFC 7983 plus the RFC 5764 mux fixes:
//!
//! ```text
//!              +----------------+
//!              |        [0..19] +--> STUN (with magic cookie)
//!              |                |
//!  packet -->  |       [20..63] +--> DTLS
//!              |                |
//!              |     [128..191] +--> RTP / RTCP (by payload type)
//!              +----------------+
//! ```

/// Magic cookie every STUN message carries at bytes [4..8].
pub const STUN_MAGIC_COOKIE: [u8; 4] = [0x21, 0x12, 0xA4, 0x42];

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PacketKind {
    Stun,
    Dtls,
    Rtp,
    Rtcp,
    Unknown,
}

impl PacketKind {
    /// Classify a raw packet by its first byte and length.
    ///
    /// This is the single demultiplex point of the inbound path; it performs
    /// no allocation and inspects a constant number of bytes.
    pub fn classify(data: &[u8]) -> PacketKind {
        if is_stun(data) {
            PacketKind::Stun
        } else if is_dtls(data) {
            PacketKind::Dtls
        } else if is_rtcp(data) {
            PacketKind::Rtcp
        } else if is_rtp(data) {
            PacketKind::Rtp
        } else {
            PacketKind::Unknown
        }
    }
}

fn is_stun(data: &[u8]) -> bool {
    // STUN headers are 20 bytes and the magic cookie must match.
    data.len() >= 20 && data[0] < 20 && data[4..8] == STUN_MAGIC_COOKIE
}

fn is_dtls(data: &[u8]) -> bool {
    // Minimum DTLS record length is 13 bytes.
    data.len() >= 13 && data[0] > 19 && data[0] < 64
}

fn is_rtcp(data: &[u8]) -> bool {
    // RTCP packet types live in [192, 223].
    data.len() >= 4 && data[0] > 127 && data[0] < 192 && (192..=223).contains(&data[1])
}

fn is_rtp(data: &[u8]) -> bool {
    // Checked after RTCP, so a first byte in [128, 192) with a payload type
    // outside the RTCP range is RTP.
    data.len() >= 12 && data[0] > 127 && data[0] < 192
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stun_header() -> Vec<u8> {
        let mut data = vec![0u8; 20];
        data[0] = 0x00;
        data[1] = 0x01;
        data[4..8].copy_from_slice(&STUN_MAGIC_COOKIE);
        data
    }

    #[test]
    fn test_classify_stun() {
        assert_eq!(PacketKind::classify(&stun_header()), PacketKind::Stun);

        // Too short for a STUN header.
        assert_eq!(PacketKind::classify(&stun_header()[..19]), PacketKind::Unknown);

        // Wrong magic cookie.
        let mut data = stun_header();
        data[5] = 0x00;
        assert_eq!(PacketKind::classify(&data), PacketKind::Unknown);
    }

    #[test]
    fn test_classify_dtls() {
        let mut data = vec![0u8; 13];
        for first in 20u8..64 {
            data[0] = first;
            assert_eq!(PacketKind::classify(&data), PacketKind::Dtls);
        }

        data[0] = 22;
        assert_eq!(PacketKind::classify(&data[..12]), PacketKind::Unknown);
    }

    #[test]
    fn test_classify_rtp_rtcp() {
        let mut data = vec![0u8; 12];
        data[0] = 0x80;

        data[1] = 200; // sender report
        assert_eq!(PacketKind::classify(&data), PacketKind::Rtcp);

        data[1] = 96; // dynamic payload type
        assert_eq!(PacketKind::classify(&data), PacketKind::Rtp);

        // RTCP needs only 4 bytes, RTP needs a full 12 byte header.
        data[1] = 200;
        assert_eq!(PacketKind::classify(&data[..4]), PacketKind::Rtcp);
        data[1] = 96;
        assert_eq!(PacketKind::classify(&data[..4]), PacketKind::Unknown);
    }

    #[test]
    fn test_classify_is_total_and_disjoint() {
        // For every first byte, a 13+ byte packet lands in exactly one class.
        let mut data = vec![0u8; 20];
        for first in 0u8..=255 {
            data[0] = first;
            for pt in [0u8, 96, 200, 255] {
                data[1] = pt;
                let _ = PacketKind::classify(&data);
            }
        }
    }
}
