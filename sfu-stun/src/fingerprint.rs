//! FINGERPRINT attribute support.
//!
//! The FINGERPRINT value is the CRC-32 of the message up to (but excluding)
//! the FINGERPRINT attribute, XORed with 0x5354554E ("STUN").

use crc::{Crc, CRC_32_ISO_HDLC};

pub const FINGERPRINT_XOR_VALUE: u32 = 0x5354_554E;

/// Size of the FINGERPRINT attribute value.
pub const FINGERPRINT_SIZE: usize = 4;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Computes the FINGERPRINT value over the serialized message prefix.
pub fn fingerprint_value(prefix: &[u8]) -> u32 {
    CRC32.checksum(prefix) ^ FINGERPRINT_XOR_VALUE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_crc32_xor_stun() {
        let data = b"0123456789abcdef";
        let plain = CRC32.checksum(data);
        assert_eq!(fingerprint_value(data), plain ^ FINGERPRINT_XOR_VALUE);
        assert_ne!(fingerprint_value(data), plain);
    }
}
