//! MESSAGE-INTEGRITY attribute support (HMAC-SHA1, RFC 5389 §15.4).

use ring::hmac;

/// Size of the MESSAGE-INTEGRITY attribute value.
pub const MESSAGE_INTEGRITY_SIZE: usize = 20;

/// Computes the HMAC-SHA1 tag over the message prefix with the given key.
pub fn message_integrity(key: &[u8], prefix: &[u8]) -> [u8; MESSAGE_INTEGRITY_SIZE] {
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, key);
    let tag = hmac::sign(&key, prefix);

    let mut out = [0u8; MESSAGE_INTEGRITY_SIZE];
    out.copy_from_slice(tag.as_ref());
    out
}

/// Constant-time comparison of a received tag against the expected one.
pub fn verify_integrity(key: &[u8], prefix: &[u8], tag: &[u8]) -> bool {
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, key);
    hmac::verify(&key, prefix, tag).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let tag = message_integrity(b"VOkJxbRl1RmTxUk/WvJxBt", b"some stun prefix");
        assert!(verify_integrity(
            b"VOkJxbRl1RmTxUk/WvJxBt",
            b"some stun prefix",
            &tag
        ));
        assert!(!verify_integrity(b"wrong password", b"some stun prefix", &tag));

        let mut tampered = tag;
        tampered[0] ^= 0xFF;
        assert!(!verify_integrity(
            b"VOkJxbRl1RmTxUk/WvJxBt",
            b"some stun prefix",
            &tampered
        ));
    }
}
