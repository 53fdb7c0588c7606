use shared::util::generate_crypto_random_string;

const RUNES_ALPHA_NUMBER: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

const LEN_UFRAG: usize = 16;
const LEN_PWD: usize = 32;

/// Generates an ICE username fragment from the OS CSPRNG.
pub fn generate_ufrag() -> String {
    generate_crypto_random_string(LEN_UFRAG, RUNES_ALPHA_NUMBER)
}

/// Generates an ICE password from the OS CSPRNG.
pub fn generate_pwd() -> String {
    generate_crypto_random_string(LEN_PWD, RUNES_ALPHA_NUMBER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_lengths() {
        assert_eq!(generate_ufrag().len(), 16);
        assert_eq!(generate_pwd().len(), 32);
    }

    #[test]
    fn test_credentials_do_not_collide() {
        assert_ne!(generate_ufrag(), generate_ufrag());
        assert_ne!(generate_pwd(), generate_pwd());
    }
}
