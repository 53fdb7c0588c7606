use rand::{rng, Rng};

const RUNES_ALPHA_NUMBER: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generates a random string of the requested length from the given alphabet.
///
/// The generator is the OS-seeded thread RNG, so the output is suitable for
/// credentials such as ICE username fragments and passwords.
pub fn generate_crypto_random_string(n: usize, runes: &[u8]) -> String {
    let mut rng = rng();

    (0..n)
        .map(|_| {
            let idx = rng.random_range(0..runes.len());
            runes[idx] as char
        })
        .collect()
}

/// Random alphanumeric string of the requested length.
pub fn crypto_rand_alpha_number(n: usize) -> String {
    generate_crypto_random_string(n, RUNES_ALPHA_NUMBER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_strings_have_requested_length() {
        for n in [0, 1, 16, 32] {
            assert_eq!(crypto_rand_alpha_number(n).len(), n);
        }
    }

    #[test]
    fn test_generated_strings_do_not_collide() {
        let mut seen = HashSet::new();
        for _ in 0..100 {
            assert!(seen.insert(crypto_rand_alpha_number(32)));
        }
    }
}
