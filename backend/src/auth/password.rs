use rand::RngCore;
use sha2::{Digest, Sha256};

/// Salted SHA-256 credential digests. The salt is stored next to the digest;
/// both are hex strings.

pub fn generate_salt() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn digest(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify(password: &str, salt: &str, expected_digest: &str) -> bool {
    let computed = digest(password, salt);
    // compare every byte regardless of where the first mismatch is
    computed.len() == expected_digest.len()
        && computed
            .bytes()
            .zip(expected_digest.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic_per_salt() {
        let salt = "0011223344556677";
        assert_eq!(digest("hunter22", salt), digest("hunter22", salt));
        assert_ne!(digest("hunter22", salt), digest("hunter22", "differentsalt"));
        assert_ne!(digest("hunter22", salt), digest("hunter23", salt));
    }

    #[test]
    fn verify_accepts_matching_and_rejects_wrong_passwords() {
        let salt = generate_salt();
        let stored = digest("correct horse", &salt);
        assert!(verify("correct horse", &salt, &stored));
        assert!(!verify("battery staple", &salt, &stored));
        assert!(!verify("correct horse", &salt, "deadbeef"));
    }

    #[test]
    fn salts_are_unique() {
        assert_ne!(generate_salt(), generate_salt());
        assert_eq!(generate_salt().len(), 32);
    }
}
