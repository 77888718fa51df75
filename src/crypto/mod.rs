/// Cryptographic primitives for credentials and links
///
/// Password hashing, opaque-secret generation and hashing, and HMAC signing
/// for verification links. Randomness and time are injected so callers can
/// run deterministically under test.

pub mod password;
pub mod signing;

pub use password::{Argon2Hasher, PasswordHasher};
pub use signing::{sign, verify_signature};

use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const SECRET_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Source of random bytes
pub trait RandomSource: Send + Sync {
    fn fill_bytes(&self, dest: &mut [u8]);
}

/// Operating-system random source
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        rand::rngs::OsRng.fill_bytes(dest);
    }
}

/// Generate an alphanumeric secret of `length` characters
pub fn generate_secret(random: &dyn RandomSource, length: usize) -> String {
    let mut bytes = vec![0u8; length];
    random.fill_bytes(&mut bytes);

    // 62-symbol alphabet; the modulo bias is negligible at these lengths
    bytes
        .iter()
        .map(|b| SECRET_ALPHABET[*b as usize % SECRET_ALPHABET.len()] as char)
        .collect()
}

/// SHA-256 hex digest of a high-entropy secret, as stored at rest
pub fn hash_token(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Compare two byte strings without leaking the position of the first mismatch
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Check a presented secret against a stored hash
pub fn verify_token_hash(secret: &str, stored_hash: &str) -> bool {
    constant_time_eq(hash_token(secret).as_bytes(), stored_hash.as_bytes())
}

/// Hash binding a signed link to the account's current email
pub fn identifier_hash(identifier: &str) -> String {
    hash_token(&crate::validation::normalize_email(identifier))
}


#[cfg(test)]
mod tests {
    use super::testing::CountingRandom;
    use super::*;

    #[test]
    fn test_generate_secret_shape() {
        let secret = generate_secret(&OsRandom, 40);
        assert_eq!(secret.len(), 40);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_counting_random_differs_per_call() {
        let random = CountingRandom::default();
        let a = generate_secret(&random, 40);
        let b = generate_secret(&random, 40);
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_token_verification() {
        let hash = hash_token("s3cret");
        assert_eq!(hash.len(), 64);
        assert!(verify_token_hash("s3cret", &hash));
        assert!(!verify_token_hash("s3creT", &hash));
    }

    #[test]
    fn test_identifier_hash_normalizes_case() {
        assert_eq!(
            identifier_hash("Bob@Example.com"),
            identifier_hash("bob@example.com")
        );
        assert_ne!(
            identifier_hash("bob@example.com"),
            identifier_hash("alice@example.com")
        );
    }
}
