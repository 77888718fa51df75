/// Password hashing with Argon2id
use crate::error::{IdentityError, IdentityResult};
use argon2::{
    password_hash::{
        PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};
use rand_core::OsRng;
use std::sync::Arc;

/// One-way password hashing with constant-time verification
pub trait PasswordHasher: Send + Sync {
    /// Produce a PHC-formatted hash
    fn hash(&self, password: &str) -> IdentityResult<String>;

    /// Check a password against a stored hash; a malformed hash verifies as false
    fn verify(&self, password: &str, hash: &str) -> bool;
}

/// Argon2id hasher
#[derive(Debug, Clone)]
pub struct Argon2Hasher {
    params: Params,
}

impl Argon2Hasher {
    /// Production parameters: 19 MiB, 2 iterations, 1 lane
    pub fn new() -> Self {
        Self {
            params: Params::default(),
        }
    }

    /// Cheap parameters for tests
    pub fn fast() -> IdentityResult<Self> {
        let params = Params::new(Params::MIN_M_COST.max(8), 1, 1, None)
            .map_err(|e| IdentityError::Internal(format!("Invalid Argon2 params: {}", e)))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'_> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> IdentityResult<String> {
        let salt = SaltString::generate(&mut OsRng);

        Ok(self
            .argon2()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| IdentityError::Internal(format!("Password hashing failed: {}", e)))?
            .to_string())
    }

    fn verify(&self, password: &str, hash: &str) -> bool {
        let parsed = match PasswordHash::new(hash) {
            Ok(parsed) => parsed,
            Err(_) => return false,
        };

        // Parameters are read from the PHC string, so older hashes still verify
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}

/// Hash on the blocking pool so request tasks are not stalled
pub async fn hash_blocking(
    hasher: Arc<dyn PasswordHasher>,
    password: String,
) -> IdentityResult<String> {
    tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .map_err(|e| IdentityError::Internal(format!("Hashing task failed: {}", e)))?
}

/// Verify on the blocking pool
pub async fn verify_blocking(
    hasher: Arc<dyn PasswordHasher>,
    password: String,
    hash: String,
) -> IdentityResult<bool> {
    tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
        .await
        .map_err(|e| IdentityError::Internal(format!("Verification task failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hasher = Argon2Hasher::fast().unwrap();
        let hash = hasher.hash("correct horse").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("correct horse", &hash));
        assert!(!hasher.verify("battery staple", &hash));
    }

    #[test]
    fn test_same_password_different_salts() {
        let hasher = Argon2Hasher::fast().unwrap();
        let a = hasher.hash("password123").unwrap();
        let b = hasher.hash("password123").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_hash_does_not_verify() {
        let hasher = Argon2Hasher::fast().unwrap();
        assert!(!hasher.verify("anything", "not-a-phc-string"));
    }

    #[tokio::test]
    async fn test_blocking_helpers() {
        let hasher: Arc<dyn PasswordHasher> = Arc::new(Argon2Hasher::fast().unwrap());
        let hash = hash_blocking(hasher.clone(), "pw-123456".to_string())
            .await
            .unwrap();
        assert!(verify_blocking(hasher, "pw-123456".to_string(), hash)
            .await
            .unwrap());
    }
}
