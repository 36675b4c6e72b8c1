//! Password hashing with bcrypt.

use std::sync::{Arc, OnceLock};

use bcrypt::{DEFAULT_COST, hash, verify};

/// Plaintext behind the digest checked for unknown usernames.
const DUMMY_PASSWORD: &str = "gatehouse-unknown-user";

/// Hashes and verifies passwords. Clones share the dummy digest.
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    cost: u32,
    /// Digest at `cost`, built on first use.
    dummy_digest: Arc<OnceLock<String>>,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::with_cost(DEFAULT_COST)
    }
}

impl PasswordHasher {
    /// Use a specific bcrypt cost (4..=31). Tests use the minimum.
    pub fn with_cost(cost: u32) -> Self {
        Self {
            cost,
            dummy_digest: Arc::new(OnceLock::new()),
        }
    }

    pub fn hash(&self, plain: &str) -> Result<String, bcrypt::BcryptError> {
        hash(plain, self.cost)
    }

    /// Verify `plain` against a stored digest. A malformed digest never matches.
    pub fn verify(&self, plain: &str, digest: &str) -> bool {
        match verify(plain, digest) {
            Ok(matches) => matches,
            Err(e) => {
                tracing::warn!(error = %e, "Stored password digest could not be parsed");
                false
            }
        }
    }

    /// Spend the same work as a real verification against a digest of the
    /// configured cost. Called when no stored digest exists for a username.
    pub fn verify_dummy(&self, plain: &str) {
        let digest = self
            .dummy_digest
            .get_or_init(|| hash(DUMMY_PASSWORD, self.cost).unwrap_or_default());
        // The result is discarded; an unbuildable digest fails fast.
        let _ = verify(plain, digest);
    }

    #[cfg(test)]
    pub(crate) fn dummy_digest(&self) -> Option<&str> {
        self.dummy_digest.get().map(String::as_str)
    }

    /// [`PasswordHasher::hash`] on the blocking pool.
    pub async fn hash_blocking(&self, plain: &str) -> Result<String, bcrypt::BcryptError> {
        let hasher = self.clone();
        let plain = plain.to_string();
        match tokio::task::spawn_blocking(move || hasher.hash(&plain)).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "Password hashing task failed");
                Err(bcrypt::BcryptError::InvalidHash("hashing task failed".to_string()))
            }
        }
    }

    /// [`PasswordHasher::verify`] on the blocking pool.
    pub async fn verify_blocking(&self, plain: &str, digest: &str) -> bool {
        let hasher = self.clone();
        let plain = plain.to_string();
        let digest = digest.to_string();
        match tokio::task::spawn_blocking(move || hasher.verify(&plain, &digest)).await {
            Ok(matches) => matches,
            Err(e) => {
                tracing::error!(error = %e, "Password verification task failed");
                false
            }
        }
    }

    /// [`PasswordHasher::verify_dummy`] on the blocking pool.
    pub async fn verify_dummy_blocking(&self, plain: &str) {
        let hasher = self.clone();
        let plain = plain.to_string();
        if let Err(e) = tokio::task::spawn_blocking(move || hasher.verify_dummy(&plain)).await {
            tracing::error!(error = %e, "Password verification task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hasher = PasswordHasher::with_cost(4);
        let digest = hasher.hash("correct horse").unwrap();

        assert_ne!(digest, "correct horse");
        assert!(hasher.verify("correct horse", &digest));
        assert!(!hasher.verify("battery staple", &digest));
    }

    #[tokio::test]
    async fn test_blocking_variants_agree() {
        let hasher = PasswordHasher::with_cost(4);
        let digest = hasher.hash_blocking("Secret123").await.unwrap();
        assert!(hasher.verify_blocking("Secret123", &digest).await);
        assert!(!hasher.verify_blocking("Secret124", &digest).await);
    }

    #[test]
    fn test_dummy_digest_is_shared_and_uses_configured_cost() {
        let hasher = PasswordHasher::with_cost(5);
        let clone = hasher.clone();
        assert!(hasher.dummy_digest().is_none());

        clone.verify_dummy("whatever");

        let digest = hasher.dummy_digest().unwrap();
        assert!(digest.starts_with("$2b$05$"));
        assert!(hasher.verify(DUMMY_PASSWORD, digest));
    }

    #[test]
    fn test_malformed_digest_never_matches() {
        let hasher = PasswordHasher::with_cost(4);
        assert!(!hasher.verify("anything", "not-a-bcrypt-digest"));
    }
}
