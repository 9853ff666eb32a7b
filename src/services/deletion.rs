//! Capability tokens that authorize destructive operations.
//!
//! A token is 64 random bytes, hex encoded (128 characters). Only its
//! Argon2id hash is ever persisted; the plaintext is handed to the uploader
//! once and forgotten.

use crate::services::{crypto::CryptoError, secret_hash::SecretHasher};
use rand::{RngCore, rngs::OsRng};

pub const TOKEN_BYTES: usize = 64;

/// A freshly minted token and the hash to persist for it.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub stored_hash: String,
}

#[derive(Clone)]
pub struct DeletionAuthority {
    hasher: SecretHasher,
}

impl DeletionAuthority {
    pub fn new(hasher: SecretHasher) -> Self {
        Self { hasher }
    }

    pub async fn issue(&self) -> Result<IssuedToken, CryptoError> {
        let mut raw = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut raw);
        let token = hex::encode(raw);
        let stored_hash = self.hasher.hash(token.clone()).await?;
        Ok(IssuedToken { token, stored_hash })
    }

    /// True only for the exact token that produced `stored_hash`.
    pub async fn verify(&self, candidate: &str, stored_hash: &str) -> Result<bool, CryptoError> {
        self.hasher
            .verify(candidate.to_string(), stored_hash.to_string())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::secret_hash::HashParams;

    fn authority() -> DeletionAuthority {
        DeletionAuthority::new(SecretHasher::new(&HashParams::fast()).unwrap())
    }

    #[tokio::test]
    async fn issued_token_is_128_hex_chars() {
        let issued = authority().issue().await.unwrap();
        assert_eq!(issued.token.len(), TOKEN_BYTES * 2);
        assert!(issued.token.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!issued.stored_hash.contains(&issued.token));
    }

    #[tokio::test]
    async fn verify_accepts_only_its_own_token() {
        let authority = authority();
        let a = authority.issue().await.unwrap();
        let b = authority.issue().await.unwrap();
        assert_ne!(a.token, b.token);

        assert!(authority.verify(&a.token, &a.stored_hash).await.unwrap());
        assert!(!authority.verify(&b.token, &a.stored_hash).await.unwrap());

        let mut flipped = a.token.clone();
        let last = if flipped.ends_with('0') { "1" } else { "0" };
        flipped.replace_range(flipped.len() - 1.., last);
        assert!(!authority.verify(&flipped, &a.stored_hash).await.unwrap());
    }
}
