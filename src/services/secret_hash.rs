//! Memory-hard secret hashing: Argon2id PHC strings.
//!
//! Used for both the passphrase gate on encrypted objects and deletion
//! tokens. Hashing and verification run on the blocking pool so they never
//! stall the request executor.

use crate::services::crypto::CryptoError;
use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{
        self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng,
    },
};

/// Argon2id cost parameters for newly created hashes.
///
/// Verification always uses the parameters embedded in the stored PHC
/// string, so changing these never invalidates existing hashes.
#[derive(Debug, Clone)]
pub struct HashParams {
    /// Memory cost in KiB
    pub mem_cost_kib: u32,
    /// Iterations
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for HashParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: Params::DEFAULT_M_COST,
            time_cost: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

impl HashParams {
    /// Cheap parameters for tests.
    #[cfg(test)]
    pub fn fast() -> Self {
        Self {
            mem_cost_kib: 64,
            time_cost: 1,
            parallelism: 1,
        }
    }
}

#[derive(Clone)]
pub struct SecretHasher {
    params: Params,
}

impl SecretHasher {
    pub fn new(params: &HashParams) -> Result<Self, CryptoError> {
        let params = Params::new(
            params.mem_cost_kib,
            params.time_cost,
            params.parallelism,
            None,
        )
        .map_err(|e| CryptoError::Hash(format!("invalid Argon2id params: {e}")))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Salted Argon2id hash of `secret` as a PHC string.
    pub fn hash_blocking(&self, secret: &str) -> Result<String, CryptoError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2()
            .hash_password(secret.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| CryptoError::Hash(e.to_string()))
    }

    /// Constant-time check of `secret` against a stored PHC string.
    ///
    /// A malformed stored hash is an error, not a mismatch.
    pub fn verify_blocking(&self, secret: &str, stored: &str) -> Result<bool, CryptoError> {
        let parsed = PasswordHash::new(stored).map_err(|e| CryptoError::Hash(e.to_string()))?;
        match self.argon2().verify_password(secret.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(CryptoError::Hash(e.to_string())),
        }
    }

    pub async fn hash(&self, secret: String) -> Result<String, CryptoError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash_blocking(&secret))
            .await
            .map_err(|e| CryptoError::Worker(e.to_string()))?
    }

    pub async fn verify(&self, secret: String, stored: String) -> Result<bool, CryptoError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify_blocking(&secret, &stored))
            .await
            .map_err(|e| CryptoError::Worker(e.to_string()))?
    }
}
