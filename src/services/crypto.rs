//! At-rest encryption for uploaded objects.
//!
//! The cipher key is SHA-256(passphrase) driving AES-256 in counter mode with
//! the counter block starting at big-endian 1. There is no nonce and no tag:
//! the same passphrase always yields the same keystream. Legacy objects used
//! the raw passphrase bytes as the AES key (16, 24 or 32 bytes).
//!
//! The Argon2id passphrase hash kept in the encryption record only gates
//! access at the HTTP layer. It is not bound to the cipher key, so anyone who
//! skips the gate and knows the passphrase can still decrypt.

use crate::services::{
    name_allocator::{URL_SAFE_ALPHABET, random_string},
    secret_hash::SecretHasher,
};
use aes::{Aes128, Aes192, Aes256};
use bytes::Bytes;
use ctr::cipher::{KeyIvInit, StreamCipher};
use sha2::{Digest, Sha256};
use thiserror::Error;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes192Ctr = ctr::Ctr128BE<Aes192>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Initial counter block.
const INITIAL_COUNTER: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];

/// Default length of a generated passphrase.
pub const DEFAULT_PASSPHRASE_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("legacy key must be 16, 24 or 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("hashing failed: {0}")]
    Hash(String),
    #[error("crypto worker failed: {0}")]
    Worker(String),
}

/// Cipher key for new objects.
pub fn derive_key(passphrase: &str) -> [u8; 32] {
    Sha256::digest(passphrase.as_bytes()).into()
}

/// A positioned AES-CTR keystream. Applying it to consecutive chunks is the
/// same as applying it to their concatenation.
pub enum Keystream {
    Aes128(Aes128Ctr),
    Aes192(Aes192Ctr),
    Aes256(Aes256Ctr),
}

impl Keystream {
    pub fn for_passphrase(passphrase: &str, legacy: bool) -> Result<Self, CryptoError> {
        if !legacy {
            let key = derive_key(passphrase);
            return Ok(Self::Aes256(Aes256Ctr::new(
                &key.into(),
                &INITIAL_COUNTER.into(),
            )));
        }

        let raw = passphrase.as_bytes();
        let invalid = |_| CryptoError::InvalidKeyLength(raw.len());
        match raw.len() {
            16 => Aes128Ctr::new_from_slices(raw, &INITIAL_COUNTER)
                .map(Self::Aes128)
                .map_err(invalid),
            24 => Aes192Ctr::new_from_slices(raw, &INITIAL_COUNTER)
                .map(Self::Aes192)
                .map_err(invalid),
            32 => Aes256Ctr::new_from_slices(raw, &INITIAL_COUNTER)
                .map(Self::Aes256)
                .map_err(invalid),
            n => Err(CryptoError::InvalidKeyLength(n)),
        }
    }

    pub fn apply(&mut self, buf: &mut [u8]) {
        match self {
            Self::Aes128(c) => c.apply_keystream(buf),
            Self::Aes192(c) => c.apply_keystream(buf),
            Self::Aes256(c) => c.apply_keystream(buf),
        }
    }
}

#[derive(Clone)]
pub struct CryptoEngine {
    hasher: SecretHasher,
}

impl CryptoEngine {
    pub fn new(hasher: SecretHasher) -> Self {
        Self { hasher }
    }

    pub fn generate_passphrase(length: usize) -> String {
        random_string(length, URL_SAFE_ALPHABET)
    }

    /// Encrypt with the digest-derived key. New objects are never legacy.
    pub fn encrypt(&self, plaintext: &[u8], passphrase: &str) -> Vec<u8> {
        let mut buf = plaintext.to_vec();
        let key = derive_key(passphrase);
        Aes256Ctr::new(&key.into(), &INITIAL_COUNTER.into()).apply_keystream(&mut buf);
        buf
    }

    /// One-shot decryption. Retrieval streams through [`Keystream`] instead.
    #[cfg(test)]
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        passphrase: &str,
        legacy: bool,
    ) -> Result<Vec<u8>, CryptoError> {
        let mut buf = ciphertext.to_vec();
        Keystream::for_passphrase(passphrase, legacy)?.apply(&mut buf);
        Ok(buf)
    }

    /// [`Self::encrypt`] on the blocking pool, for large payloads.
    pub async fn encrypt_owned(&self, plaintext: Bytes, passphrase: String) -> Result<Vec<u8>, CryptoError> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.encrypt(&plaintext, &passphrase))
            .await
            .map_err(|e| CryptoError::Worker(e.to_string()))
    }

    /// Argon2id hash stored in the encryption record.
    pub async fn gate_hash(&self, passphrase: &str) -> Result<String, CryptoError> {
        self.hasher.hash(passphrase.to_string()).await
    }

    /// Whether `passphrase` passes the gate recorded for an object.
    pub async fn check_gate(&self, passphrase: &str, stored: &str) -> Result<bool, CryptoError> {
        self.hasher
            .verify(passphrase.to_string(), stored.to_string())
            .await
    }
}
