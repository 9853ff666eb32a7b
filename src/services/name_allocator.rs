//! Collision-free identifier allocation.
//!
//! Names are drawn from a cryptographically secure source and claimed
//! through a [`NameRegistry`], whose claim must be an atomic create-if-absent.
//! That makes the existence check and the reservation a single step, so two
//! concurrent uploads can never end up with the same identifier.

use crate::services::storage_service::{StorageError, StorageResult};
use rand::{Rng, rngs::OsRng};
use std::future::Future;
use thiserror::Error;
use tracing::debug;

/// 64 URL-safe symbols, ~6 bits per character.
pub const URL_SAFE_ALPHABET: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

/// Zero-width code points (ZWNJ, ZWJ, LRM) for invisible short links.
pub const ZERO_WIDTH_ALPHABET: &str = "\u{200C}\u{200D}\u{200E}";

/// Consecutive collisions tolerated before giving up.
pub const MAX_ATTEMPTS: u32 = 16;

#[derive(Debug, Error)]
pub enum AllocError {
    #[error("tried too many names - try increasing your name length")]
    Exhausted,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Something that can atomically claim a name.
pub trait NameRegistry {
    /// Claim `name` if nobody holds it. Returns `false` on collision.
    fn try_claim(&self, name: &str) -> impl Future<Output = StorageResult<bool>> + Send;
}

/// Random string of `length` symbols from `alphabet`, using the OS CSPRNG.
pub fn random_string(length: usize, alphabet: &str) -> String {
    let symbols: Vec<char> = alphabet.chars().collect();
    let mut rng = OsRng;
    (0..length)
        .map(|_| symbols[rng.gen_range(0..symbols.len())])
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct NameAllocator {
    alphabet: &'static str,
}

impl Default for NameAllocator {
    fn default() -> Self {
        Self::new(URL_SAFE_ALPHABET)
    }
}

impl NameAllocator {
    pub fn new(alphabet: &'static str) -> Self {
        Self { alphabet }
    }

    /// Generate and claim a fresh name of `length` symbols plus `.extension`.
    ///
    /// Each collision retries with a new random string; after
    /// [`MAX_ATTEMPTS`] consecutive collisions this fails with
    /// [`AllocError::Exhausted`].
    pub async fn reserve<R>(
        &self,
        registry: &R,
        length: usize,
        extension: Option<&str>,
    ) -> Result<String, AllocError>
    where
        R: NameRegistry + Sync,
    {
        for attempt in 0..MAX_ATTEMPTS {
            let mut candidate = random_string(length, self.alphabet);
            if let Some(ext) = extension {
                candidate.push('.');
                candidate.push_str(ext);
            }
            if registry.try_claim(&candidate).await? {
                return Ok(candidate);
            }
            debug!(attempt, "name collision, retrying");
        }
        Err(AllocError::Exhausted)
    }
}
