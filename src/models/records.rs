//! Per-identifier metadata records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Gate for an encrypted object. Absent means the object is plaintext.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct EncryptionRecord {
    /// Argon2id PHC string of the passphrase.
    pub hash: String,

    /// Raw passphrase bytes were used as the cipher key instead of their digest.
    pub legacy: bool,
}

/// Expiry constraints for an object. Absent means the object never expires.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, Default, PartialEq, Eq)]
pub struct ExpiryRecord {
    /// Remaining retrievals. Never increases.
    pub uses_left: Option<i64>,

    /// Instant at or after which the object is purged on access.
    pub expires_at: Option<DateTime<Utc>>,
}

impl ExpiryRecord {
    pub fn is_empty(&self) -> bool {
        self.uses_left.is_none() && self.expires_at.is_none()
    }
}

/// Everything written alongside an object's bytes in one transaction.
#[derive(Clone, Debug)]
pub struct ObjectRecords {
    pub deletion_hash: String,
    pub encryption: Option<EncryptionRecord>,
    pub expiry: Option<ExpiryRecord>,
    pub embed: Option<super::embed::Embed>,
    /// Origin host credited in the per-origin upload counter.
    pub origin: Option<String>,
}
