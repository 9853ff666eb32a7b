//! Represents a reserved identifier and the payload stored under it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A single reserved object name.
///
/// The row is created when the identifier is claimed, before any bytes hit
/// the disk, so its presence alone does not mean the upload completed. An
/// object is live once its deletion record exists.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StoredObject {
    /// Public identifier including the extension (e.g. `Ab3_x9QpLm0ZkE.png`).
    pub name: String,

    /// Content type recorded at upload time.
    pub content_type: String,

    /// Size in bytes of the stored payload (ciphertext size when encrypted).
    pub size_bytes: i64,

    /// When the identifier was claimed.
    pub reserved_at: DateTime<Utc>,
}
