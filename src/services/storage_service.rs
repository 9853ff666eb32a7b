//! src/services/storage_service.rs
//!
//! StorageService: the keyed record tables (SQLite) and the content directory
//! (local disk) behind every lifecycle component. Payloads live beneath
//! `base_path/{shard}/{shard}/{name}`; each metadata table is keyed by the
//! object identifier or short-link token.
//!
//! Every method is a single atomic step. Multi-step flows (upload, purge) are
//! sequenced by the callers so that a crash between steps leaves an object
//! that is still deletable through its token.

use crate::models::{
    embed::Embed,
    object::StoredObject,
    records::{EncryptionRecord, ExpiryRecord, ObjectRecords},
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid object name")]
    InvalidName,
    #[error("payload for `{0}` is missing from the content directory")]
    MissingPayload(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Tables holding per-object records. Purge clears all of them together.
const OBJECT_TABLES: [&str; 5] = [
    "encryption_hashes",
    "deletion_hashes",
    "expiry_data",
    "embed_data",
    "objects",
];

const MAX_NAME_LEN: usize = 256;

/// The explicit store object shared by every component.
///
/// Cloning is cheap: the pool is reference counted and the base path is only
/// used to build payload paths.
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl StorageService {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Reject names that could escape the content directory.
    ///
    /// Generated names never trip this; it guards lookups driven by request
    /// paths.
    fn ensure_name_safe(name: &str) -> StorageResult<()> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(StorageError::InvalidName);
        }
        if name.starts_with('.') || name.contains("..") {
            return Err(StorageError::InvalidName);
        }
        if name
            .chars()
            .any(|c| c.is_control() || c == '/' || c == '\\')
        {
            return Err(StorageError::InvalidName);
        }
        Ok(())
    }

    /// Two-level shard directories for a name: the first two bytes of
    /// MD5(name) as lowercase hex.
    fn object_shards(name: &str) -> (String, String) {
        let digest = md5::compute(name);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Fully-qualified payload path. Parent directories may not exist yet.
    pub fn object_path(&self, name: &str) -> StorageResult<PathBuf> {
        Self::ensure_name_safe(name)?;
        let (shard_a, shard_b) = Self::object_shards(name);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(name);
        Ok(path)
    }

    // ---------------------------------------------------------------------
    // Identifier reservation
    // ---------------------------------------------------------------------

    /// Atomically claim `name` if no other object holds it.
    ///
    /// Returns `false` on collision. The primary key on `objects` makes this a
    /// create-if-absent, so two concurrent uploads can never both win the
    /// same name.
    pub async fn claim_object(
        &self,
        name: &str,
        content_type: &str,
        size_bytes: i64,
    ) -> StorageResult<bool> {
        let path = self.object_path(name)?;
        let inserted = sqlx::query(
            "INSERT INTO objects (name, content_type, size_bytes, reserved_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(name)
        .bind(content_type)
        .bind(size_bytes)
        .bind(Utc::now())
        .execute(&*self.db)
        .await;

        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => return Ok(false),
            Err(err) => return Err(StorageError::Sqlx(err)),
        }

        // A stray payload without a row (left by an interrupted purge) still
        // counts as taken.
        match fs::try_exists(&path).await {
            Ok(false) => Ok(true),
            Ok(true) => {
                self.release_object(name).await?;
                Ok(false)
            }
            Err(err) => {
                if let Err(cleanup) = self.release_object(name).await {
                    warn!(name, error = %cleanup, "failed to release reservation");
                }
                Err(StorageError::Io(err))
            }
        }
    }

    /// Drop a reservation that never became a live object.
    pub async fn release_object(&self, name: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM objects WHERE name = ?")
            .bind(name)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn object(&self, name: &str) -> StorageResult<Option<StoredObject>> {
        let row = sqlx::query_as::<_, StoredObject>(
            "SELECT name, content_type, size_bytes, reserved_at FROM objects WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&*self.db)
        .await?;
        Ok(row)
    }

    // ---------------------------------------------------------------------
    // Payload bytes
    // ---------------------------------------------------------------------

    /// Write a payload to disk.
    ///
    /// - Writes to a temporary file in the shard directory.
    /// - Flushes and fsyncs.
    /// - Renames into the final location.
    ///
    /// The temp file is removed on every error path.
    pub async fn write_object(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        let file_path = self.object_path(name)?;
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        if let Err(err) = write_synced(&tmp_path, data).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        Ok(())
    }

    /// Open a payload for streaming out.
    pub async fn open_object(&self, name: &str) -> StorageResult<File> {
        let file_path = self.object_path(name)?;
        File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::MissingPayload(name.to_string())
            } else {
                StorageError::Io(err)
            }
        })
    }

    /// Remove a payload file, tolerating one that is already gone.
    async fn remove_payload(&self, name: &str) -> StorageResult<()> {
        let file_path = self.object_path(name)?;
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed payload {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("payload {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }
        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.base_path).await;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Metadata records
    // ---------------------------------------------------------------------

    /// Commit every record for a freshly written object in one transaction.
    ///
    /// Either all of deletion/encryption/expiry/embed land, or none do.
    pub async fn commit_records(&self, name: &str, records: &ObjectRecords) -> StorageResult<()> {
        let embed_json = records
            .embed
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut tx = self.db.begin().await?;

        sqlx::query("INSERT INTO deletion_hashes (name, hash) VALUES (?, ?)")
            .bind(name)
            .bind(&records.deletion_hash)
            .execute(&mut *tx)
            .await?;

        if let Some(encryption) = &records.encryption {
            sqlx::query("INSERT INTO encryption_hashes (name, hash, legacy) VALUES (?, ?, ?)")
                .bind(name)
                .bind(&encryption.hash)
                .bind(encryption.legacy)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(expiry) = records.expiry.as_ref().filter(|e| !e.is_empty()) {
            sqlx::query("INSERT INTO expiry_data (name, uses_left, expires_at) VALUES (?, ?, ?)")
                .bind(name)
                .bind(expiry.uses_left)
                .bind(expiry.expires_at)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(data) = embed_json {
            sqlx::query("INSERT INTO embed_data (name, data) VALUES (?, ?)")
                .bind(name)
                .bind(data)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(origin) = &records.origin {
            sqlx::query(
                "INSERT INTO domain_analytics (host, uploads) VALUES (?, 1)
                 ON CONFLICT(host) DO UPDATE SET uploads = uploads + 1",
            )
            .bind(origin)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn encryption_record(&self, name: &str) -> StorageResult<Option<EncryptionRecord>> {
        let row = sqlx::query_as::<_, EncryptionRecord>(
            "SELECT hash, legacy FROM encryption_hashes WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&*self.db)
        .await?;
        Ok(row)
    }

    pub async fn deletion_hash(&self, name: &str) -> StorageResult<Option<String>> {
        let hash = sqlx::query_scalar::<_, String>("SELECT hash FROM deletion_hashes WHERE name = ?")
            .bind(name)
            .fetch_optional(&*self.db)
            .await?;
        Ok(hash)
    }

    pub async fn expiry_record(&self, name: &str) -> StorageResult<Option<ExpiryRecord>> {
        let row = sqlx::query_as::<_, ExpiryRecord>(
            "SELECT uses_left, expires_at FROM expiry_data WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&*self.db)
        .await?;
        Ok(row)
    }

    /// Atomically decrement the remaining-uses counter.
    ///
    /// Returns the new value, or `None` when there is no positive counter to
    /// consume (already exhausted or concurrently purged).
    pub async fn consume_use(&self, name: &str) -> StorageResult<Option<i64>> {
        let remaining = sqlx::query_scalar::<_, i64>(
            "UPDATE expiry_data SET uses_left = uses_left - 1
             WHERE name = ? AND uses_left > 0
             RETURNING uses_left",
        )
        .bind(name)
        .fetch_optional(&*self.db)
        .await?;
        Ok(remaining)
    }

    pub async fn embed(&self, name: &str) -> StorageResult<Option<Embed>> {
        let data = sqlx::query_scalar::<_, String>("SELECT data FROM embed_data WHERE name = ?")
            .bind(name)
            .fetch_optional(&*self.db)
            .await?;
        data.map(|raw| serde_json::from_str(&raw).map_err(StorageError::from))
            .transpose()
    }

    #[cfg(test)]
    pub async fn origin_uploads(&self, host: &str) -> StorageResult<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT uploads FROM domain_analytics WHERE host = ?")
                .bind(host)
                .fetch_optional(&*self.db)
                .await?;
        Ok(count.unwrap_or(0))
    }

    /// Remove an object's payload and every record keyed by its name.
    ///
    /// The payload goes first: if the record deletion then fails, the
    /// deletion record survives and the object can still be deleted with its
    /// token. Returns whether any record existed.
    pub async fn purge(&self, name: &str) -> StorageResult<bool> {
        self.remove_payload(name).await?;

        let mut tx = self.db.begin().await?;
        let mut removed = 0;
        for table in OBJECT_TABLES {
            removed += sqlx::query(&format!("DELETE FROM {table} WHERE name = ?"))
                .bind(name)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;

        Ok(removed > 0)
    }

    // ---------------------------------------------------------------------
    // Short links
    // ---------------------------------------------------------------------

    /// Atomically claim a short-link token together with its deletion hash.
    ///
    /// Returns `false` if the token is taken.
    pub async fn claim_short_link(&self, name: &str, url: &str, hash: &str) -> StorageResult<bool> {
        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query("INSERT INTO short_urls (name, url) VALUES (?, ?)")
            .bind(name)
            .bind(url)
            .execute(&mut *tx)
            .await;
        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                tx.rollback().await?;
                return Ok(false);
            }
            Err(err) => return Err(StorageError::Sqlx(err)),
        }

        sqlx::query("INSERT OR REPLACE INTO short_deletion_hashes (name, hash) VALUES (?, ?)")
            .bind(name)
            .bind(hash)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    pub async fn short_link_url(&self, name: &str) -> StorageResult<Option<String>> {
        let url = sqlx::query_scalar::<_, String>("SELECT url FROM short_urls WHERE name = ?")
            .bind(name)
            .fetch_optional(&*self.db)
            .await?;
        Ok(url)
    }

    pub async fn short_deletion_hash(&self, name: &str) -> StorageResult<Option<String>> {
        let hash = sqlx::query_scalar::<_, String>(
            "SELECT hash FROM short_deletion_hashes WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&*self.db)
        .await?;
        Ok(hash)
    }

    pub async fn delete_short_link(&self, name: &str) -> StorageResult<bool> {
        let mut tx = self.db.begin().await?;
        let removed = sqlx::query("DELETE FROM short_urls WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM short_deletion_hashes WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(removed > 0)
    }

    /// Recursively remove empty directories up to the content root.
    ///
    /// Stops when:
    /// - directory not empty
    /// - directory not found
    /// - reached root
    /// - encountered unexpected I/O errors
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

async fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = File::create(path).await?;
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}
