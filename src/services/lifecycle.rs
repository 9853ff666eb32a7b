//! Upload, retrieval and deletion flows over the storage components.
//!
//! Upload: validate everything → rate limit → mint deletion token (and
//! encrypt + gate hash) → reserve name → write bytes → commit records.
//! Retrieval: records lookup → expiry verdict (may purge) → decrypt → bytes.
//! Deletion: verify token → purge bytes and every record.

use crate::{
    models::{
        embed::OEmbed,
        records::{EncryptionRecord, ExpiryRecord, ObjectRecords},
        upload::{ShortenQuery, ShortenReceipt, UploadQuery, UploadReceipt},
    },
    services::{
        crypto::{CryptoEngine, CryptoError, DEFAULT_PASSPHRASE_LEN, Keystream},
        deletion::DeletionAuthority,
        embed::{EmbedDraft, EmbedError, preview_page},
        expiry_policy::{ExpiryPolicy, Verdict},
        list_file::ListFile,
        name_allocator::{AllocError, NameAllocator, NameRegistry},
        rate_limiter::{ActionClass, RateDecision, RateLimiter},
        secret_hash::SecretHasher,
        short_links::{ShortLinkError, ShortLinkRegistry, TokenAlphabet},
        storage_service::{StorageError, StorageResult, StorageService},
    },
};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::{StreamExt, stream::BoxStream};
use rand::seq::SliceRandom;
use std::{io, sync::Arc, time::Duration};
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tracing::{error, info};

pub const DEFAULT_NAME_LEN: usize = 14;
pub const MIN_NAME_LEN: usize = 6;
pub const MAX_NAME_LEN: usize = 24;
pub const MAX_EXPIRY_USES: i64 = 10;
pub const MAX_EXPIRY_MS: i64 = 24 * 60 * 60 * 1000;

/// Extensions never accepted for upload.
pub const FORBIDDEN_EXTENSIONS: [&str; 9] =
    ["exe", "com", "js", "vbs", "msi", "dmg", "css", "html", "py"];

/// Extensions preferred over `mime_guess`'s first guess for common types.
const PREFERRED_EXTENSIONS: [(&str, &str); 13] = [
    ("text/plain", "txt"),
    ("text/html", "html"),
    ("text/css", "css"),
    ("text/javascript", "js"),
    ("application/javascript", "js"),
    ("application/json", "json"),
    ("image/jpeg", "jpeg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("video/mp4", "mp4"),
    ("audio/mpeg", "mp3"),
    ("application/octet-stream", "bin"),
    ("application/x-msdownload", "exe"),
];

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Upload file too large")]
    PayloadTooLarge,
    #[error("Bad Content-Type")]
    UnsupportedMediaType,
    #[error("Forbidden file extension")]
    ForbiddenExtension,
    #[error("Invalid API key")]
    InvalidCredential,
    #[error("Ratelimited - wait {}ms", .0.as_millis())]
    RateLimited(Duration),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("File not found")]
    NotFound,
    #[error("Error while finding name: Tried too many names - try increasing your name length.")]
    NameExhausted,
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

impl From<AllocError> for LifecycleError {
    fn from(err: AllocError) -> Self {
        match err {
            AllocError::Exhausted => Self::NameExhausted,
            AllocError::Storage(err) => Self::Storage(err),
        }
    }
}

impl From<EmbedError> for LifecycleError {
    fn from(err: EmbedError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<ShortLinkError> for LifecycleError {
    fn from(err: ShortLinkError) -> Self {
        match err {
            ShortLinkError::InvalidUrl => Self::BadRequest(err.to_string()),
            ShortLinkError::Unauthorized => Self::Unauthorized("Invalid deletion key!"),
            ShortLinkError::Alloc(err) => err.into(),
            ShortLinkError::Storage(err) => Self::Storage(err),
            ShortLinkError::Crypto(err) => Self::Crypto(err),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub size_limit: usize,
    pub key_length_limit: usize,
    pub site_name: String,
    pub upload_window: Duration,
    pub shorten_window: Duration,
}

/// An upload as received from the HTTP layer.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub body: Bytes,
    pub content_type: Option<String>,
    pub credential: Option<String>,
    /// `Host` the request arrived on.
    pub host: Option<String>,
    /// Whether the request arrived over https.
    pub secure: bool,
    pub query: UploadQuery,
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub receipt: UploadReceipt,
    /// Caller asked for the bare derived URL instead of JSON.
    pub only_url: bool,
}

/// Which variant of an object route was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    /// Bytes only.
    Raw,
    /// Preview page when embed data exists, bytes otherwise.
    Rich,
}

pub struct ObjectPayload {
    pub content_type: String,
    pub body: BoxStream<'static, io::Result<Bytes>>,
}

pub enum Retrieval {
    Payload(ObjectPayload),
    Preview(String),
    /// Nothing servable under this route; the caller falls through.
    Missing,
}

/// Everything an upload needs, checked before any side effect.
#[derive(Debug)]
struct UploadPlan {
    content_type: String,
    extension: String,
    credential: String,
    name_length: usize,
    embed: Option<EmbedDraft>,
    expiry: Option<ExpiryRecord>,
    passphrase: Option<String>,
    alternate_host: Option<String>,
    only_url: bool,
}

/// Claims an identifier by inserting its reservation row.
struct ObjectClaim<'a> {
    store: &'a StorageService,
    content_type: &'a str,
    size_bytes: i64,
}

impl NameRegistry for ObjectClaim<'_> {
    async fn try_claim(&self, name: &str) -> StorageResult<bool> {
        self.store
            .claim_object(name, self.content_type, self.size_bytes)
            .await
    }
}

/// Reserve → write → commit, rolled back on failure. Runs detached from the
/// request so a client disconnect cannot stop it halfway.
struct PersistJob {
    store: StorageService,
    names: NameAllocator,
    name_length: usize,
    extension: String,
    content_type: String,
    payload: Bytes,
    plaintext_len: u64,
    deletion_hash: String,
    encryption: Option<EncryptionRecord>,
    expiry: Option<ExpiryRecord>,
    embed: Option<EmbedDraft>,
    origin: Option<String>,
    now: DateTime<Utc>,
    site_name: String,
}

impl PersistJob {
    async fn run(self) -> LifecycleResult<String> {
        let claim = ObjectClaim {
            store: &self.store,
            content_type: &self.content_type,
            size_bytes: self.payload.len() as i64,
        };
        let name = self
            .names
            .reserve(&claim, self.name_length, Some(&self.extension))
            .await?;

        if let Err(err) = self.store.write_object(&name, &self.payload).await {
            if let Err(cleanup) = self.store.release_object(&name).await {
                error!(%name, error = %cleanup, "failed to release reservation");
            }
            return Err(err.into());
        }

        let records = ObjectRecords {
            deletion_hash: self.deletion_hash,
            encryption: self.encryption,
            expiry: self.expiry,
            embed: self
                .embed
                .map(|draft| draft.render(&name, self.plaintext_len, self.now, &self.site_name)),
            origin: self.origin,
        };
        if let Err(err) = self.store.commit_records(&name, &records).await {
            if let Err(cleanup) = self.store.purge(&name).await {
                error!(%name, error = %cleanup, "failed to roll back upload");
            }
            return Err(err.into());
        }
        Ok(name)
    }
}

pub struct LifecycleCoordinator {
    store: StorageService,
    names: NameAllocator,
    crypto: CryptoEngine,
    deletion: DeletionAuthority,
    expiry: ExpiryPolicy,
    limiter: RateLimiter,
    links: ShortLinkRegistry,
    credentials: Arc<ListFile>,
    settings: LifecycleSettings,
}

impl LifecycleCoordinator {
    pub fn new(
        store: StorageService,
        hasher: SecretHasher,
        credentials: Arc<ListFile>,
        settings: LifecycleSettings,
    ) -> Self {
        let deletion = DeletionAuthority::new(hasher.clone());
        Self {
            names: NameAllocator::default(),
            crypto: CryptoEngine::new(hasher),
            expiry: ExpiryPolicy::new(store.clone()),
            limiter: RateLimiter::new(settings.upload_window, settings.shorten_window),
            links: ShortLinkRegistry::new(store.clone(), deletion.clone()),
            deletion,
            store,
            credentials,
            settings,
        }
    }

    pub fn store(&self) -> &StorageService {
        &self.store
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    // ---------------------------------------------------------------------
    // Upload
    // ---------------------------------------------------------------------

    pub async fn upload(&self, request: UploadRequest) -> LifecycleResult<UploadOutcome> {
        let now = Utc::now();
        let plan = self.validate(&request, now)?;

        if let RateDecision::Wait(wait) = self.limiter.check(&plan.credential, ActionClass::Upload) {
            return Err(LifecycleError::RateLimited(wait));
        }

        let issued = self.deletion.issue().await?;
        let plaintext_len = request.body.len() as u64;
        let (payload, encryption) = match &plan.passphrase {
            Some(passphrase) => {
                let ciphertext = self
                    .crypto
                    .encrypt_owned(request.body.clone(), passphrase.clone())
                    .await?;
                let record = EncryptionRecord {
                    hash: self.crypto.gate_hash(passphrase).await?,
                    legacy: false,
                };
                (Bytes::from(ciphertext), Some(record))
            }
            None => (request.body.clone(), None),
        };

        let job = PersistJob {
            store: self.store.clone(),
            names: self.names,
            name_length: plan.name_length,
            extension: plan.extension.clone(),
            content_type: plan.content_type.clone(),
            payload,
            plaintext_len,
            deletion_hash: issued.stored_hash,
            encryption,
            expiry: plan.expiry.clone(),
            embed: plan.embed.clone(),
            origin: request.host.clone(),
            now,
            site_name: self.settings.site_name.clone(),
        };
        let name = tokio::spawn(job.run())
            .await
            .map_err(|e| LifecycleError::Internal(format!("upload task failed: {e}")))??;

        info!(
            %name,
            size = plaintext_len,
            encrypted = plan.passphrase.is_some(),
            "upload stored"
        );

        let scheme = if request.secure { "https" } else { "http" };
        let host = plan
            .alternate_host
            .as_deref()
            .or(request.host.as_deref())
            .unwrap_or("localhost");
        let path = match &plan.passphrase {
            Some(passphrase) => format!(
                "/{}/{}",
                urlencoding::encode(passphrase),
                urlencoding::encode(&name)
            ),
            None => format!("/{}", urlencoding::encode(&name)),
        };

        let deduced_url = format!("{scheme}://{host}{path}");

        Ok(UploadOutcome {
            receipt: UploadReceipt {
                success: true,
                name,
                deletion_key: issued.token,
                encryption_key: plan.passphrase,
                random: plan.alternate_host,
                deduced_url,
            },
            only_url: plan.only_url,
        })
    }

    fn validate(&self, request: &UploadRequest, now: DateTime<Utc>) -> LifecycleResult<UploadPlan> {
        let query = &request.query;

        if request.body.len() > self.settings.size_limit {
            return Err(LifecycleError::PayloadTooLarge);
        }

        let content_type = request
            .content_type
            .as_deref()
            .and_then(normalize_content_type)
            .ok_or(LifecycleError::UnsupportedMediaType)?;
        let extension = extension_for(&content_type).ok_or(LifecycleError::ForbiddenExtension)?;
        if is_forbidden(&content_type, &extension) {
            return Err(LifecycleError::ForbiddenExtension);
        }

        let credential = self.authenticate(request.credential.as_deref())?;

        let name_length = match non_empty(&query.name_length) {
            None => DEFAULT_NAME_LEN,
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| (MIN_NAME_LEN..=MAX_NAME_LEN).contains(n))
                .ok_or_else(|| bad_request("Invalid name length"))?,
        };

        let embed = EmbedDraft::from_query(query, &content_type)?;
        let expiry = parse_expiry(query, now)?;
        let passphrase = self.plan_passphrase(query)?;

        let alternate_host = pick_host(query.random.as_deref());

        Ok(UploadPlan {
            content_type,
            extension,
            credential,
            name_length,
            embed,
            expiry,
            passphrase,
            alternate_host,
            only_url: query.only_url.as_deref() == Some("yes"),
        })
    }

    fn authenticate(&self, credential: Option<&str>) -> LifecycleResult<String> {
        let credential = credential.map(str::trim).unwrap_or_default();
        if !self.credentials.contains(credential) {
            return Err(LifecycleError::InvalidCredential);
        }
        Ok(credential.to_string())
    }

    fn plan_passphrase(&self, query: &UploadQuery) -> LifecycleResult<Option<String>> {
        if query.encryption.as_deref() != Some("yes") {
            return Ok(None);
        }
        let limit = self.settings.key_length_limit;

        let key_length = match non_empty(&query.key_length) {
            None => None,
            Some(raw) => Some(
                raw.parse::<usize>()
                    .ok()
                    .filter(|n| *n >= 1)
                    .ok_or_else(|| bad_request("Invalid key length"))?,
            ),
        };
        if key_length.is_some_and(|n| n > limit) {
            return Err(bad_request("Encryption key too large"));
        }

        match non_empty(&query.encryption_key) {
            Some(key) if key.chars().count() > limit => Err(bad_request("Encryption key too large")),
            Some(key) => Ok(Some(key.to_string())),
            None => Ok(Some(CryptoEngine::generate_passphrase(
                key_length.unwrap_or(DEFAULT_PASSPHRASE_LEN),
            ))),
        }
    }

    // ---------------------------------------------------------------------
    // Retrieval
    // ---------------------------------------------------------------------

    /// Plain-object route. `Missing` lets the caller try the short-link route.
    pub async fn fetch_plain(&self, name: &str, view: View, host: &str) -> LifecycleResult<Retrieval> {
        if self.store.deletion_hash(name).await?.is_none() {
            return Ok(Retrieval::Missing);
        }
        if self.store.encryption_record(name).await?.is_some() {
            return Err(LifecycleError::Unauthorized("This file is encrypted!"));
        }

        let raw_path = format!("/raw/{}", urlencoding::encode(name));
        if let Some(preview) = self.preview(name, view, host, &raw_path).await? {
            return Ok(preview);
        }
        if !self.admit(name).await? {
            return Ok(Retrieval::Missing);
        }

        let content_type = self.content_type(name).await?;
        let file = self.store.open_object(name).await?;
        Ok(Retrieval::Payload(ObjectPayload {
            content_type,
            body: ReaderStream::new(file).boxed(),
        }))
    }

    /// Encrypted-object route. The passphrase gate is checked before expiry,
    /// so a wrong passphrase never consumes a use.
    pub async fn fetch_encrypted(
        &self,
        passphrase: &str,
        name: &str,
        view: View,
        host: &str,
    ) -> LifecycleResult<Retrieval> {
        let Some(record) = self.store.encryption_record(name).await? else {
            return Ok(Retrieval::Missing);
        };
        if !self.crypto.check_gate(passphrase, &record.hash).await? {
            return Err(LifecycleError::Unauthorized("Invalid decryption key!"));
        }

        let raw_path = format!(
            "/raw/{}/{}",
            urlencoding::encode(passphrase),
            urlencoding::encode(name)
        );
        if let Some(preview) = self.preview(name, view, host, &raw_path).await? {
            return Ok(preview);
        }
        if !self.admit(name).await? {
            return Ok(Retrieval::Missing);
        }

        let mut keystream = Keystream::for_passphrase(passphrase, record.legacy)?;
        let content_type = self.content_type(name).await?;
        let file = self.store.open_object(name).await?;
        let body = ReaderStream::new(file)
            .map(move |chunk| {
                chunk.map(|bytes| {
                    let mut buf = BytesMut::from(&bytes[..]);
                    keystream.apply(&mut buf);
                    buf.freeze()
                })
            })
            .boxed();
        Ok(Retrieval::Payload(ObjectPayload { content_type, body }))
    }

    async fn preview(
        &self,
        name: &str,
        view: View,
        host: &str,
        raw_path: &str,
    ) -> LifecycleResult<Option<Retrieval>> {
        if view == View::Raw {
            return Ok(None);
        }
        let Some(embed) = self.store.embed(name).await? else {
            return Ok(None);
        };
        if self.expiry.peek(name, Utc::now()).await? == Verdict::Purge {
            self.purge_expired(name).await?;
            return Ok(Some(Retrieval::Missing));
        }
        let page = preview_page(&embed, host, raw_path, name, &self.settings.site_name);
        Ok(Some(Retrieval::Preview(page)))
    }

    /// Apply the expiry verdict; purges and returns `false` when the access
    /// must not be served.
    async fn admit(&self, name: &str) -> LifecycleResult<bool> {
        match self.expiry.evaluate(name, Utc::now()).await? {
            Verdict::Serve => Ok(true),
            Verdict::Purge => {
                self.purge_expired(name).await?;
                Ok(false)
            }
        }
    }

    async fn purge_expired(&self, name: &str) -> LifecycleResult<()> {
        self.store.purge(name).await?;
        info!(%name, "expired object purged");
        Ok(())
    }

    async fn content_type(&self, name: &str) -> LifecycleResult<String> {
        let stored = self.store.object(name).await?.map(|o| o.content_type);
        Ok(stored.unwrap_or_else(|| {
            mime_guess::from_path(name)
                .first_or_octet_stream()
                .to_string()
        }))
    }

    pub async fn oembed(&self, name: &str) -> LifecycleResult<OEmbed> {
        self.store
            .embed(name)
            .await?
            .as_ref()
            .map(OEmbed::from)
            .ok_or(LifecycleError::NotFound)
    }

    pub async fn resolve_short_link(&self, name: &str) -> LifecycleResult<Option<String>> {
        Ok(self.links.resolve(name).await?)
    }

    // ---------------------------------------------------------------------
    // Deletion
    // ---------------------------------------------------------------------

    /// Delete an object with its token. An unknown name and a wrong token
    /// are indistinguishable to the caller.
    pub async fn delete_object(&self, name: &str, token: &str) -> LifecycleResult<()> {
        let Some(hash) = self.store.deletion_hash(name).await? else {
            return Err(LifecycleError::Unauthorized("Invalid deletion key!"));
        };
        if !self.deletion.verify(token, &hash).await? {
            return Err(LifecycleError::Unauthorized("Invalid deletion key!"));
        }
        self.store.purge(name).await?;
        info!(%name, "object deleted");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Short links
    // ---------------------------------------------------------------------

    pub async fn shorten(
        &self,
        query: &ShortenQuery,
        credential: Option<&str>,
    ) -> LifecycleResult<ShortenReceipt> {
        let destination =
            ShortLinkRegistry::parse_destination(query.url.as_deref().unwrap_or_default())?;
        let credential = self.authenticate(credential)?;
        if let RateDecision::Wait(wait) = self.limiter.check(&credential, ActionClass::Shorten) {
            return Err(LifecycleError::RateLimited(wait));
        }

        let created = self
            .links
            .create(&destination, TokenAlphabet::from_mode(query.mode.as_deref()))
            .await?;

        Ok(ShortenReceipt {
            success: true,
            name: created.name,
            deletion_key: created.deletion_token,
            random: pick_host(query.random.as_deref()),
        })
    }

    pub async fn delete_short_link(&self, name: &str, token: &str) -> LifecycleResult<()> {
        self.links.delete(name, token).await?;
        Ok(())
    }
}

fn bad_request(message: &str) -> LifecycleError {
    LifecycleError::BadRequest(message.to_string())
}

/// One host picked at random from a comma-separated list.
fn pick_host(list: Option<&str>) -> Option<String> {
    let hosts: Vec<&str> = list
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .collect();
    hosts.choose(&mut rand::thread_rng()).map(|h| h.to_string())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Lowercased `type/subtype` without parameters, or `None` if unparsable.
fn normalize_content_type(raw: &str) -> Option<String> {
    raw.trim()
        .parse::<mime_guess::Mime>()
        .ok()
        .map(|mime| mime.essence_str().to_ascii_lowercase())
}

fn extension_for(content_type: &str) -> Option<String> {
    PREFERRED_EXTENSIONS
        .iter()
        .find(|(mime, _)| *mime == content_type)
        .map(|(_, ext)| ext.to_string())
        .or_else(|| {
            mime_guess::get_mime_extensions_str(content_type)
                .and_then(|exts| exts.first())
                .map(|ext| ext.to_string())
        })
}

/// A type is forbidden when its chosen extension is, or, for types without a
/// preferred extension, when any extension registered for it is.
fn is_forbidden(content_type: &str, extension: &str) -> bool {
    if FORBIDDEN_EXTENSIONS.contains(&extension) {
        return true;
    }
    let preferred = PREFERRED_EXTENSIONS
        .iter()
        .any(|(mime, _)| *mime == content_type);
    !preferred
        && mime_guess::get_mime_extensions_str(content_type)
            .is_some_and(|exts| exts.iter().any(|ext| FORBIDDEN_EXTENSIONS.contains(ext)))
}

/// `expire=yes` needs `expireUses` (1..=10) and/or `expireTime` (ms, up to a
/// day).
fn parse_expiry(query: &UploadQuery, now: DateTime<Utc>) -> LifecycleResult<Option<ExpiryRecord>> {
    if query.expire.as_deref() != Some("yes") {
        return Ok(None);
    }
    let uses = non_empty(&query.expire_uses);
    let time = non_empty(&query.expire_time);
    if uses.is_none() && time.is_none() {
        return Err(bad_request("No expiry data provided!"));
    }

    let uses_left = uses
        .map(|raw| {
            raw.parse::<i64>()
                .ok()
                .filter(|n| (1..=MAX_EXPIRY_USES).contains(n))
                .ok_or_else(|| bad_request("Uses must be between 1-10"))
        })
        .transpose()?;
    let expires_at = time
        .map(|raw| {
            raw.parse::<i64>()
                .ok()
                .filter(|ms| (0..=MAX_EXPIRY_MS).contains(ms))
                .map(|ms| now + ChronoDuration::milliseconds(ms))
                .ok_or_else(|| bad_request("Time must be less than a day!"))
        })
        .transpose()?;

    Ok(Some(ExpiryRecord {
        uses_left,
        expires_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::test_storage, services::secret_hash::HashParams};
    use futures::TryStreamExt;
    use tempfile::TempDir;

    const KEY: &str = "test-key";

    async fn coordinator(upload_window: Duration) -> (LifecycleCoordinator, TempDir) {
        let (store, dir) = test_storage().await;
        let hasher = SecretHasher::new(&HashParams::fast()).unwrap();
        let credentials = ListFile::from_entries("keys", vec![KEY.into(), "other-key".into()]);
        let settings = LifecycleSettings {
            size_limit: 1024,
            key_length_limit: 64,
            site_name: "drophost".into(),
            upload_window,
            shorten_window: Duration::from_secs(60),
        };
        (
            LifecycleCoordinator::new(store, hasher, credentials, settings),
            dir,
        )
    }

    fn text_upload(body: &'static [u8]) -> UploadRequest {
        UploadRequest {
            body: Bytes::from_static(body),
            content_type: Some("text/plain".into()),
            credential: Some(KEY.into()),
            host: Some("files.example".into()),
            secure: false,
            query: UploadQuery::default(),
        }
    }

    async fn body_of(retrieval: Retrieval) -> Vec<u8> {
        match retrieval {
            Retrieval::Payload(payload) => {
                let chunks: Vec<Bytes> = payload.body.try_collect().await.unwrap();
                chunks.concat()
            }
            Retrieval::Preview(_) => panic!("expected bytes, got preview"),
            Retrieval::Missing => panic!("expected bytes, got missing"),
        }
    }

    #[tokio::test]
    async fn upload_fetch_delete_round_trip() {
        let (lc, _dir) = coordinator(Duration::ZERO).await;
        let outcome = lc.upload(text_upload(b"hello world")).await.unwrap();
        let receipt = outcome.receipt;

        let (stem, ext) = receipt.name.rsplit_once('.').unwrap();
        assert_eq!(ext, "txt");
        assert_eq!(stem.len(), DEFAULT_NAME_LEN);
        assert_eq!(receipt.deletion_key.len(), 128);
        assert!(receipt.deletion_key.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(receipt.encryption_key.is_none());
        assert_eq!(
            receipt.deduced_url,
            format!("http://files.example/{}", receipt.name)
        );

        let fetched = lc.fetch_plain(&receipt.name, View::Rich, "files.example").await.unwrap();
        assert_eq!(body_of(fetched).await, b"hello world");
        assert_eq!(lc.store().origin_uploads("files.example").await.unwrap(), 1);

        lc.delete_object(&receipt.name, &receipt.deletion_key).await.unwrap();
        assert!(matches!(
            lc.fetch_plain(&receipt.name, View::Raw, "files.example").await.unwrap(),
            Retrieval::Missing
        ));
        assert!(lc.store().object(&receipt.name).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn wrong_deletion_token_leaves_object_intact() {
        let (lc, _dir) = coordinator(Duration::ZERO).await;
        let receipt = lc.upload(text_upload(b"keep me")).await.unwrap().receipt;

        let err = lc.delete_object(&receipt.name, &"0".repeat(128)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Unauthorized(_)));
        // unknown names answer exactly the same way
        let unknown = lc.delete_object("nope.txt", &receipt.deletion_key).await.unwrap_err();
        assert_eq!(unknown.to_string(), err.to_string());

        let fetched = lc.fetch_plain(&receipt.name, View::Raw, "h").await.unwrap();
        assert_eq!(body_of(fetched).await, b"keep me");
    }

    #[tokio::test]
    async fn encrypted_upload_requires_passphrase() {
        let (lc, _dir) = coordinator(Duration::ZERO).await;
        let mut request = text_upload(b"secret bytes");
        request.query.encryption = Some("yes".into());
        request.query.encryption_key = Some("my key/with slash".into());
        let receipt = lc.upload(request).await.unwrap().receipt;

        assert_eq!(receipt.encryption_key.as_deref(), Some("my key/with slash"));
        assert!(receipt.deduced_url.ends_with(&format!("/my%20key%2Fwith%20slash/{}", receipt.name)));

        // ciphertext on disk
        let on_disk = std::fs::read(lc.store().object_path(&receipt.name).unwrap()).unwrap();
        assert_ne!(on_disk, b"secret bytes");

        assert!(matches!(
            lc.fetch_plain(&receipt.name, View::Raw, "h").await,
            Err(LifecycleError::Unauthorized(_))
        ));
        assert!(matches!(
            lc.fetch_encrypted("wrong", &receipt.name, View::Raw, "h").await,
            Err(LifecycleError::Unauthorized(_))
        ));
        let fetched = lc
            .fetch_encrypted("my key/with slash", &receipt.name, View::Raw, "h")
            .await
            .unwrap();
        assert_eq!(body_of(fetched).await, b"secret bytes");
    }

    #[tokio::test]
    async fn generated_passphrase_honours_key_length() {
        let (lc, _dir) = coordinator(Duration::ZERO).await;
        let mut request = text_upload(b"x");
        request.query.encryption = Some("yes".into());
        request.query.key_length = Some("20".into());
        let receipt = lc.upload(request).await.unwrap().receipt;
        assert_eq!(receipt.encryption_key.unwrap().len(), 20);

        let mut too_long = text_upload(b"x");
        too_long.query.encryption = Some("yes".into());
        too_long.query.key_length = Some("65".into());
        assert!(matches!(lc.upload(too_long).await, Err(LifecycleError::BadRequest(_))));
    }

    #[tokio::test]
    async fn single_use_object_is_purged_without_being_served() {
        let (lc, _dir) = coordinator(Duration::ZERO).await;
        let mut request = text_upload(b"burn after reading");
        request.query.expire = Some("yes".into());
        request.query.expire_uses = Some("1".into());
        let receipt = lc.upload(request).await.unwrap().receipt;

        // The triggering access is not served.
        assert!(matches!(
            lc.fetch_plain(&receipt.name, View::Raw, "h").await.unwrap(),
            Retrieval::Missing
        ));
        assert!(lc.store().deletion_hash(&receipt.name).await.unwrap().is_none());
        assert!(!lc.store().object_path(&receipt.name).unwrap().exists());
    }

    #[tokio::test]
    async fn elapsed_time_expiry_purges_on_next_access() {
        let (lc, _dir) = coordinator(Duration::ZERO).await;
        let mut request = text_upload(b"short lived");
        request.query.expire = Some("yes".into());
        request.query.expire_time = Some("0".into());
        let receipt = lc.upload(request).await.unwrap().receipt;

        assert!(matches!(
            lc.fetch_plain(&receipt.name, View::Raw, "h").await.unwrap(),
            Retrieval::Missing
        ));
        assert!(lc.store().object(&receipt.name).await.unwrap().is_none());
        assert!(lc.store().expiry_record(&receipt.name).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn validation_rejects_before_side_effects() {
        let (lc, _dir) = coordinator(Duration::from_secs(60)).await;

        let mut bad_length = text_upload(b"x");
        bad_length.query.name_length = Some("5".into());
        assert!(matches!(lc.upload(bad_length).await, Err(LifecycleError::BadRequest(_))));

        let mut html = text_upload(b"<p>");
        html.content_type = Some("text/html; charset=utf-8".into());
        assert!(matches!(lc.upload(html).await, Err(LifecycleError::ForbiddenExtension)));

        let mut no_type = text_upload(b"x");
        no_type.content_type = None;
        assert!(matches!(lc.upload(no_type).await, Err(LifecycleError::UnsupportedMediaType)));

        let mut stranger = text_upload(b"x");
        stranger.credential = Some("who?".into());
        assert!(matches!(lc.upload(stranger).await, Err(LifecycleError::InvalidCredential)));

        let big = UploadRequest {
            body: Bytes::from(vec![0u8; 1025]),
            ..text_upload(b"")
        };
        assert!(matches!(lc.upload(big).await, Err(LifecycleError::PayloadTooLarge)));

        let mut no_expiry_data = text_upload(b"x");
        no_expiry_data.query.expire = Some("yes".into());
        assert!(matches!(lc.upload(no_expiry_data).await, Err(LifecycleError::BadRequest(_))));

        // none of the rejected requests consumed the rate-limit window
        assert!(lc.upload(text_upload(b"ok")).await.is_ok());
    }

    #[tokio::test]
    async fn uploads_are_rate_limited_per_credential() {
        let (lc, _dir) = coordinator(Duration::from_secs(60)).await;
        lc.upload(text_upload(b"one")).await.unwrap();

        match lc.upload(text_upload(b"two")).await {
            Err(LifecycleError::RateLimited(wait)) => assert!(wait <= Duration::from_secs(60)),
            other => panic!("expected rate limit, got {:?}", other.map(|o| o.receipt)),
        }

        let mut other_key = text_upload(b"three");
        other_key.credential = Some("  other-key ".into());
        assert!(lc.upload(other_key).await.is_ok());
    }

    #[tokio::test]
    async fn embed_preview_only_on_rich_view() {
        let (lc, _dir) = coordinator(Duration::ZERO).await;
        let mut request = text_upload(b"\x89PNG fake");
        request.content_type = Some("image/png".into());
        request.query.embed = Some("yes".into());
        request.query.embed_header = Some("My Host".into());
        request.query.random = Some("a.example, ,".into());
        let receipt = lc.upload(request).await.unwrap().receipt;
        assert_eq!(receipt.random.as_deref(), Some("a.example"));
        assert!(receipt.deduced_url.starts_with("http://a.example/"));

        match lc.fetch_plain(&receipt.name, View::Rich, "files.example").await.unwrap() {
            Retrieval::Preview(page) => {
                assert!(page.contains(&format!("https://files.example/raw/{}", receipt.name)));
            }
            _ => panic!("expected preview page"),
        }
        let raw = lc.fetch_plain(&receipt.name, View::Raw, "files.example").await.unwrap();
        assert_eq!(body_of(raw).await, b"\x89PNG fake");

        let oembed = lc.oembed(&receipt.name).await.unwrap();
        assert_eq!(oembed.provider_name.as_deref(), Some("My Host"));
        assert!(matches!(
            lc.oembed("missing.png").await,
            Err(LifecycleError::NotFound)
        ));
    }

    #[tokio::test]
    async fn shorten_resolve_and_delete() {
        let (lc, _dir) = coordinator(Duration::ZERO).await;
        let query = ShortenQuery {
            url: Some("https://example.com/x".into()),
            mode: None,
            random: None,
        };
        let receipt = lc.shorten(&query, Some(KEY)).await.unwrap();
        assert_eq!(
            lc.resolve_short_link(&receipt.name).await.unwrap().as_deref(),
            Some("https://example.com/x")
        );

        assert!(matches!(
            lc.shorten(&query, Some(KEY)).await,
            Err(LifecycleError::RateLimited(_))
        ));
        assert!(matches!(
            lc.shorten(&query, Some("nobody")).await,
            Err(LifecycleError::InvalidCredential)
        ));

        assert!(matches!(
            lc.delete_short_link(&receipt.name, "bad").await,
            Err(LifecycleError::Unauthorized(_))
        ));
        lc.delete_short_link(&receipt.name, &receipt.deletion_key).await.unwrap();
        assert!(lc.resolve_short_link(&receipt.name).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn executables_are_rejected_by_content_type() {
        let (lc, _dir) = coordinator(Duration::ZERO).await;
        let mut exe = text_upload(b"MZ\x90\x00");
        exe.content_type = Some("application/x-msdownload".into());
        assert!(matches!(lc.upload(exe).await, Err(LifecycleError::ForbiddenExtension)));

        assert!(is_forbidden("application/x-msdownload", "exe"));
        assert!(!is_forbidden("application/octet-stream", "bin"));
        assert!(!is_forbidden("text/plain", "txt"));
    }

    fn persist_job(store: StorageService) -> PersistJob {
        PersistJob {
            store,
            names: NameAllocator::default(),
            name_length: DEFAULT_NAME_LEN,
            extension: "txt".into(),
            content_type: "text/plain".into(),
            payload: Bytes::from_static(b"payload"),
            plaintext_len: 7,
            deletion_hash: "hash".into(),
            encryption: None,
            expiry: None,
            embed: None,
            origin: Some("files.example".into()),
            now: Utc::now(),
            site_name: "drophost".into(),
        }
    }

    async fn object_rows(store: &StorageService) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM objects")
            .fetch_one(&*store.db)
            .await
            .unwrap()
    }

    fn files_under(path: &std::path::Path) -> usize {
        std::fs::read_dir(path)
            .map(|entries| {
                entries
                    .flatten()
                    .map(|entry| {
                        let path = entry.path();
                        if path.is_dir() { files_under(&path) } else { 1 }
                    })
                    .sum()
            })
            .unwrap_or(0)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_write_releases_the_reservation() {
        let (store, dir) = test_storage().await;
        // Content dir is a dangling symlink: lookups see nothing, writes fail.
        let content = dir.path().join("content");
        std::os::unix::fs::symlink(dir.path().join("missing"), &content).unwrap();
        let store = StorageService::new(store.db.clone(), content);

        assert!(persist_job(store.clone()).run().await.is_err());
        assert_eq!(object_rows(&store).await, 0);
        assert!(!dir.path().join("missing").exists());
    }

    #[tokio::test]
    async fn failed_commit_purges_payload_and_reservation() {
        let (store, dir) = test_storage().await;
        sqlx::query(
            "CREATE TRIGGER reject_deletion_hash BEFORE INSERT ON deletion_hashes
             BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .execute(&*store.db)
        .await
        .unwrap();

        assert!(persist_job(store.clone()).run().await.is_err());
        assert_eq!(object_rows(&store).await, 0);
        assert_eq!(files_under(dir.path()), 0);
    }

    #[test]
    fn content_types_map_to_extensions() {
        assert_eq!(normalize_content_type("Text/Plain; charset=UTF-8").as_deref(), Some("text/plain"));
        assert!(normalize_content_type("garbage").is_none());
        assert_eq!(extension_for("text/plain").as_deref(), Some("txt"));
        assert_eq!(extension_for("image/png").as_deref(), Some("png"));
        assert!(extension_for("application/x-definitely-unknown").is_none());
    }
}
