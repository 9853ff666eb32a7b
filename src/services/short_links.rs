//! Short tokens that redirect to destination URLs.
//!
//! Deletion works exactly like objects: an independent 128-hex token whose
//! Argon2id hash is stored next to the link.

use crate::services::{
    crypto::CryptoError,
    deletion::DeletionAuthority,
    name_allocator::{
        AllocError, NameAllocator, NameRegistry, URL_SAFE_ALPHABET, ZERO_WIDTH_ALPHABET,
    },
    storage_service::{StorageError, StorageResult, StorageService},
};
use thiserror::Error;
use tracing::info;
use url::Url;

pub const VISIBLE_TOKEN_LEN: usize = 8;
pub const ZERO_WIDTH_TOKEN_LEN: usize = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenAlphabet {
    #[default]
    Visible,
    /// Built from zero-width code points, for links hidden inside text.
    ZeroWidth,
}

impl TokenAlphabet {
    pub fn from_mode(mode: Option<&str>) -> Self {
        match mode {
            Some("zw") => Self::ZeroWidth,
            _ => Self::Visible,
        }
    }

    fn allocator(self) -> (NameAllocator, usize) {
        match self {
            Self::Visible => (NameAllocator::new(URL_SAFE_ALPHABET), VISIBLE_TOKEN_LEN),
            Self::ZeroWidth => (NameAllocator::new(ZERO_WIDTH_ALPHABET), ZERO_WIDTH_TOKEN_LEN),
        }
    }
}

#[derive(Debug, Error)]
pub enum ShortLinkError {
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Invalid deletion key!")]
    Unauthorized,
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

#[derive(Debug, Clone)]
pub struct CreatedLink {
    pub name: String,
    pub deletion_token: String,
}

/// Claims a token by inserting the link and its deletion hash together.
struct PendingLink<'a> {
    store: &'a StorageService,
    url: &'a str,
    hash: &'a str,
}

impl NameRegistry for PendingLink<'_> {
    async fn try_claim(&self, name: &str) -> StorageResult<bool> {
        self.store.claim_short_link(name, self.url, self.hash).await
    }
}

#[derive(Clone)]
pub struct ShortLinkRegistry {
    store: StorageService,
    deletion: DeletionAuthority,
}

impl ShortLinkRegistry {
    pub fn new(store: StorageService, deletion: DeletionAuthority) -> Self {
        Self { store, deletion }
    }

    /// Only absolute http(s) URLs are accepted as destinations.
    pub fn parse_destination(raw: &str) -> Result<Url, ShortLinkError> {
        let url = Url::parse(raw).map_err(|_| ShortLinkError::InvalidUrl)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            _ => Err(ShortLinkError::InvalidUrl),
        }
    }

    pub async fn create(
        &self,
        destination: &Url,
        alphabet: TokenAlphabet,
    ) -> Result<CreatedLink, ShortLinkError> {
        let issued = self.deletion.issue().await?;
        let pending = PendingLink {
            store: &self.store,
            url: destination.as_str(),
            hash: &issued.stored_hash,
        };
        let (allocator, length) = alphabet.allocator();
        let name = allocator.reserve(&pending, length, None).await?;

        info!(host = destination.host_str().unwrap_or(""), "short link created");
        Ok(CreatedLink {
            name,
            deletion_token: issued.token,
        })
    }

    pub async fn resolve(&self, name: &str) -> StorageResult<Option<String>> {
        self.store.short_link_url(name).await
    }

    /// Delete a link. An unknown token and a wrong deletion key are the same
    /// `Unauthorized` to the caller.
    pub async fn delete(&self, name: &str, deletion_token: &str) -> Result<bool, ShortLinkError> {
        let Some(hash) = self.store.short_deletion_hash(name).await? else {
            return Err(ShortLinkError::Unauthorized);
        };
        if !self.deletion.verify(deletion_token, &hash).await? {
            return Err(ShortLinkError::Unauthorized);
        }
        let removed = self.store.delete_short_link(name).await?;
        info!("short link deleted");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::test_storage,
        services::secret_hash::{HashParams, SecretHasher},
    };

    fn registry(store: StorageService) -> ShortLinkRegistry {
        let hasher = SecretHasher::new(&HashParams::fast()).unwrap();
        ShortLinkRegistry::new(store, DeletionAuthority::new(hasher))
    }

    #[test]
    fn only_http_destinations() {
        assert!(ShortLinkRegistry::parse_destination("https://example.com/a?b=c").is_ok());
        assert!(ShortLinkRegistry::parse_destination("http://example.com").is_ok());
        assert!(matches!(
            ShortLinkRegistry::parse_destination("javascript:alert(1)"),
            Err(ShortLinkError::InvalidUrl)
        ));
        assert!(matches!(
            ShortLinkRegistry::parse_destination("not a url"),
            Err(ShortLinkError::InvalidUrl)
        ));
    }

    #[tokio::test]
    async fn create_and_resolve_visible_token() {
        let (store, _dir) = test_storage().await;
        let links = registry(store);
        let url = ShortLinkRegistry::parse_destination("https://example.com/page").unwrap();
        let created = links.create(&url, TokenAlphabet::Visible).await.unwrap();

        assert_eq!(created.name.chars().count(), VISIBLE_TOKEN_LEN);
        assert!(created.name.chars().all(|c| URL_SAFE_ALPHABET.contains(c)));
        assert_eq!(created.deletion_token.len(), 128);
        assert_eq!(
            links.resolve(&created.name).await.unwrap().as_deref(),
            Some("https://example.com/page")
        );
    }

    #[tokio::test]
    async fn zero_width_token_is_invisible() {
        let (store, _dir) = test_storage().await;
        let links = registry(store);
        let url = ShortLinkRegistry::parse_destination("https://example.com/").unwrap();
        let created = links
            .create(&url, TokenAlphabet::from_mode(Some("zw")))
            .await
            .unwrap();
        assert_eq!(created.name.chars().count(), ZERO_WIDTH_TOKEN_LEN);
        assert!(created.name.chars().all(|c| ZERO_WIDTH_ALPHABET.contains(c)));
        assert!(links.resolve(&created.name).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn deletion_requires_matching_token() {
        let (store, _dir) = test_storage().await;
        let links = registry(store);
        let url = ShortLinkRegistry::parse_destination("https://example.com/").unwrap();
        let a = links.create(&url, TokenAlphabet::Visible).await.unwrap();
        let b = links.create(&url, TokenAlphabet::Visible).await.unwrap();

        assert!(matches!(
            links.delete(&a.name, &b.deletion_token).await,
            Err(ShortLinkError::Unauthorized)
        ));
        assert!(links.resolve(&a.name).await.unwrap().is_some());

        assert!(matches!(
            links.delete("missing1", &a.deletion_token).await,
            Err(ShortLinkError::Unauthorized)
        ));

        assert!(links.delete(&a.name, &a.deletion_token).await.unwrap());
        assert!(links.resolve(&a.name).await.unwrap().is_none());
        assert!(links.resolve(&b.name).await.unwrap().is_some());
    }
}
