//! Wire types for the upload and shorten endpoints.

use serde::{Deserialize, Serialize};

/// Optional query parameters accepted by `POST /upload`.
///
/// Everything arrives as text and is validated by the lifecycle coordinator,
/// so malformed numbers surface as specific 400s instead of extractor
/// rejections.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadQuery {
    pub encryption: Option<String>,
    pub encryption_key: Option<String>,
    pub key_length: Option<String>,
    pub name_length: Option<String>,

    pub embed: Option<String>,
    #[serde(rename = "embedMDY")]
    pub embed_mdy: Option<String>,
    pub embed_timezone: Option<String>,
    pub embed_text: Option<String>,
    pub embed_color: Option<String>,
    pub embed_description: Option<String>,
    pub embed_header: Option<String>,
    pub embed_author: Option<String>,

    pub expire: Option<String>,
    pub expire_uses: Option<String>,
    pub expire_time: Option<String>,

    #[serde(rename = "onlyURL")]
    pub only_url: Option<String>,
    /// Comma-separated alternate hosts; one is picked for the derived URL.
    pub random: Option<String>,
}

/// Successful upload response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub success: bool,
    pub name: String,
    pub deletion_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub random: Option<String>,
    #[serde(rename = "deducedURL")]
    pub deduced_url: String,
}

/// Query parameters accepted by `GET /shorten`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ShortenQuery {
    pub url: Option<String>,
    /// `zw` selects the zero-width alphabet.
    pub mode: Option<String>,
    pub random: Option<String>,
}

/// Successful shorten response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortenReceipt {
    pub success: bool,
    pub name: String,
    pub deletion_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub random: Option<String>,
}

/// Query for `GET /oembed`.
#[derive(Debug, Deserialize)]
pub struct OEmbedQuery {
    pub name: Option<String>,
}
