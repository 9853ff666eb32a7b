//! Link-preview metadata attached to visual uploads.

use serde::{Deserialize, Serialize};

/// Embed data stored as JSON in `embed_data`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Embed {
    /// Theme color as `0xRRGGBB`.
    pub color: u32,

    /// Preview title.
    pub text: Option<String>,

    /// Whether the payload is a video (player card) rather than an image.
    pub video: bool,

    /// Rendered upload time, e.g. `3:07 PM 16/10/2026`.
    pub uploaded_at: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Shown as the oEmbed provider name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,

    /// Shown as the oEmbed author name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl Embed {
    /// Theme color formatted as `#RRGGBB`.
    pub fn color_hex(&self) -> String {
        format!("#{:06X}", self.color & 0xFF_FFFF)
    }
}

/// Minimal oEmbed descriptor served by `/oembed`.
#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct OEmbed {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
}

impl From<&Embed> for OEmbed {
    fn from(embed: &Embed) -> Self {
        Self {
            kind: "link",
            version: "1.0",
            provider_name: embed.header.clone(),
            author_name: embed.author.clone(),
        }
    }
}
