//! Link-preview metadata: validation, placeholder rendering and the preview
//! page served to link-unfurling crawlers.

use crate::models::{embed::Embed, upload::UploadQuery};
use chrono::{DateTime, Duration, Utc};
use humansize::{DECIMAL, format_size};
use regex::{Captures, Regex};
use std::sync::LazyLock;
use thiserror::Error;

pub const MAX_FIELD_LEN: usize = 480;
pub const DEFAULT_COLOR: u32 = 0xFF_FFFF;
const MAX_OFFSET_HOURS: i64 = 23;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([A-Za-z0-9_\-]+)\]").expect("placeholder pattern"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmbedError {
    #[error("Cannot embed a non-visual upload!")]
    NotVisual,
    #[error("Invalid timezone offset!")]
    InvalidTimezone,
    #[error("Invalid color!")]
    InvalidColor,
    #[error("Embed {0} too long!")]
    TooLong(&'static str),
}

/// Validated embed options. Templates are rendered once the identifier is
/// known.
#[derive(Debug, Clone)]
pub struct EmbedDraft {
    color: u32,
    video: bool,
    month_first: bool,
    offset_hours: i64,
    text: Option<String>,
    description: Option<String>,
    header: Option<String>,
    author: Option<String>,
}

impl EmbedDraft {
    /// Validate the embed parameters of an upload. `None` when no embed was
    /// requested.
    pub fn from_query(query: &UploadQuery, content_type: &str) -> Result<Option<Self>, EmbedError> {
        if query.embed.as_deref() != Some("yes") {
            return Ok(None);
        }
        let video = content_type.starts_with("video/");
        if !video && !content_type.starts_with("image/") {
            return Err(EmbedError::NotVisual);
        }

        let offset_hours = match query.embed_timezone.as_deref() {
            None | Some("") => 0,
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|h| h.abs() <= MAX_OFFSET_HOURS)
                .ok_or(EmbedError::InvalidTimezone)?,
        };

        Ok(Some(Self {
            color: parse_color(query.embed_color.as_deref())?,
            video,
            month_first: query.embed_mdy.as_deref() == Some("yes"),
            offset_hours,
            text: bounded(query.embed_text.as_deref(), "text")?,
            description: bounded(query.embed_description.as_deref(), "description")?,
            header: bounded(query.embed_header.as_deref(), "header")?,
            author: bounded(query.embed_author.as_deref(), "author")?,
        }))
    }

    /// Fill placeholders for the stored object `name` of `size` bytes.
    pub fn render(&self, name: &str, size: u64, now: DateTime<Utc>, site_name: &str) -> Embed {
        let local = now + Duration::hours(self.offset_hours);
        let date_format = if self.month_first { "%-m/%-d/%Y" } else { "%-d/%-m/%Y" };
        let time = local.format("%-I:%M %p").to_string();
        let date = local.format(date_format).to_string();
        let (stem, extension) = name.rsplit_once('.').unwrap_or((name, ""));
        let size = format_size(size, DECIMAL.decimal_places(1)).to_uppercase();

        let context = [
            ("UPLOAD_TIME", time.as_str()),
            ("UPLOAD_DATE", date.as_str()),
            ("UPLOAD_EXTENSION", extension),
            ("UPLOAD_NAME", stem),
            ("UPLOAD_SIZE", size.as_str()),
        ];
        let fill = |template: &Option<String>| {
            template
                .as_deref()
                .map(|t| replace_placeholders(t, &context))
        };

        Embed {
            color: self.color,
            text: fill(&self.text).or_else(|| Some(site_name.to_string())),
            video: self.video,
            uploaded_at: format!("{time} {date}"),
            description: fill(&self.description),
            header: fill(&self.header),
            author: fill(&self.author),
        }
    }
}

fn bounded(value: Option<&str>, field: &'static str) -> Result<Option<String>, EmbedError> {
    match value {
        None | Some("") => Ok(None),
        Some(v) if v.chars().count() > MAX_FIELD_LEN => Err(EmbedError::TooLong(field)),
        Some(v) => Ok(Some(v.to_string())),
    }
}

/// `RANDOM`, a decimal in `0..=0xFFFFFF`, or `#RRGGBB`.
fn parse_color(raw: Option<&str>) -> Result<u32, EmbedError> {
    let raw = match raw {
        None | Some("") => return Ok(DEFAULT_COLOR),
        Some(raw) => raw,
    };
    if raw == "RANDOM" {
        return Ok(rand::random::<u32>() & 0xFF_FFFF);
    }
    let parsed = if raw.bytes().all(|b| b.is_ascii_digit()) {
        raw.parse::<u32>().ok()
    } else {
        raw.strip_prefix('#')
            .filter(|hex| hex.len() == 6)
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
    };
    parsed
        .filter(|c| *c <= 0xFF_FFFF)
        .ok_or(EmbedError::InvalidColor)
}

/// Replace `[NAME]` placeholders, case-insensitively. Unknown names are kept.
fn replace_placeholders(template: &str, context: &[(&str, &str)]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let key = caps[1].to_uppercase();
            context
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// HTML document for link-preview crawlers; browsers are bounced to the raw
/// variant by script.
///
/// `raw_path` must already be percent-encoded.
pub fn preview_page(embed: &Embed, host: &str, raw_path: &str, name: &str, site_name: &str) -> String {
    let host = html_escape(host);
    let media_property = if embed.video { "twitter:player" } else { "og:image" };
    let card = if embed.video { "player" } else { "summary_large_image" };
    let description = embed
        .description
        .clone()
        .unwrap_or_else(|| format!("Uploaded at {}", embed.uploaded_at));

    format!(
        r#"<!DOCTYPE html>
<html lang="en" prefix="og: http://ogp.me/ns#">
<head>
<link rel="alternate" type="application/json+oembed" href="https://{host}/oembed?name={oembed}" title="OEmbed">
<meta property="og:title" content="{title}">
<meta property="theme-color" content="{color}">
<meta property="{media_property}" content="https://{host}{raw}">
<meta name="twitter:card" content="{card}">
<meta property="og:description" content="{description}">
</head>
<body>
<script>location.pathname = "/raw" + location.pathname;</script>
</body>
</html>"#,
        oembed = html_escape(&urlencoding::encode(name)),
        title = html_escape(embed.text.as_deref().unwrap_or(site_name)),
        color = embed.color_hex(),
        raw = html_escape(raw_path),
        description = html_escape(&description),
    )
}

pub(crate) fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn query() -> UploadQuery {
        UploadQuery {
            embed: Some("yes".into()),
            ..Default::default()
        }
    }

    #[test]
    fn not_requested_is_none() {
        assert!(EmbedDraft::from_query(&UploadQuery::default(), "image/png").unwrap().is_none());
    }

    #[test]
    fn only_visual_uploads_embed() {
        assert_eq!(
            EmbedDraft::from_query(&query(), "text/plain").unwrap_err(),
            EmbedError::NotVisual
        );
        let draft = EmbedDraft::from_query(&query(), "video/mp4").unwrap().unwrap();
        assert!(draft.video);
    }

    #[test]
    fn color_forms() {
        assert_eq!(parse_color(None).unwrap(), DEFAULT_COLOR);
        assert_eq!(parse_color(Some("255")).unwrap(), 255);
        assert_eq!(parse_color(Some("#00ff7F")).unwrap(), 0x00FF7F);
        assert!(parse_color(Some("RANDOM")).unwrap() <= 0xFF_FFFF);
        assert_eq!(parse_color(Some("16777216")).unwrap_err(), EmbedError::InvalidColor);
        assert_eq!(parse_color(Some("#12345")).unwrap_err(), EmbedError::InvalidColor);
        assert_eq!(parse_color(Some("red")).unwrap_err(), EmbedError::InvalidColor);
    }

    #[test]
    fn timezone_bounds() {
        let mut q = query();
        q.embed_timezone = Some("-23".into());
        assert!(EmbedDraft::from_query(&q, "image/png").is_ok());
        q.embed_timezone = Some("24".into());
        assert_eq!(
            EmbedDraft::from_query(&q, "image/png").unwrap_err(),
            EmbedError::InvalidTimezone
        );
        q.embed_timezone = Some("east".into());
        assert_eq!(
            EmbedDraft::from_query(&q, "image/png").unwrap_err(),
            EmbedError::InvalidTimezone
        );
    }

    #[test]
    fn field_length_limit() {
        let mut q = query();
        q.embed_author = Some("a".repeat(MAX_FIELD_LEN));
        assert!(EmbedDraft::from_query(&q, "image/png").is_ok());
        q.embed_author = Some("a".repeat(MAX_FIELD_LEN + 1));
        assert_eq!(
            EmbedDraft::from_query(&q, "image/png").unwrap_err(),
            EmbedError::TooLong("author")
        );
    }

    #[test]
    fn render_fills_placeholders() {
        let mut q = query();
        q.embed_text = Some("[upload_name].[UPLOAD_EXTENSION] ([UPLOAD_SIZE]) [NOPE]".into());
        q.embed_description = Some("at [UPLOAD_TIME] on [UPLOAD_DATE]".into());
        q.embed_mdy = Some("yes".into());
        q.embed_timezone = Some("2".into());
        q.embed_color = Some("#0000FF".into());
        let draft = EmbedDraft::from_query(&q, "image/png").unwrap().unwrap();

        let now = Utc.with_ymd_and_hms(2026, 10, 3, 13, 5, 0).unwrap();
        let embed = draft.render("AbCdEf.png", 11, now, "drophost");

        assert_eq!(embed.text.as_deref(), Some("AbCdEf.png (11 B) [NOPE]"));
        assert_eq!(embed.description.as_deref(), Some("at 3:05 PM on 10/3/2026"));
        assert_eq!(embed.uploaded_at, "3:05 PM 10/3/2026");
        assert_eq!(embed.color_hex(), "#0000FF");
    }

    #[test]
    fn render_defaults_text_to_site_name() {
        let draft = EmbedDraft::from_query(&query(), "image/gif").unwrap().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 0, 30, 0).unwrap();
        let embed = draft.render("x.gif", 1, now, "drophost");
        assert_eq!(embed.text.as_deref(), Some("drophost"));
        assert_eq!(embed.uploaded_at, "12:30 AM 2/1/2026");
        assert_eq!(embed.color, DEFAULT_COLOR);
    }

    #[test]
    fn preview_escapes_user_text() {
        let embed = Embed {
            color: 0x123456,
            text: Some("<script>\"hi\"</script>".into()),
            video: false,
            uploaded_at: "1:00 PM 1/1/2026".into(),
            description: None,
            header: None,
            author: None,
        };
        let page = preview_page(&embed, "files.example", "/raw/a.png", "a.png", "drophost");
        assert!(page.contains("&lt;script&gt;&quot;hi&quot;&lt;/script&gt;"));
        assert!(!page.contains("<script>\"hi\""));
        assert!(page.contains(r##"content="#123456""##));
        assert!(page.contains(r#"property="og:image" content="https://files.example/raw/a.png""#));
        assert!(page.contains("Uploaded at 1:00 PM 1/1/2026"));
    }
}
