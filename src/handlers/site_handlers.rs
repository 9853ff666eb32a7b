//! Static-ish pages and the public domain list.

use crate::{services::embed::html_escape, state::AppState};
use axum::{Json, extract::State, response::Html};

/// `GET /api/domains`
pub async fn list_domains(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.domains.entries())
}

/// `GET /deleted`
pub async fn deleted_page(State(state): State<AppState>) -> Html<String> {
    confirmation(state.site_name(), "File deleted", "The file has been deleted.")
}

/// `GET /deleted-short`
pub async fn deleted_short_page(State(state): State<AppState>) -> Html<String> {
    confirmation(
        state.site_name(),
        "Link deleted",
        "The short link has been deleted.",
    )
}

fn confirmation(site_name: &str, title: &str, message: &str) -> Html<String> {
    let site_name = html_escape(site_name);
    Html(format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\">\
         <title>{title} - {site_name}</title></head>\n\
         <body><h1>{title}</h1><p>{message}</p></body>\n</html>"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_escapes_site_name() {
        let Html(page) = confirmation("<b>\"Drop\" & Co</b>", "File deleted", "Gone.");
        assert!(page.contains("&lt;b&gt;&quot;Drop&quot; &amp; Co&lt;/b&gt;"));
        assert!(!page.contains("<b>"));
    }
}
