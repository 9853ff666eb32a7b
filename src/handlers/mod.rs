pub mod health_handlers;
pub mod object_handlers;
pub mod short_link_handlers;
pub mod site_handlers;
pub mod upload_handlers;

use axum::http::{HeaderMap, header};

/// `Host` header of the request, if it is valid text.
pub(crate) fn request_host(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Whether derived URLs should use https. Only a trusted proxy gets a say.
pub(crate) fn is_secure(headers: &HeaderMap, trust_proxy: bool) -> bool {
    trust_proxy
        && headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
}

pub(crate) fn credential(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}
