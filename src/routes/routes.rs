//! Route table.
//!
//! ## Objects
//!   - `POST /upload`: upload (raw or multipart body)
//!   - `GET  /{name}`: preview or bytes, else short link, else 404
//!   - `GET  /raw/{name}`: bytes only
//!   - `GET  /{passphrase}/{name}`: encrypted preview or bytes
//!   - `GET  /raw/{passphrase}/{name}`: encrypted bytes only
//!   - `GET  /delete/{token}/{name}`: delete, then 303 to `/deleted`
//!   - `GET  /oembed?name=`: embed descriptor
//!
//! ## Short links
//!   - `GET  /shorten?url=&mode=&random=`
//!   - `GET  /delete-short/{token}/{name}`: delete, then 303 to `/deleted-short`
//!
//! Static segments win over parameters, so `/raw/x` never reaches the
//! encrypted route and `/deleted` never reaches the object route.

use crate::{
    errors::AppError,
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{
            delete_object, get_encrypted_object, get_object, get_raw_encrypted_object,
            get_raw_object, oembed,
        },
        short_link_handlers::{delete_short_link, shorten},
        site_handlers::{deleted_page, deleted_short_page, list_domains},
        upload_handlers::upload,
    },
    state::AppState,
};
use axum::{
    Router,
    extract::{DefaultBodyLimit, Request},
    http::{HeaderValue, header::HeaderName},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};

/// Room for multipart framing on top of the payload limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn routes(size_limit: usize) -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/domains", get(list_domains))
        .route("/deleted", get(deleted_page))
        .route("/deleted-short", get(deleted_short_page))
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(
                size_limit.saturating_add(MULTIPART_OVERHEAD),
            )),
        )
        .route("/shorten", get(shorten))
        .route("/oembed", get(oembed))
        .route("/delete/{token}/{name}", get(delete_object))
        .route("/delete-short/{token}/{name}", get(delete_short_link))
        .route("/raw/{name}", get(get_raw_object))
        .route("/raw/{passphrase}/{name}", get(get_raw_encrypted_object))
        .route("/{name}", get(get_object))
        .route("/{passphrase}/{name}", get(get_encrypted_object))
        .layer(middleware::from_fn(path_hygiene))
}

/// Rejects `..` segments (raw or percent-encoded) and marks file-like paths
/// as not indexable.
async fn path_hygiene(request: Request, next: Next) -> Response {
    let path = request.uri().path();
    let traverses = path.split('/').any(|segment| {
        urlencoding::decode(segment).is_ok_and(|decoded| decoded.split(['/', '\\']).any(|s| s == ".."))
    });
    if traverses {
        return AppError::bad_request("Invalid path").into_response();
    }

    let file_like = path
        .rsplit('/')
        .next()
        .is_some_and(|last| last.contains('.'));

    let mut response = next.run(request).await;
    if file_like {
        response.headers_mut().insert(
            HeaderName::from_static("x-robots-tag"),
            HeaderValue::from_static("noindex"),
        );
    }
    response
}
