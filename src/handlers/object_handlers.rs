//! Object retrieval and deletion. Bodies are streamed straight from the
//! content directory, decrypted on the fly for encrypted objects.

use super::request_host;
use crate::{
    errors::AppError,
    models::upload::OEmbedQuery,
    services::lifecycle::{Retrieval, View},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
};

/// `GET /{name}`: plain object (preview or bytes), then short link, then 404.
pub async fn get_object(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let host = request_host(&headers).unwrap_or_default();
    match state.lifecycle.fetch_plain(&name, View::Rich, &host).await? {
        Retrieval::Missing => {}
        found => return Ok(into_response(found)),
    }

    match state.lifecycle.resolve_short_link(&name).await? {
        Some(url) => {
            let location = HeaderValue::from_str(&url).map_err(AppError::internal)?;
            Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
        }
        None => Err(AppError::not_found()),
    }
}

/// `GET /raw/{name}`
pub async fn get_raw_object(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    match state.lifecycle.fetch_plain(&name, View::Raw, "").await? {
        Retrieval::Missing => Err(AppError::not_found()),
        found => Ok(into_response(found)),
    }
}

/// `GET /{passphrase}/{name}`
pub async fn get_encrypted_object(
    State(state): State<AppState>,
    Path((passphrase, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let host = request_host(&headers).unwrap_or_default();
    match state
        .lifecycle
        .fetch_encrypted(&passphrase, &name, View::Rich, &host)
        .await?
    {
        Retrieval::Missing => Err(AppError::not_found()),
        found => Ok(into_response(found)),
    }
}

/// `GET /raw/{passphrase}/{name}`
pub async fn get_raw_encrypted_object(
    State(state): State<AppState>,
    Path((passphrase, name)): Path<(String, String)>,
) -> Result<Response, AppError> {
    match state
        .lifecycle
        .fetch_encrypted(&passphrase, &name, View::Raw, "")
        .await?
    {
        Retrieval::Missing => Err(AppError::not_found()),
        found => Ok(into_response(found)),
    }
}

/// `GET /delete/{token}/{name}`
pub async fn delete_object(
    State(state): State<AppState>,
    Path((token, name)): Path<(String, String)>,
) -> Result<Redirect, AppError> {
    state.lifecycle.delete_object(&name, &token).await?;
    Ok(Redirect::to("/deleted"))
}

/// `GET /oembed?name=`
pub async fn oembed(
    State(state): State<AppState>,
    Query(query): Query<OEmbedQuery>,
) -> Result<Response, AppError> {
    let name = query
        .name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::bad_request("No name provided"))?;
    let descriptor = state.lifecycle.oembed(&name).await?;
    Ok(Json(descriptor).into_response())
}

fn into_response(retrieval: Retrieval) -> Response {
    match retrieval {
        Retrieval::Payload(payload) => {
            let content_type = HeaderValue::from_str(&payload.content_type)
                .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
            let mut response = Response::new(Body::from_stream(payload.body));
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, content_type);
            response
        }
        Retrieval::Preview(page) => Html(page).into_response(),
        Retrieval::Missing => AppError::not_found().into_response(),
    }
}
