//! `POST /upload`: accepts a raw body (type from `Content-Type`) or a
//! single-file `multipart/form-data` body (type from the file part).

use super::{credential, is_secure, request_host};
use crate::{
    errors::AppError,
    models::upload::UploadQuery,
    services::lifecycle::UploadRequest,
    state::AppState,
};
use axum::{
    Json,
    body::Bytes,
    extract::{FromRequest, Multipart, Query, Request, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::debug;

pub async fn upload(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    request: Request,
) -> Result<Response, AppError> {
    let header_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let (body, content_type) = match header_type.as_deref() {
        Some(ct) if ct.to_ascii_lowercase().starts_with("multipart/form-data") => {
            let multipart = Multipart::from_request(request, &state)
                .await
                .map_err(|rejection| AppError::new(rejection.status(), rejection.body_text()))?;
            read_file_part(multipart).await?
        }
        _ => {
            // Over-limit bodies are rejected with 413, any other read failure with 400.
            let body = Bytes::from_request(request, &state)
                .await
                .map_err(|rejection| AppError::new(rejection.status(), rejection.body_text()))?;
            (body, header_type)
        }
    };

    let outcome = state
        .lifecycle
        .upload(UploadRequest {
            body,
            content_type,
            credential: credential(&headers).map(str::to_string),
            host: request_host(&headers),
            secure: is_secure(&headers, state.trust_proxy),
            query,
        })
        .await?;

    if outcome.only_url {
        return Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            outcome.receipt.deduced_url,
        )
            .into_response());
    }
    Ok(Json(outcome.receipt).into_response())
}

/// First part carrying a file name (or named `file`) wins.
async fn read_file_part(mut multipart: Multipart) -> Result<(Bytes, Option<String>), AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::new(err.status(), err.body_text()))?
    {
        if field.file_name().is_none() && field.name() != Some("file") {
            debug!(field = ?field.name(), "skipping non-file multipart field");
            continue;
        }
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|err| AppError::new(err.status(), err.body_text()))?;
        return Ok((bytes, content_type));
    }
    Err(AppError::bad_request("No file provided"))
}
