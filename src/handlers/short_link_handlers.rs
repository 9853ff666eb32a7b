use super::credential;
use crate::{errors::AppError, models::upload::ShortenQuery, state::AppState};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Redirect},
};

/// `GET /shorten?url=&mode=&random=`
pub async fn shorten(
    State(state): State<AppState>,
    Query(query): Query<ShortenQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let receipt = state
        .lifecycle
        .shorten(&query, credential(&headers))
        .await?;
    Ok(Json(receipt))
}

/// `GET /delete-short/{token}/{name}`
pub async fn delete_short_link(
    State(state): State<AppState>,
    Path((token, name)): Path<(String, String)>,
) -> Result<Redirect, AppError> {
    state.lifecycle.delete_short_link(&name, &token).await?;
    Ok(Redirect::to("/deleted-short"))
}
