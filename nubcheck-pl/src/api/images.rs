//! Signed image URLs

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::images::ImageStoreError;
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct SignedParams {
    pub expires: Option<i64>,
    pub sig: Option<String>,
}

/// GET /images/*key?expires=..&sig=..
///
/// Expired or tampered URLs get 403 before the store is touched.
pub async fn get_image(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<SignedParams>,
) -> ApiResult<impl IntoResponse> {
    let (Some(expires), Some(sig)) = (params.expires, params.sig) else {
        return Err(ApiError::Forbidden("Missing signature".to_string()));
    };

    if let Err(e) = state.images.verify_read_url(&key, expires, &sig) {
        tracing::warn!(key = %key, error = %e, "Rejected image URL");
        return Err(ApiError::Forbidden("Invalid or expired link".to_string()));
    }

    let image = state.images.load(&key).await.map_err(|e| match e {
        ImageStoreError::NotFound(_) | ImageStoreError::InvalidKey(_) => {
            ApiError::NotFound(format!("Image {}", key))
        }
        other => ApiError::Internal(other.to_string()),
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, image.content_type),
            (header::CACHE_CONTROL, "private, max-age=3600".to_string()),
        ],
        image.bytes,
    ))
}

pub fn image_routes() -> Router<AppState> {
    Router::new().route("/images/*key", get(get_image))
}
