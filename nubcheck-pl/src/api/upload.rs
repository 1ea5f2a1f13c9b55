//! Paid scan upload

use axum::{
    extract::{Multipart, State},
    routing::post,
    Json, Router,
};
use serde::Serialize;

use crate::lifecycle::Upload;
use crate::store::InsertOutcome;
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub prediction_id: String,
}

#[derive(Default)]
struct UploadForm {
    image: Option<(Vec<u8>, String)>,
    session_id: Option<String>,
    email: Option<String>,
}

async fn read_form(mut multipart: Multipart) -> ApiResult<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read image: {}", e)))?;
                form.image = Some((bytes.to_vec(), content_type));
            }
            "session_id" | "email" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read {}: {}", name, e)))?;
                let value = value.trim().to_string();
                if value.is_empty() {
                    continue;
                }
                if name == "session_id" {
                    form.session_id = Some(value);
                } else {
                    form.email = Some(value);
                }
            }
            _ => {}
        }
    }

    Ok(form)
}

/// POST /api/upload
///
/// Multipart fields: `image` (jpeg/png/webp) and `session_id` (paid checkout
/// session). A retried upload for the same session returns the same id.
pub async fn upload(State(state): State<AppState>, multipart: Multipart) -> ApiResult<Json<UploadResponse>> {
    let form = read_form(multipart).await?;

    let (Some((image, content_type)), Some(session_id)) = (form.image, form.session_id) else {
        return Err(ApiError::BadRequest("Missing image or session ID".to_string()));
    };

    let outcome = state
        .lifecycle
        .ingest(Upload {
            session_id,
            image,
            content_type,
            email_hint: form.email,
        })
        .await?;

    let prediction_id = match outcome {
        InsertOutcome::Inserted(p) | InsertOutcome::Existing(p) => p.id,
    };

    Ok(Json(UploadResponse {
        success: true,
        prediction_id,
    }))
}

pub fn upload_routes() -> Router<AppState> {
    Router::new().route("/api/upload", post(upload))
}
