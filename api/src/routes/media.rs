use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};

use crate::AppState;
use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::storage::{MAX_IMAGE_SIZE, validate_image};

pub fn routes() -> Router<AppState> {
    Router::new().route(
        "/media",
        // multipart のオーバーヘッド分だけ上限に余裕を持たせる
        post(upload_image).layer(DefaultBodyLimit::max(MAX_IMAGE_SIZE + 1024 * 1024)),
    )
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge("image must be 10 MB or smaller".into())
    } else {
        AppError::BadRequest(format!("multipart error: {e}"))
    }
}

/// 画像アップロード（multipart: image）。公開 URL を返す。
async fn upload_image(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut image: Option<(Vec<u8>, String)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(multipart_error)?
    {
        if field.name() != Some("image") {
            continue;
        }
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(multipart_error)?;
        image = Some((data.to_vec(), content_type));
    }

    let (data, content_type) =
        image.ok_or_else(|| AppError::BadRequest("missing image field".into()))?;
    validate_image(&data, &content_type)?;
    let size = data.len();
    let url = state.media.upload(data, &content_type).await?;
    tracing::info!(user_id = %auth.user_id, size, "image uploaded");

    Ok(Json(serde_json::json!({ "url": url })))
}
