use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use crate::AppState;
use crate::auth::bearer_token;
use crate::error::AppError;
use crate::market::users::{self, SignIn};

pub fn routes() -> Router<AppState> {
    Router::new().route("/session", post(sign_in).delete(sign_out))
}

#[derive(Deserialize)]
struct SignInBody {
    /// IdP が発行した ID トークン
    credential: String,
}

/// サインイン（認証不要）
async fn sign_in(
    State(state): State<AppState>,
    Json(body): Json<SignInBody>,
) -> Result<Json<SignIn>, AppError> {
    let session = users::sign_in_or_register(&state, &body.credential).await?;
    Ok(Json(session))
}

async fn sign_out(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    let token = bearer_token(&headers)?;
    users::sign_out(&state, token).await?;
    Ok(Json(serde_json::json!({ "signed_out": true })))
}
