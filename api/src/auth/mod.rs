use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

use crate::AppState;
use crate::db;
use crate::db::Db;
use crate::error::AppError;
use crate::types::UserId;

/// Authenticated user extracted from the Authorization header.
///
/// The header must be `Bearer <token>` where the token was issued by
/// [`issue_session`] at sign-in. Every write operation takes this value
/// explicitly instead of reading an ambient "current user".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: i64,
}

/// トークンはDBにハッシュでのみ保存する
pub(crate) fn hash_token(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}

fn new_token() -> String {
    let mut raw = [0u8; 32];
    raw[..16].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    raw[16..].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    URL_SAFE_NO_PAD.encode(raw)
}

/// 新しいセッションを発行する。平文トークンは呼び出し元に一度だけ返る。
pub(crate) async fn issue_session(
    pool: &Db,
    user_id: &UserId,
    ttl_hours: i64,
) -> Result<IssuedSession, AppError> {
    let token = new_token();
    let now = db::now_millis();
    let expires_at = now + ttl_hours * 60 * 60 * 1000;
    db::sessions::create_session(pool, &hash_token(&token), user_id, now, expires_at).await?;
    Ok(IssuedSession { token, expires_at })
}

/// セッショントークンを検証し、認証されたユーザ情報を返す。
pub async fn authenticate(pool: &Db, token: &str) -> Result<AuthenticatedUser, AppError> {
    let session = db::sessions::get_live_session(pool, &hash_token(token), db::now_millis())
        .await?
        .ok_or_else(|| AppError::Unauthenticated("session expired or revoked".into()))?;

    let user_id = UserId(session.user_id);
    // セッションが残っていてもユーザが消えていれば無効
    let user = db::users::get_user(pool, &user_id)
        .await?
        .ok_or_else(|| AppError::Unauthenticated("user no longer exists".into()))?;

    Ok(AuthenticatedUser {
        user_id,
        email: user.email,
        name: user.name,
    })
}

/// `Authorization` ヘッダーから Bearer トークンを取り出す。
pub(crate) fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthenticated("missing authorization header".into()))?;
    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthenticated("expected a bearer token".into()))?;
    Ok(token)
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;
        authenticate(&state.pool, token).await
    }
}
