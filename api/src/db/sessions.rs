use super::models::SessionRow;
use super::{Db, sql};
use crate::types::UserId;

#[tracing::instrument(skip(pool, token_hash), err)]
pub async fn create_session(
    pool: &Db,
    token_hash: &str,
    user_id: &UserId,
    created_at: i64,
    expires_at: i64,
) -> Result<(), sqlx::Error> {
    let q = sql(
        "INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
    );
    sqlx::query(&q)
        .bind(token_hash)
        .bind(user_id.as_str())
        .bind(created_at)
        .bind(expires_at)
        .execute(pool)
        .await?;
    Ok(())
}

/// 有効期限内のセッションのみ返す。
#[tracing::instrument(skip(pool, token_hash), err)]
pub async fn get_live_session(
    pool: &Db,
    token_hash: &str,
    now: i64,
) -> Result<Option<SessionRow>, sqlx::Error> {
    let q = sql("SELECT * FROM sessions WHERE token_hash = ? AND expires_at > ?");
    sqlx::query_as::<_, SessionRow>(&q)
        .bind(token_hash)
        .bind(now)
        .fetch_optional(pool)
        .await
}

#[tracing::instrument(skip(pool, token_hash), err)]
pub async fn delete_session(pool: &Db, token_hash: &str) -> Result<bool, sqlx::Error> {
    let q = sql("DELETE FROM sessions WHERE token_hash = ?");
    let result = sqlx::query(&q).bind(token_hash).execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

/// 期限切れセッションを削除し、削除件数を返す。
#[tracing::instrument(skip(pool), err)]
pub async fn delete_expired_sessions(pool: &Db, now: i64) -> Result<u64, sqlx::Error> {
    let q = sql("DELETE FROM sessions WHERE expires_at <= ?");
    let result = sqlx::query(&q).bind(now).execute(pool).await?;
    Ok(result.rows_affected())
}
