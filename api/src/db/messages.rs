use super::models::MessageRow;
use super::{Db, sql};
use crate::types::{ConversationId, MessageId, UserId};

#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub id: &'a MessageId,
    pub conversation_id: &'a ConversationId,
    pub sender_id: &'a UserId,
    pub sender_name: &'a str,
    pub receiver_id: &'a UserId,
    pub text: &'a str,
    pub image_url: Option<&'a str>,
    pub sent_at: i64,
}

#[tracing::instrument(skip(pool, message), fields(id = %message.id), err)]
pub async fn create_message(pool: &Db, message: &NewMessage<'_>) -> Result<(), sqlx::Error> {
    let q = sql("INSERT INTO messages
            (id, conversation_id, sender_id, sender_name, receiver_id, text, image_url, sent_at, is_read)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, FALSE)");
    sqlx::query(&q)
        .bind(message.id.as_str())
        .bind(message.conversation_id.as_str())
        .bind(message.sender_id.as_str())
        .bind(message.sender_name)
        .bind(message.receiver_id.as_str())
        .bind(message.text)
        .bind(message.image_url)
        .bind(message.sent_at)
        .execute(pool)
        .await?;
    Ok(())
}

/// 会話内の全メッセージを送信時刻の昇順で返す。
/// 同一ミリ秒のメッセージ同士の順序は規定しない。
#[tracing::instrument(skip(pool), err)]
pub async fn list_messages(
    pool: &Db,
    conversation_id: &ConversationId,
) -> Result<Vec<MessageRow>, sqlx::Error> {
    let q = sql("SELECT * FROM messages WHERE conversation_id = ? ORDER BY sent_at ASC");
    sqlx::query_as::<_, MessageRow>(&q)
        .bind(conversation_id.as_str())
        .fetch_all(pool)
        .await
}

/// 閲覧者宛ての未読メッセージを既読にし、更新件数を返す。
/// 既に全件既読なら何も変わらない。
#[tracing::instrument(skip(pool), err)]
pub async fn mark_read(
    pool: &Db,
    conversation_id: &ConversationId,
    reader_id: &UserId,
) -> Result<u64, sqlx::Error> {
    let q = sql("UPDATE messages SET is_read = TRUE
         WHERE conversation_id = ? AND receiver_id = ? AND is_read = FALSE");
    let result = sqlx::query(&q)
        .bind(conversation_id.as_str())
        .bind(reader_id.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// 未読件数（一覧の集計値ではなく messages から直接数える）
#[cfg(all(test, not(feature = "postgres")))]
pub(crate) async fn count_unread(
    pool: &Db,
    conversation_id: &ConversationId,
    reader_id: &UserId,
) -> Result<i64, sqlx::Error> {
    let q = sql("SELECT COUNT(*) FROM messages
         WHERE conversation_id = ? AND receiver_id = ? AND is_read = FALSE");
    let (count,): (i64,) = sqlx::query_as(&q)
        .bind(conversation_id.as_str())
        .bind(reader_id.as_str())
        .fetch_one(pool)
        .await?;
    Ok(count)
}
