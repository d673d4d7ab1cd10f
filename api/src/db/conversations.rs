use super::models::ConversationRow;
use super::{Db, sql};
use crate::types::{ConversationId, ListingId, UserId};

#[derive(Debug, Clone)]
pub struct NewConversation<'a> {
    pub id: &'a ConversationId,
    pub listing_id: &'a ListingId,
    pub listing_title: &'a str,
    pub listing_image_url: Option<&'a str>,
    pub buyer_id: &'a UserId,
    pub buyer_name: &'a str,
    pub seller_id: &'a UserId,
    pub seller_name: &'a str,
    pub created_at: i64,
}

/// 会話が未作成であれば作成する。作成した場合は true。
/// 存在確認と作成を1文で行うため、初回連絡が同時に来ても行は1つに収まる。
#[tracing::instrument(skip(pool, conversation), fields(id = %conversation.id), err)]
pub async fn create_conversation_if_absent(
    pool: &Db,
    conversation: &NewConversation<'_>,
) -> Result<bool, sqlx::Error> {
    let q = sql("INSERT INTO conversations
            (id, listing_id, listing_title, listing_image_url, buyer_id, buyer_name,
             seller_id, seller_name, last_message, last_message_at, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, '', ?, ?)
         ON CONFLICT (id) DO NOTHING");
    let result = sqlx::query(&q)
        .bind(conversation.id.as_str())
        .bind(conversation.listing_id.as_str())
        .bind(conversation.listing_title)
        .bind(conversation.listing_image_url)
        .bind(conversation.buyer_id.as_str())
        .bind(conversation.buyer_name)
        .bind(conversation.seller_id.as_str())
        .bind(conversation.seller_name)
        .bind(conversation.created_at)
        .bind(conversation.created_at)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[tracing::instrument(skip(pool), err)]
pub async fn get_conversation(
    pool: &Db,
    id: &ConversationId,
) -> Result<Option<ConversationRow>, sqlx::Error> {
    let q = sql("SELECT * FROM conversations WHERE id = ?");
    sqlx::query_as::<_, ConversationRow>(&q)
        .bind(id.as_str())
        .fetch_optional(pool)
        .await
}

/// 買い手として参加している会話（未読数は閲覧者宛てのもの）
#[tracing::instrument(skip(pool), err)]
pub async fn list_as_buyer(pool: &Db, user_id: &UserId) -> Result<Vec<ConversationRow>, sqlx::Error> {
    let q = sql("SELECT c.*, \
         (SELECT COUNT(*) FROM messages m \
          WHERE m.conversation_id = c.id AND m.receiver_id = ? AND m.is_read = FALSE) AS unread_count \
         FROM conversations c WHERE c.buyer_id = ? \
         ORDER BY c.last_message_at DESC");
    sqlx::query_as::<_, ConversationRow>(&q)
        .bind(user_id.as_str())
        .bind(user_id.as_str())
        .fetch_all(pool)
        .await
}

/// 売り手として参加している会話
#[tracing::instrument(skip(pool), err)]
pub async fn list_as_seller(
    pool: &Db,
    user_id: &UserId,
) -> Result<Vec<ConversationRow>, sqlx::Error> {
    let q = sql("SELECT c.*, \
         (SELECT COUNT(*) FROM messages m \
          WHERE m.conversation_id = c.id AND m.receiver_id = ? AND m.is_read = FALSE) AS unread_count \
         FROM conversations c WHERE c.seller_id = ? \
         ORDER BY c.last_message_at DESC");
    sqlx::query_as::<_, ConversationRow>(&q)
        .bind(user_id.as_str())
        .bind(user_id.as_str())
        .fetch_all(pool)
        .await
}

/// 最終メッセージの要約を更新する。メッセージ本体とは別の書き込み。
#[tracing::instrument(skip(pool, last_message), err)]
pub async fn update_summary(
    pool: &Db,
    id: &ConversationId,
    last_message: &str,
    last_message_at: i64,
) -> Result<bool, sqlx::Error> {
    let q = sql("UPDATE conversations SET last_message = ?, last_message_at = ? WHERE id = ?");
    let result = sqlx::query(&q)
        .bind(last_message)
        .bind(last_message_at)
        .bind(id.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// メッセージログから要約を作り直す。要約の更新が失敗したまま残った会話の修復用。
#[tracing::instrument(skip(pool), err)]
pub async fn rebuild_summary(pool: &Db, id: &ConversationId) -> Result<bool, sqlx::Error> {
    let q = sql("SELECT text, image_url, sent_at FROM messages WHERE conversation_id = ?
         ORDER BY sent_at DESC LIMIT 1");
    let latest: Option<(String, Option<String>, i64)> = sqlx::query_as(&q)
        .bind(id.as_str())
        .fetch_optional(pool)
        .await?;
    let Some((text, image_url, sent_at)) = latest else {
        return Ok(false);
    };
    let summary = summarize(&text, image_url.is_some());
    update_summary(pool, id, &summary, sent_at).await
}

/// 一覧表示用の要約文。画像のみのメッセージは固定文言にする。
pub fn summarize(text: &str, has_image: bool) -> String {
    let text = text.trim();
    if text.is_empty() && has_image {
        "Photo".to_string()
    } else {
        text.to_string()
    }
}
