use std::collections::HashSet;

use crate::AppState;
use crate::auth::AuthenticatedUser;
use crate::db;
use crate::db::conversations::{NewConversation, summarize};
use crate::db::messages::NewMessage;
use crate::db::models::{ConversationRow, MessageRow};
use crate::error::AppError;
use crate::live::{Change, ChangeKind, Subscription};
use crate::types::{ConversationId, ListingId, MessageId, UserId};

fn change_for(conversation: &ConversationRow, kind: ChangeKind) -> Change {
    Change {
        conversation_id: ConversationId(conversation.id.clone()),
        buyer_id: UserId(conversation.buyer_id.clone()),
        seller_id: UserId(conversation.seller_id.clone()),
        kind,
    }
}

/// 参加者であることを確認して会話を返す。
async fn conversation_for(
    state: &AppState,
    viewer: &UserId,
    id: &ConversationId,
) -> Result<ConversationRow, AppError> {
    let conversation = db::conversations::get_conversation(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("conversation not found".into()))?;
    if !conversation.is_participant(viewer) {
        return Err(AppError::Forbidden(
            "not a participant of this conversation".into(),
        ));
    }
    Ok(conversation)
}

/// 出品について出品者との会話を開く。既にあればそれを返す。
///
/// 会話IDは (出品, 買い手, 売り手) から決まるので、何度呼んでも、同時に呼ばれても
/// 行は1つしかできない。
pub async fn get_or_create_conversation(
    state: &AppState,
    buyer: &AuthenticatedUser,
    listing_id: &ListingId,
) -> Result<ConversationRow, AppError> {
    let listing = crate::market::listings::get(state, listing_id).await?;
    if listing.owner_id == buyer.user_id {
        return Err(AppError::BadRequest(
            "cannot start a conversation about your own listing".into(),
        ));
    }

    let id = ConversationId::derive(listing_id, &buyer.user_id, &listing.owner_id);
    let created = db::conversations::create_conversation_if_absent(
        &state.pool,
        &NewConversation {
            id: &id,
            listing_id,
            listing_title: &listing.title,
            listing_image_url: Some(listing.image_url.as_str()).filter(|u| !u.is_empty()),
            buyer_id: &buyer.user_id,
            buyer_name: &buyer.name,
            seller_id: &listing.owner_id,
            seller_name: &listing.seller_name,
            created_at: db::now_millis(),
        },
    )
    .await?;

    let conversation = db::conversations::get_conversation(&state.pool, &id)
        .await?
        .ok_or_else(|| AppError::Internal("conversation vanished after creation".into()))?;
    if created {
        tracing::info!(conversation_id = %id, "conversation opened");
        state
            .live
            .publish(change_for(&conversation, ChangeKind::ConversationCreated));
    }
    Ok(conversation)
}

/// メッセージを送信する。宛先は会話の相手側になる。
///
/// メッセージ本体の追記と会話の要約更新は別々の書き込みで、要約は結果整合。
/// 要約の更新に失敗しても送信自体は成功とし、メッセージログから作り直す。
pub async fn send_message(
    state: &AppState,
    sender: &AuthenticatedUser,
    conversation_id: &ConversationId,
    text: &str,
    image_url: Option<&str>,
) -> Result<MessageRow, AppError> {
    let conversation = conversation_for(state, &sender.user_id, conversation_id).await?;
    let receiver = conversation
        .counterpart_of(&sender.user_id)
        .ok_or_else(|| AppError::Forbidden("not a participant of this conversation".into()))?;

    let text = text.trim();
    let image_url = image_url.map(str::trim).filter(|u| !u.is_empty());
    if text.is_empty() && image_url.is_none() {
        return Err(AppError::BadRequest("message is empty".into()));
    }

    let id = MessageId::new_v4();
    let sent_at = db::now_millis();
    db::messages::create_message(
        &state.pool,
        &NewMessage {
            id: &id,
            conversation_id,
            sender_id: &sender.user_id,
            sender_name: &sender.name,
            receiver_id: &receiver,
            text,
            image_url,
            sent_at,
        },
    )
    .await?;

    let summary = summarize(text, image_url.is_some());
    if let Err(e) =
        db::conversations::update_summary(&state.pool, conversation_id, &summary, sent_at).await
    {
        tracing::warn!(
            conversation_id = %conversation_id,
            error = %e,
            "conversation summary update failed, rebuilding from message log"
        );
        let pool = state.pool.clone();
        let conversation_id = conversation_id.clone();
        tokio::spawn(async move {
            if let Err(e) = db::conversations::rebuild_summary(&pool, &conversation_id).await {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "summary rebuild failed");
            }
        });
    }

    state
        .live
        .publish(change_for(&conversation, ChangeKind::MessageAdded));

    Ok(MessageRow {
        id: id.0,
        conversation_id: conversation_id.0.clone(),
        sender_id: sender.user_id.0.clone(),
        sender_name: sender.name.clone(),
        receiver_id: receiver.0,
        text: text.to_string(),
        image_url: image_url.map(str::to_string),
        sent_at,
        is_read: false,
    })
}

/// 会話内のメッセージを送信時刻の昇順で返す。
pub async fn list_messages(
    state: &AppState,
    viewer: &UserId,
    conversation_id: &ConversationId,
) -> Result<Vec<MessageRow>, AppError> {
    conversation_for(state, viewer, conversation_id).await?;
    Ok(db::messages::list_messages(&state.pool, conversation_id).await?)
}

/// メッセージ一覧のライブ購読。変更のたびに昇順の全件を配信する。
pub async fn stream_messages(
    state: &AppState,
    viewer: &UserId,
    conversation_id: &ConversationId,
) -> Result<Subscription<Vec<MessageRow>>, AppError> {
    conversation_for(state, viewer, conversation_id).await?;

    let pool = state.pool.clone();
    let id = conversation_id.clone();
    let filter = conversation_id.clone();
    Ok(state.live.watch(
        move |change| change.touches_messages_of(&filter),
        move || {
            let pool = pool.clone();
            let id = id.clone();
            async move {
                db::messages::list_messages(&pool, &id)
                    .await
                    .map_err(AppError::from)
            }
        },
    ))
}

/// 閲覧者宛ての未読を既読にし、更新件数を返す。2回目以降は 0。
pub async fn mark_read(
    state: &AppState,
    reader: &UserId,
    conversation_id: &ConversationId,
) -> Result<u64, AppError> {
    let conversation = conversation_for(state, reader, conversation_id).await?;
    let updated = db::messages::mark_read(&state.pool, conversation_id, reader).await?;
    if updated > 0 {
        state
            .live
            .publish(change_for(&conversation, ChangeKind::MessagesRead));
    }
    Ok(updated)
}

/// 買い手側と売り手側の一覧を ID で重複排除して結合し、最終メッセージの新しい順に並べる。
pub fn merge_conversations(
    as_buyer: Vec<ConversationRow>,
    as_seller: Vec<ConversationRow>,
) -> Vec<ConversationRow> {
    let mut seen = HashSet::new();
    let mut merged: Vec<_> = as_buyer
        .into_iter()
        .chain(as_seller)
        .filter(|c| seen.insert(c.id.clone()))
        .collect();
    merged.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
    merged
}

async fn fetch_conversations(pool: &db::Db, user_id: &UserId) -> Result<Vec<ConversationRow>, AppError> {
    let as_buyer = db::conversations::list_as_buyer(pool, user_id).await?;
    let as_seller = db::conversations::list_as_seller(pool, user_id).await?;
    Ok(merge_conversations(as_buyer, as_seller))
}

pub async fn list_conversations(
    state: &AppState,
    user_id: &UserId,
) -> Result<Vec<ConversationRow>, AppError> {
    fetch_conversations(&state.pool, user_id).await
}

/// 会話一覧のライブ購読。自分が参加する会話に変更があるたびに全件を配信する。
pub fn stream_conversations(
    state: &AppState,
    user_id: &UserId,
) -> Subscription<Vec<ConversationRow>> {
    let pool = state.pool.clone();
    let user = user_id.clone();
    let filter = user_id.clone();
    state.live.watch(
        move |change| change.touches_inbox_of(&filter),
        move || {
            let pool = pool.clone();
            let user = user.clone();
            async move { fetch_conversations(&pool, &user).await }
        },
    )
}
