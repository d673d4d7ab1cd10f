use std::sync::atomic::AtomicBool;

use tokio::sync::watch;

use super::{InFlight, Outcome, ScreenTask, ViewError, bridge, current_user};
use crate::AppState;
use crate::auth::AuthenticatedUser;
use crate::db::models::{ConversationRow, MessageRow};
use crate::error::AppError;
use crate::market::chat;
use crate::types::{ConversationId, ListingId};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatView {
    /// 会話の見出し（最終メッセージ・未読数）。開いている間は一覧の変更に追従する。
    pub conversation: Option<ConversationRow>,
    pub messages: Vec<MessageRow>,
    pub sending: bool,
    pub error: Option<ViewError>,
}

/// 1つの会話のメッセージ画面。開いている間メッセージ一覧を購読し、
/// 自分宛ての未読が届けば既読にする。
pub struct ChatScreen {
    state: AppState,
    user: AuthenticatedUser,
    conversation_id: ConversationId,
    view: watch::Sender<ChatView>,
    sending: AtomicBool,
    _live: ScreenTask,
    _header: ScreenTask,
    _reader: ScreenTask,
}

impl ChatScreen {
    /// 出品の詳細画面から「出品者に連絡」したときの入口
    pub async fn start(
        state: AppState,
        token: &str,
        listing_id: &ListingId,
    ) -> Result<Self, ViewError> {
        let user = current_user(&state, token).await?;
        let conversation = chat::get_or_create_conversation(&state, &user, listing_id).await?;
        Self::open_as(state, user, ConversationId(conversation.id)).await
    }

    /// 会話一覧から既存の会話を開く
    pub async fn open(
        state: AppState,
        token: &str,
        conversation_id: ConversationId,
    ) -> Result<Self, ViewError> {
        let user = current_user(&state, token).await?;
        Self::open_as(state, user, conversation_id).await
    }

    async fn open_as(
        state: AppState,
        user: AuthenticatedUser,
        conversation_id: ConversationId,
    ) -> Result<Self, ViewError> {
        let conversation = chat::list_conversations(&state, &user.user_id)
            .await?
            .into_iter()
            .find(|c| c.id == conversation_id.as_str());
        let subscription = chat::stream_messages(&state, &user.user_id, &conversation_id).await?;

        let (view, _) = watch::channel(ChatView {
            conversation,
            ..Default::default()
        });
        let live = bridge(subscription, view.clone(), |v: &mut ChatView, snapshot| {
            match snapshot {
                Ok(messages) => {
                    v.messages = messages;
                    v.error = None;
                }
                Err(e) => v.error = Some(ViewError::from(e)),
            }
        });
        let header_id = conversation_id.clone();
        let header = bridge(
            chat::stream_conversations(&state, &user.user_id),
            view.clone(),
            move |v: &mut ChatView, snapshot| {
                // 見出しの取得失敗では前回の見出しを残す
                if let Ok(conversations) = snapshot
                    && let Some(c) = conversations
                        .into_iter()
                        .find(|c| c.id == header_id.as_str())
                {
                    v.conversation = Some(c);
                }
            },
        );
        let reader = spawn_reader(
            state.clone(),
            user.clone(),
            conversation_id.clone(),
            view.subscribe(),
        );

        Ok(Self {
            state,
            user,
            conversation_id,
            view,
            sending: AtomicBool::new(false),
            _live: live,
            _header: header,
            _reader: reader,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatView> {
        self.view.subscribe()
    }

    pub fn current(&self) -> ChatView {
        self.view.borrow().clone()
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// メッセージを送信する。失敗しても一覧には何も追加されない。
    pub async fn send(&self, text: &str, image_url: Option<&str>) -> Outcome<MessageRow> {
        let Some(_guard) = InFlight::acquire(&self.sending) else {
            return Outcome::Busy;
        };
        self.view.send_modify(|v| v.sending = true);
        let result =
            chat::send_message(&self.state, &self.user, &self.conversation_id, text, image_url)
                .await;
        match result {
            Ok(message) => {
                self.view.send_modify(|v| {
                    v.sending = false;
                    v.error = None;
                });
                Outcome::Done(message)
            }
            Err(e) => {
                let error = ViewError::from(e);
                self.view.send_modify(|v| {
                    v.sending = false;
                    v.error = Some(error.clone());
                });
                Outcome::Failed(error)
            }
        }
    }

    /// 画面を閉じる。購読はここで解放される。
    pub fn close(self) {
        drop(self);
    }
}

/// 表示中のメッセージに自分宛ての未読があれば既読にする。
fn spawn_reader(
    state: AppState,
    user: AuthenticatedUser,
    conversation_id: ConversationId,
    mut rx: watch::Receiver<ChatView>,
) -> ScreenTask {
    ScreenTask::spawn(async move {
        loop {
            let has_unread = rx
                .borrow_and_update()
                .messages
                .iter()
                .any(|m| !m.is_read && m.receiver_id == user.user_id.as_str());
            if has_unread
                && let Err(e) = chat::mark_read(&state, &user.user_id, &conversation_id).await
            {
                tracing::debug!(error = %e, "marking messages read failed");
                if matches!(e, AppError::Unauthenticated(_) | AppError::Forbidden(_)) {
                    return;
                }
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    })
}
