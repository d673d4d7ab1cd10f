use tokio::sync::watch;

use super::{ScreenTask, ViewError, bridge, current_user};
use crate::AppState;
use crate::db::models::ConversationRow;
use crate::market::chat;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboxView {
    /// 買い手・売り手の両方の立場の会話（最終メッセージの新しい順）
    pub conversations: Vec<ConversationRow>,
    pub total_unread: i64,
    pub loaded: bool,
    pub error: Option<ViewError>,
}

/// 会話一覧。開いている間ライブ購読する。
pub struct InboxScreen {
    view: watch::Sender<InboxView>,
    _live: ScreenTask,
}

impl InboxScreen {
    pub async fn open(state: AppState, token: &str) -> Result<Self, ViewError> {
        let user = current_user(&state, token).await?;
        let subscription = chat::stream_conversations(&state, &user.user_id);

        let (view, _) = watch::channel(InboxView::default());
        let live = bridge(subscription, view.clone(), |v: &mut InboxView, snapshot| {
            match snapshot {
                Ok(conversations) => {
                    v.total_unread = conversations.iter().map(|c| c.unread_count).sum();
                    v.conversations = conversations;
                    v.loaded = true;
                    v.error = None;
                }
                // 前回の一覧は残したままエラーを表示する
                Err(e) => v.error = Some(ViewError::from(e)),
            }
        });
        Ok(Self { view, _live: live })
    }

    pub fn subscribe(&self) -> watch::Receiver<InboxView> {
        self.view.subscribe()
    }

    pub fn current(&self) -> InboxView {
        self.view.borrow().clone()
    }

    pub fn close(self) {
        drop(self);
    }
}
