//! Live queries.
//!
//! Writes publish a [`Change`] on an in-process broadcast channel. A
//! [`Subscription`] re-runs its query after every relevant change and yields
//! the full result set each time, never a delta. Lagging behind the channel is
//! therefore harmless: the next snapshot already reflects everything missed.

use std::future::Future;

use futures::Stream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::error::AppError;
use crate::types::{ConversationId, UserId};

const CHANGE_CAPACITY: usize = 256;
const SNAPSHOT_BUFFER: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    ConversationCreated,
    MessageAdded,
    MessagesRead,
}

/// 会話に関する変更通知。参加者を持たせて、一覧側の購読が絞り込めるようにする。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub conversation_id: ConversationId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub kind: ChangeKind,
}

impl Change {
    /// 会話内のメッセージ列に影響するか
    pub fn touches_messages_of(&self, conversation_id: &ConversationId) -> bool {
        self.kind != ChangeKind::ConversationCreated && &self.conversation_id == conversation_id
    }

    /// ユーザの会話一覧に影響するか（既読化も未読数を変える）
    pub fn touches_inbox_of(&self, user_id: &UserId) -> bool {
        &self.buyer_id == user_id || &self.seller_id == user_id
    }
}

#[derive(Debug, Clone)]
pub struct LiveHub {
    tx: broadcast::Sender<Change>,
}

impl Default for LiveHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANGE_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, change: Change) {
        // 購読者がいなければ送信は失敗するが、それで問題ない
        let _ = self.tx.send(change);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.tx.subscribe()
    }

    /// `fetch` の結果を初回と、`is_relevant` が真となる変更のたびに配信する。
    /// 取得に失敗した場合はそのエラーを最後に配信して終了する。
    pub fn watch<T, F, Fut, R>(&self, is_relevant: R, fetch: F) -> Subscription<T>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, AppError>> + Send,
        R: Fn(&Change) -> bool + Send + 'static,
    {
        // 初回取得より前に購読しておき、その間の変更を取りこぼさない
        let mut changes = self.subscribe();
        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        let task = tokio::spawn(async move {
            loop {
                let snapshot = fetch().await;
                let failed = snapshot.is_err();
                if tx.send(snapshot).await.is_err() || failed {
                    return;
                }
                loop {
                    match changes.recv().await {
                        Ok(change) if is_relevant(&change) => break,
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::debug!(skipped, "live subscription lagged, refetching");
                            break;
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        });
        Subscription { rx, task }
    }
}

/// Handle to a live query. Dropping it stops the listener task.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::Receiver<Result<T, AppError>>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> Subscription<T> {
    /// 次のスナップショットを待つ。購読が終了していれば `None`。
    pub async fn next(&mut self) -> Option<Result<T, AppError>> {
        self.rx.recv().await
    }

    pub fn close(self) {
        drop(self);
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<T, AppError>> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|item| (item, sub))
        })
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    fn change(id: &str, kind: ChangeKind) -> Change {
        Change {
            conversation_id: ConversationId(id.into()),
            buyer_id: UserId("alice".into()),
            seller_id: UserId("bob".into()),
            kind,
        }
    }

    #[tokio::test]
    async fn relevant_changes_trigger_a_fresh_snapshot() {
        let hub = LiveHub::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let target = ConversationId("l_alice_bob".into());
        let mut sub = hub.watch(
            move |change| change.touches_messages_of(&target),
            move || {
                let c = c.clone();
                async move { Ok(c.fetch_add(1, Ordering::SeqCst)) }
            },
        );

        assert_eq!(sub.next().await, Some(Ok(0)));
        hub.publish(change("other", ChangeKind::MessageAdded));
        hub.publish(change("l_alice_bob", ChangeKind::ConversationCreated));
        hub.publish(change("l_alice_bob", ChangeKind::MessageAdded));
        assert_eq!(sub.next().await, Some(Ok(1)));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetch_error_ends_the_subscription() {
        let hub = LiveHub::new();
        let mut sub = hub.watch(
            |_| true,
            || async { Err::<(), _>(AppError::Upstream("boom".into())) },
        );
        assert_eq!(sub.next().await, Some(Err(AppError::Upstream("boom".into()))));
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn dropping_the_subscription_releases_the_listener() {
        let hub = LiveHub::new();
        let mut sub = hub.watch(|_| true, || async { Ok(()) });
        assert!(sub.next().await.is_some());
        assert_eq!(hub.tx.receiver_count(), 1);

        sub.close();
        // abort は非同期に反映される
        for _ in 0..50 {
            if hub.tx.receiver_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(hub.tx.receiver_count(), 0);
    }

    #[test]
    fn inbox_relevance_follows_participants() {
        let read = change("l_alice_bob", ChangeKind::MessagesRead);
        assert!(read.touches_inbox_of(&UserId("alice".into())));
        assert!(read.touches_inbox_of(&UserId("bob".into())));
        assert!(!read.touches_inbox_of(&UserId("carol".into())));
    }
}
