//! Screen-scoped state holders.
//!
//! Each screen owns a `watch` channel carrying its current view state. A UI
//! shell subscribes to the receiver and re-renders on change; user actions are
//! async methods on the screen. Live screens (chat, inbox) own a background
//! task bridging a [`Subscription`](crate::live::Subscription) into the view;
//! dropping the screen tears it down.

pub mod chat;
pub mod feed;
pub mod inbox;
pub mod listing_form;
pub mod my_listings;
pub mod profile;
pub mod sign_in;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::AppState;
use crate::auth::{self, AuthenticatedUser};
use crate::error::AppError;
use crate::live::Subscription;

/// 画面に表示するエラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewError {
    pub message: String,
    /// サインイン画面へ戻すべきか
    pub sign_in_required: bool,
}

impl From<&AppError> for ViewError {
    fn from(e: &AppError) -> Self {
        Self {
            message: e.message().to_string(),
            sign_in_required: matches!(e, AppError::Unauthenticated(_)),
        }
    }
}

impl From<AppError> for ViewError {
    fn from(e: AppError) -> Self {
        Self::from(&e)
    }
}

/// 同じ操作の多重実行を防ぐ。保持している間はボタンが押せない状態に相当する。
pub(crate) struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    /// 既に実行中なら `None`
    pub(crate) fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 操作の結果。実行中の操作があって受け付けなかった場合は `Busy`。
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Done(T),
    Failed(ViewError),
    Busy,
}

impl<T> Outcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }

    pub fn done(self) -> Option<T> {
        match self {
            Outcome::Done(v) => Some(v),
            _ => None,
        }
    }
}

/// 画面が開いている間だけ動くバックグラウンドタスク
#[derive(Debug)]
pub(crate) struct ScreenTask(JoinHandle<()>);

impl ScreenTask {
    pub(crate) fn spawn<F>(task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(task))
    }
}

impl Drop for ScreenTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// ライブ購読のスナップショットを画面状態に流し込む。
pub(crate) fn bridge<T, V, F>(
    mut sub: Subscription<T>,
    view: watch::Sender<V>,
    mut apply: F,
) -> ScreenTask
where
    T: Send + 'static,
    V: Send + Sync + 'static,
    F: FnMut(&mut V, Result<T, AppError>) + Send + 'static,
{
    ScreenTask::spawn(async move {
        while let Some(snapshot) = sub.next().await {
            view.send_modify(|v| apply(v, snapshot));
        }
    })
}

/// 画面が保持するセッショントークンを検証する。
pub(crate) async fn current_user(
    state: &AppState,
    token: &str,
) -> Result<AuthenticatedUser, AppError> {
    auth::authenticate(&state.pool, token).await
}
