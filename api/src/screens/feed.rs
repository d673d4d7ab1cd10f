use std::sync::atomic::AtomicBool;

use tokio::sync::watch;

use super::{InFlight, Outcome, ViewError};
use crate::AppState;
use crate::db::models::Listing;
use crate::market::listings;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedView {
    pub listings: Vec<Listing>,
    pub category: Option<String>,
    pub loading: bool,
    pub error: Option<ViewError>,
}

/// 販売中の出品フィード。取得に失敗しても前回の一覧は残す。
pub struct FeedScreen {
    state: AppState,
    view: watch::Sender<FeedView>,
    busy: AtomicBool,
}

impl FeedScreen {
    pub fn new(state: AppState) -> Self {
        let (view, _) = watch::channel(FeedView::default());
        Self {
            state,
            view,
            busy: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedView> {
        self.view.subscribe()
    }

    pub fn current(&self) -> FeedView {
        self.view.borrow().clone()
    }

    pub async fn set_category(&self, category: Option<&str>) -> Outcome<usize> {
        self.view
            .send_modify(|v| v.category = category.map(str::to_string));
        self.refresh().await
    }

    /// 一覧を取り直し、件数を返す。
    pub async fn refresh(&self) -> Outcome<usize> {
        let Some(_guard) = InFlight::acquire(&self.busy) else {
            return Outcome::Busy;
        };
        let category = self.view.borrow().category.clone();
        self.view.send_modify(|v| v.loading = true);

        match listings::list_active(&self.state, category.as_deref()).await {
            Ok(found) => {
                let count = found.len();
                self.view.send_modify(|v| {
                    v.listings = found;
                    v.loading = false;
                    v.error = None;
                });
                Outcome::Done(count)
            }
            Err(e) => {
                tracing::debug!(error = %e, "feed refresh failed");
                let error = ViewError::from(e);
                self.view.send_modify(|v| {
                    v.loading = false;
                    v.error = Some(error.clone());
                });
                Outcome::Failed(error)
            }
        }
    }
}
