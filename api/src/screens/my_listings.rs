use std::sync::atomic::AtomicBool;

use tokio::sync::watch;

use super::{InFlight, Outcome, ViewError, current_user};
use crate::AppState;
use crate::db::models::Listing;
use crate::error::AppError;
use crate::market::listings;
use crate::market::users::{self, BuyerRef};
use crate::types::ListingId;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MyListingsView {
    /// 自分の出品（販売中・売却済みを含む）
    pub listings: Vec<Listing>,
    pub sold: Vec<Listing>,
    pub purchased: Vec<Listing>,
    pub loading: bool,
    pub error: Option<ViewError>,
}

/// 自分の出品・売却履歴・購入履歴と、売却済みへの変更
pub struct MyListingsScreen {
    state: AppState,
    token: String,
    view: watch::Sender<MyListingsView>,
    loading: AtomicBool,
    marking: AtomicBool,
}

impl MyListingsScreen {
    pub fn new(state: AppState, token: impl Into<String>) -> Self {
        let (view, _) = watch::channel(MyListingsView::default());
        Self {
            state,
            token: token.into(),
            view,
            loading: AtomicBool::new(false),
            marking: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<MyListingsView> {
        self.view.subscribe()
    }

    pub fn current(&self) -> MyListingsView {
        self.view.borrow().clone()
    }

    fn show_error(&self, e: AppError) -> ViewError {
        let error = ViewError::from(e);
        self.view.send_modify(|v| {
            v.loading = false;
            v.error = Some(error.clone());
        });
        error
    }

    async fn fetch(&self) -> Result<(Vec<Listing>, Vec<Listing>, Vec<Listing>), AppError> {
        let user = current_user(&self.state, &self.token).await?;
        let mine = listings::list_by_owner(&self.state, &user.user_id).await?;
        let sold = listings::list_sold(&self.state, &user.user_id).await?;
        let purchased = listings::list_purchased(&self.state, &user.user_id).await?;
        Ok((mine, sold, purchased))
    }

    pub async fn refresh(&self) -> Outcome<()> {
        let Some(_guard) = InFlight::acquire(&self.loading) else {
            return Outcome::Busy;
        };
        self.view.send_modify(|v| v.loading = true);
        match self.fetch().await {
            Ok((mine, sold, purchased)) => {
                self.view.send_modify(|v| {
                    v.listings = mine;
                    v.sold = sold;
                    v.purchased = purchased;
                    v.loading = false;
                    v.error = None;
                });
                Outcome::Done(())
            }
            Err(e) => Outcome::Failed(self.show_error(e)),
        }
    }

    /// 出品を売却済みにする。買い手はメールアドレスか学籍番号で指定できる。
    pub async fn mark_sold(&self, listing_id: &ListingId, buyer: Option<BuyerRef>) -> Outcome<Listing> {
        let result = {
            let Some(_guard) = InFlight::acquire(&self.marking) else {
                return Outcome::Busy;
            };
            self.mark_sold_inner(listing_id, buyer).await
        };
        match result {
            Ok(listing) => {
                // 一覧の再取得に失敗しても売却自体は成功している
                self.refresh().await;
                Outcome::Done(listing)
            }
            Err(e) => Outcome::Failed(self.show_error(e)),
        }
    }

    async fn mark_sold_inner(
        &self,
        listing_id: &ListingId,
        buyer: Option<BuyerRef>,
    ) -> Result<Listing, AppError> {
        let user = current_user(&self.state, &self.token).await?;
        let buyer = match buyer {
            Some(buyer) => Some(users::resolve_buyer(&self.state, &buyer).await?),
            None => None,
        };
        listings::mark_sold(
            &self.state,
            &user,
            listing_id,
            buyer.as_ref().map(|b| &b.user_id),
        )
        .await
    }
}
