use std::sync::atomic::AtomicBool;

use tokio::sync::watch;

use super::{InFlight, Outcome, ViewError, current_user};
use crate::AppState;
use crate::db::models::Listing;
use crate::market::listings::{self, ListingDraft};
use crate::storage::validate_image;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingFormView {
    pub image_url: Option<String>,
    pub uploading: bool,
    pub submitting: bool,
    pub created: Option<Listing>,
    pub error: Option<ViewError>,
}

/// 出品フォーム。画像のアップロードと出品の送信をそれぞれ多重実行させない。
pub struct ListingFormScreen {
    state: AppState,
    token: String,
    view: watch::Sender<ListingFormView>,
    uploading: AtomicBool,
    submitting: AtomicBool,
}

impl ListingFormScreen {
    pub fn new(state: AppState, token: impl Into<String>) -> Self {
        let (view, _) = watch::channel(ListingFormView::default());
        Self {
            state,
            token: token.into(),
            view,
            uploading: AtomicBool::new(false),
            submitting: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ListingFormView> {
        self.view.subscribe()
    }

    pub fn current(&self) -> ListingFormView {
        self.view.borrow().clone()
    }

    fn fail<T>(&self, error: ViewError) -> Outcome<T> {
        self.view.send_modify(|v| {
            v.uploading = false;
            v.submitting = false;
            v.error = Some(error.clone());
        });
        Outcome::Failed(error)
    }

    /// 画像をアップロードし、フォームに URL を保持する。
    pub async fn attach_image(&self, data: Vec<u8>, content_type: &str) -> Outcome<String> {
        let Some(_guard) = InFlight::acquire(&self.uploading) else {
            return Outcome::Busy;
        };
        if let Err(e) = validate_image(&data, content_type) {
            return self.fail(e.into());
        }
        self.view.send_modify(|v| v.uploading = true);
        match self.state.media.upload(data, content_type).await {
            Ok(url) => {
                self.view.send_modify(|v| {
                    v.uploading = false;
                    v.image_url = Some(url.clone());
                    v.error = None;
                });
                Outcome::Done(url)
            }
            Err(e) => self.fail(e.into()),
        }
    }

    /// 出品を送信する。下書きに画像 URL がなければ添付済みの画像を使う。
    pub async fn submit(&self, mut draft: ListingDraft) -> Outcome<Listing> {
        let Some(_guard) = InFlight::acquire(&self.submitting) else {
            return Outcome::Busy;
        };
        if draft.image_url.trim().is_empty()
            && let Some(url) = self.view.borrow().image_url.clone()
        {
            draft.image_url = url;
        }
        self.view.send_modify(|v| v.submitting = true);

        let owner = match current_user(&self.state, &self.token).await {
            Ok(owner) => owner,
            Err(e) => return self.fail(e.into()),
        };
        match listings::create(&self.state, &owner, &draft).await {
            Ok(listing) => {
                self.view.send_modify(|v| {
                    v.submitting = false;
                    v.created = Some(listing.clone());
                    v.error = None;
                });
                Outcome::Done(listing)
            }
            Err(e) => self.fail(e.into()),
        }
    }
}

#[cfg(all(test, not(feature = "postgres")))]
mod tests {
    use super::*;
    use crate::testing::test_env;

    fn draft() -> ListingDraft {
        ListingDraft {
            title: "Mini fridge".into(),
            category: "Electronics".into(),
            price: 4000.0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn attached_image_is_used_on_submit() {
        let env = test_env().await;
        let session = env.sign_in("seller", "seller@college.edu", "Sam").await;
        let screen = ListingFormScreen::new(env.state.clone(), session.token);

        let url = screen
            .attach_image(vec![1, 2, 3], "image/jpeg")
            .await
            .done()
            .unwrap();
        let listing = screen.submit(draft()).await.done().unwrap();
        assert_eq!(listing.image_url, url);
        assert_eq!(screen.current().created, Some(listing));
        assert_eq!(env.media.objects.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn submit_without_image_shows_inline_error() {
        let env = test_env().await;
        let session = env.sign_in("seller", "seller@college.edu", "Sam").await;
        let screen = ListingFormScreen::new(env.state.clone(), session.token);

        assert!(matches!(screen.submit(draft()).await, Outcome::Failed(_)));
        let view = screen.current();
        assert!(view.created.is_none());
        assert!(!view.submitting);
        assert!(view.error.is_some());
    }

    #[tokio::test]
    async fn upload_failure_is_passed_through() {
        let env = test_env().await;
        *env.media.fail_with.lock().unwrap() = Some("bucket unavailable".into());
        let screen = ListingFormScreen::new(env.state.clone(), "unused");

        let outcome = screen.attach_image(vec![1], "image/png").await;
        assert_eq!(
            outcome,
            Outcome::Failed(ViewError {
                message: "bucket unavailable".into(),
                sign_in_required: false,
            })
        );
        assert!(screen.current().image_url.is_none());
    }

    #[tokio::test]
    async fn stale_session_requires_sign_in() {
        let env = test_env().await;
        let screen = ListingFormScreen::new(env.state.clone(), "revoked-token");
        let mut d = draft();
        d.image_url = "https://media.test/0".into();
        match screen.submit(d).await {
            Outcome::Failed(e) => assert!(e.sign_in_required),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_submit_while_in_flight_is_refused() {
        let env = test_env().await;
        let screen = ListingFormScreen::new(env.state.clone(), "t");
        let _held = InFlight::acquire(&screen.submitting).unwrap();
        assert_eq!(screen.submit(draft()).await, Outcome::Busy);
    }
}
