use std::sync::atomic::AtomicBool;

use tokio::sync::watch;

use super::{InFlight, Outcome, ViewError};
use crate::AppState;
use crate::market::users::{self, SignIn};

#[derive(Debug, Clone, Default)]
pub struct SignInView {
    pub signing_in: bool,
    pub session: Option<SignIn>,
    pub error: Option<ViewError>,
}

impl SignInView {
    /// サインイン済みでプロフィール設定が未完了か
    pub fn needs_profile(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.profile_complete)
    }
}

pub struct SignInScreen {
    state: AppState,
    view: watch::Sender<SignInView>,
    busy: AtomicBool,
}

impl SignInScreen {
    pub fn new(state: AppState) -> Self {
        let (view, _) = watch::channel(SignInView::default());
        Self {
            state,
            view,
            busy: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SignInView> {
        self.view.subscribe()
    }

    pub fn current(&self) -> SignInView {
        self.view.borrow().clone()
    }

    pub async fn sign_in(&self, credential: &str) -> Outcome<SignIn> {
        let Some(_guard) = InFlight::acquire(&self.busy) else {
            return Outcome::Busy;
        };
        self.view.send_modify(|v| {
            v.signing_in = true;
            v.error = None;
        });
        match users::sign_in_or_register(&self.state, credential).await {
            Ok(session) => {
                self.view.send_modify(|v| {
                    v.signing_in = false;
                    v.session = Some(session.clone());
                });
                Outcome::Done(session)
            }
            Err(e) => {
                let error = ViewError::from(e);
                self.view.send_modify(|v| {
                    v.signing_in = false;
                    v.error = Some(error.clone());
                });
                Outcome::Failed(error)
            }
        }
    }

    pub async fn sign_out(&self) -> Outcome<()> {
        let Some(session) = self.view.borrow().session.clone() else {
            return Outcome::Done(());
        };
        match users::sign_out(&self.state, &session.token).await {
            Ok(()) => {
                self.view.send_modify(|v| v.session = None);
                Outcome::Done(())
            }
            Err(e) => {
                let error = ViewError::from(e);
                self.view.send_modify(|v| v.error = Some(error.clone()));
                Outcome::Failed(error)
            }
        }
    }
}

#[cfg(all(test, not(feature = "postgres")))]
mod tests {
    use super::*;
    use crate::testing::test_env;

    #[tokio::test]
    async fn new_user_is_sent_to_profile_setup() {
        let env = test_env().await;
        env.identity
            .register("cred", "u1", "student@college.edu", Some("Stu"));
        let screen = SignInScreen::new(env.state.clone());

        assert!(screen.sign_in("cred").await.is_done());
        assert!(screen.current().needs_profile());

        assert!(screen.sign_out().await.is_done());
        assert!(screen.current().session.is_none());
    }

    #[tokio::test]
    async fn rejected_domain_shows_message() {
        let env = test_env().await;
        env.identity
            .register("cred", "u1", "user@gmail.com", None);
        let screen = SignInScreen::new(env.state.clone());

        let Outcome::Failed(error) = screen.sign_in("cred").await else {
            panic!("gmail sign-in should fail");
        };
        assert!(error.message.contains("user@gmail.com"));
        assert!(screen.current().session.is_none());
    }
}
