use std::sync::atomic::AtomicBool;

use tokio::sync::watch;

use super::{InFlight, Outcome, ViewError, current_user};
use crate::AppState;
use crate::db::models::UserRow;
use crate::market::users;

#[derive(Debug, Clone, Default)]
pub struct ProfileView {
    pub profile: Option<UserRow>,
    pub saving: bool,
    pub error: Option<ViewError>,
}

/// プロフィールの表示と初回設定
pub struct ProfileScreen {
    state: AppState,
    token: String,
    view: watch::Sender<ProfileView>,
    busy: AtomicBool,
}

impl ProfileScreen {
    pub fn new(state: AppState, token: impl Into<String>) -> Self {
        let (view, _) = watch::channel(ProfileView::default());
        Self {
            state,
            token: token.into(),
            view,
            busy: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ProfileView> {
        self.view.subscribe()
    }

    pub fn current(&self) -> ProfileView {
        self.view.borrow().clone()
    }

    fn fail<T>(&self, error: ViewError) -> Outcome<T> {
        self.view.send_modify(|v| {
            v.saving = false;
            v.error = Some(error.clone());
        });
        Outcome::Failed(error)
    }

    pub async fn load(&self) -> Outcome<UserRow> {
        let user = match current_user(&self.state, &self.token).await {
            Ok(user) => user,
            Err(e) => return self.fail(e.into()),
        };
        match users::get_profile(&self.state, &user.user_id).await {
            Ok(profile) => {
                self.view.send_modify(|v| {
                    v.profile = Some(profile.clone());
                    v.error = None;
                });
                Outcome::Done(profile)
            }
            Err(e) => self.fail(e.into()),
        }
    }

    pub async fn save(
        &self,
        name: &str,
        department: &str,
        year: &str,
        roll_number: Option<&str>,
    ) -> Outcome<UserRow> {
        let Some(_guard) = InFlight::acquire(&self.busy) else {
            return Outcome::Busy;
        };
        self.view.send_modify(|v| v.saving = true);
        let user = match current_user(&self.state, &self.token).await {
            Ok(user) => user,
            Err(e) => return self.fail(e.into()),
        };
        match users::complete_profile(&self.state, &user.user_id, name, department, year, roll_number)
            .await
        {
            Ok(profile) => {
                self.view.send_modify(|v| {
                    v.saving = false;
                    v.profile = Some(profile.clone());
                    v.error = None;
                });
                Outcome::Done(profile)
            }
            Err(e) => self.fail(e.into()),
        }
    }
}

#[cfg(all(test, not(feature = "postgres")))]
mod tests {
    use super::*;
    use crate::testing::test_env;

    #[tokio::test]
    async fn profile_setup_marks_profile_complete() {
        let env = test_env().await;
        let session = env.sign_in("u1", "u1@nitk.edu.in", "Uma").await;
        let screen = ProfileScreen::new(env.state.clone(), session.token);

        let before = screen.load().await.done().unwrap();
        assert!(!before.profile_complete);

        let after = screen
            .save("Uma Rao", "Civil", "4", Some("17CV042"))
            .await
            .done()
            .unwrap();
        assert!(after.profile_complete);
        assert_eq!(after.roll_number.as_deref(), Some("17CV042"));
    }

    #[tokio::test]
    async fn blank_fields_keep_previous_profile() {
        let env = test_env().await;
        let session = env.sign_in("u1", "u1@nitk.edu.in", "Uma").await;
        let screen = ProfileScreen::new(env.state.clone(), session.token);
        screen.load().await;

        assert!(!screen.save("", "Civil", "4", None).await.is_done());
        let view = screen.current();
        assert_eq!(view.profile.unwrap().name, "Uma");
        assert!(view.error.is_some());
        assert!(!view.saving);
    }
}
