use serde::Serialize;

use crate::AppState;
use crate::auth;
use crate::db;
use crate::db::models::UserRow;
use crate::error::AppError;
use crate::types::{UserId, is_campus_email};

const FALLBACK_NAME: &str = "Unknown";

#[derive(Debug, Clone, Serialize)]
pub struct SignIn {
    pub user_id: UserId,
    pub profile_complete: bool,
    pub token: String,
    pub expires_at: i64,
}

/// 売却先の指定などに使う最小限の公開情報
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub user_id: UserId,
    pub name: String,
}

impl From<UserRow> for UserSummary {
    fn from(row: UserRow) -> Self {
        Self {
            user_id: UserId(row.id),
            name: row.name,
        }
    }
}

/// 外部IdPのクレデンシャルでサインインする。初回はプロフィール未完了のユーザを作成する。
/// 許可リスト外のメールアドレスにはセッションを発行しない。
pub async fn sign_in_or_register(state: &AppState, credential: &str) -> Result<SignIn, AppError> {
    let identity = state.identity.verify(credential).await?;

    if !is_campus_email(&identity.email, &state.config.allowed_email_suffixes) {
        tracing::info!(email = %identity.email, "sign-in rejected by email allow-list");
        return Err(AppError::DomainRejected(format!(
            "{} is not a university email address",
            identity.email
        )));
    }

    let user_id = UserId(identity.subject);
    let name = identity.display_name.as_deref().unwrap_or(FALLBACK_NAME);
    let created = match db::users::create_user_if_absent(
        &state.pool,
        &user_id,
        &identity.email,
        name,
        db::now_millis(),
    )
    .await
    {
        Ok(created) => created,
        Err(e) if db::is_unique_violation(&e) => {
            return Err(AppError::Conflict(
                "email is already registered to another account".into(),
            ));
        }
        Err(e) => return Err(e.into()),
    };
    if created {
        tracing::info!(user_id = %user_id, "registered new user");
    }

    let user = db::users::get_user(&state.pool, &user_id)
        .await?
        .ok_or_else(|| AppError::Internal("user vanished after registration".into()))?;
    let session = auth::issue_session(&state.pool, &user_id, state.config.session_ttl_hours).await?;

    Ok(SignIn {
        user_id,
        profile_complete: user.profile_complete,
        token: session.token,
        expires_at: session.expires_at,
    })
}

/// セッションを失効させる。既に失効していても成功扱い。
pub async fn sign_out(state: &AppState, token: &str) -> Result<(), AppError> {
    db::sessions::delete_session(&state.pool, &auth::hash_token(token)).await?;
    Ok(())
}

pub async fn get_profile(state: &AppState, user_id: &UserId) -> Result<UserRow, AppError> {
    db::users::get_user(&state.pool, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".into()))
}

/// プロフィール設定を完了させる。学籍番号は任意だが、指定するなら他のユーザと重複できない。
pub async fn complete_profile(
    state: &AppState,
    user_id: &UserId,
    name: &str,
    department: &str,
    year: &str,
    roll_number: Option<&str>,
) -> Result<UserRow, AppError> {
    let name = name.trim();
    let department = department.trim();
    let year = year.trim();
    if name.is_empty() || department.is_empty() || year.is_empty() {
        return Err(AppError::BadRequest(
            "name, department and year are required".into(),
        ));
    }
    let roll_number = roll_number.map(str::trim).filter(|r| !r.is_empty());

    if let Some(roll) = roll_number
        && let Some(holder) = db::users::get_user_by_roll_number(&state.pool, roll).await?
        && holder.id != user_id.as_str()
    {
        return Err(AppError::Conflict("roll number is already taken".into()));
    }

    let updated = match db::users::complete_profile(
        &state.pool,
        user_id,
        name,
        department,
        year,
        roll_number,
    )
    .await
    {
        Ok(updated) => updated,
        // 事前確認と更新の間に同じ番号が登録された場合
        Err(e) if db::is_unique_violation(&e) => {
            return Err(AppError::Conflict("roll number is already taken".into()));
        }
        Err(e) => return Err(e.into()),
    };
    if !updated {
        return Err(AppError::NotFound("user not found".into()));
    }
    get_profile(state, user_id).await
}

pub async fn lookup_by_email(state: &AppState, email: &str) -> Result<UserSummary, AppError> {
    db::users::get_user_by_email(&state.pool, email)
        .await?
        .map(UserSummary::from)
        .ok_or_else(|| AppError::NotFound(format!("no user with email {}", email.trim())))
}

pub async fn lookup_by_roll_number(
    state: &AppState,
    roll_number: &str,
) -> Result<UserSummary, AppError> {
    db::users::get_user_by_roll_number(&state.pool, roll_number)
        .await?
        .map(UserSummary::from)
        .ok_or_else(|| {
            AppError::NotFound(format!("no user with roll number {}", roll_number.trim()))
        })
}

/// 売却時に買い手を指定する方法
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuyerRef {
    Email(String),
    RollNumber(String),
}

impl BuyerRef {
    /// メールアドレスと学籍番号のどちらか一方から組み立てる。両方空なら `None`。
    pub fn from_parts(
        email: Option<&str>,
        roll_number: Option<&str>,
    ) -> Result<Option<Self>, AppError> {
        let email = email.map(str::trim).filter(|v| !v.is_empty());
        let roll_number = roll_number.map(str::trim).filter(|v| !v.is_empty());
        match (email, roll_number) {
            (Some(_), Some(_)) => Err(AppError::BadRequest(
                "give either a buyer email or a roll number, not both".into(),
            )),
            (Some(email), None) => Ok(Some(Self::Email(email.to_string()))),
            (None, Some(roll)) => Ok(Some(Self::RollNumber(roll.to_string()))),
            (None, None) => Ok(None),
        }
    }
}

pub async fn resolve_buyer(state: &AppState, buyer: &BuyerRef) -> Result<UserSummary, AppError> {
    match buyer {
        BuyerRef::Email(email) => lookup_by_email(state, email).await,
        BuyerRef::RollNumber(roll) => lookup_by_roll_number(state, roll).await,
    }
}
