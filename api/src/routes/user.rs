use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::AppState;
use crate::auth::AuthenticatedUser;
use crate::db::models::{Listing, UserRow};
use crate::error::AppError;
use crate::market::listings;
use crate::market::users::{self, BuyerRef, UserSummary};
use crate::types::UserId;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/user/me", get(get_me))
        .route("/user/me/profile", post(update_profile))
        .route("/user/me/sold", get(get_sold))
        .route("/user/me/purchased", get(get_purchased))
        .route("/user/lookup", get(lookup_user))
        .route("/user/{id}/listings", get(get_user_listings))
}

#[derive(Deserialize)]
struct ProfileBody {
    name: String,
    department: String,
    year: String,
    #[serde(default)]
    roll_number: Option<String>,
}

#[derive(Deserialize)]
struct LookupQuery {
    email: Option<String>,
    roll_number: Option<String>,
}

async fn get_me(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<UserRow>, AppError> {
    Ok(Json(users::get_profile(&state, &auth.user_id).await?))
}

async fn update_profile(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Json(body): Json<ProfileBody>,
) -> Result<Json<UserRow>, AppError> {
    let profile = users::complete_profile(
        &state,
        &auth.user_id,
        &body.name,
        &body.department,
        &body.year,
        body.roll_number.as_deref(),
    )
    .await?;
    Ok(Json(profile))
}

/// メールアドレスか学籍番号でユーザを検索する（売却先の指定用）
async fn lookup_user(
    State(state): State<AppState>,
    _auth: AuthenticatedUser,
    axum_extra::extract::Query(query): axum_extra::extract::Query<LookupQuery>,
) -> Result<Json<UserSummary>, AppError> {
    let buyer = BuyerRef::from_parts(query.email.as_deref(), query.roll_number.as_deref())?
        .ok_or_else(|| AppError::BadRequest("email or roll_number is required".into()))?;
    Ok(Json(users::resolve_buyer(&state, &buyer).await?))
}

async fn get_user_listings(
    State(state): State<AppState>,
    Path(id): Path<String>,
    _auth: AuthenticatedUser,
) -> Result<Json<Vec<Listing>>, AppError> {
    Ok(Json(listings::list_by_owner(&state, &UserId(id)).await?))
}

async fn get_sold(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<Vec<Listing>>, AppError> {
    Ok(Json(listings::list_sold(&state, &auth.user_id).await?))
}

async fn get_purchased(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<Vec<Listing>>, AppError> {
    Ok(Json(listings::list_purchased(&state, &auth.user_id).await?))
}
