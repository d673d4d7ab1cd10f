use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::AppState;
use crate::auth::AuthenticatedUser;
use crate::db::models::Listing;
use crate::error::AppError;
use crate::market::listings::{self, ListingDraft};
use crate::market::users::{self, BuyerRef};
use crate::types::ListingId;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/listing", get(get_feed).post(create_listing))
        .route("/listing/{id}", get(get_listing))
        .route("/listing/{id}/sold", post(mark_sold))
}

#[derive(Deserialize)]
struct FeedQuery {
    category: Option<String>,
}

#[derive(Deserialize)]
struct MarkSoldBody {
    #[serde(default)]
    buyer_email: Option<String>,
    #[serde(default)]
    buyer_roll_number: Option<String>,
}

/// 販売中の出品フィード（新しい順）
async fn get_feed(
    State(state): State<AppState>,
    _auth: AuthenticatedUser,
    axum_extra::extract::Query(query): axum_extra::extract::Query<FeedQuery>,
) -> Result<Json<Vec<Listing>>, AppError> {
    Ok(Json(
        listings::list_active(&state, query.category.as_deref()).await?,
    ))
}

async fn create_listing(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Json(draft): Json<ListingDraft>,
) -> Result<Json<Listing>, AppError> {
    Ok(Json(listings::create(&state, &auth, &draft).await?))
}

async fn get_listing(
    State(state): State<AppState>,
    Path(id): Path<String>,
    _auth: AuthenticatedUser,
) -> Result<Json<Listing>, AppError> {
    Ok(Json(listings::get(&state, &ListingId(id)).await?))
}

/// 売却済みにする。買い手はメールアドレスか学籍番号で任意に指定する。
async fn mark_sold(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: AuthenticatedUser,
    Json(body): Json<MarkSoldBody>,
) -> Result<Json<Listing>, AppError> {
    let buyer = match BuyerRef::from_parts(
        body.buyer_email.as_deref(),
        body.buyer_roll_number.as_deref(),
    )? {
        Some(buyer) => Some(users::resolve_buyer(&state, &buyer).await?),
        None => None,
    };
    let listing = listings::mark_sold(
        &state,
        &auth,
        &ListingId(id),
        buyer.as_ref().map(|b| &b.user_id),
    )
    .await?;
    Ok(Json(listing))
}
