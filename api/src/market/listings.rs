use serde::Deserialize;

use crate::AppState;
use crate::auth::AuthenticatedUser;
use crate::db;
use crate::db::listings::NewListing;
use crate::db::models::{Listing, into_listings};
use crate::error::AppError;
use crate::types::{DEFAULT_CONDITION, DEFAULT_PRICE_TYPE, ListingId, UserId, normalize_category};

/// 出品フォームの入力
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    pub price: f64,
    pub image_url: String,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub price_type: Option<String>,
}

fn non_blank_or(value: Option<&str>, default: &'static str) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// 新しい出品を作成する。作成直後は必ず active で、売却情報は持たない。
pub async fn create(
    state: &AppState,
    owner: &AuthenticatedUser,
    draft: &ListingDraft,
) -> Result<Listing, AppError> {
    let title = draft.title.trim();
    if title.is_empty() {
        return Err(AppError::BadRequest("title is required".into()));
    }
    if !draft.price.is_finite() || draft.price < 0.0 {
        return Err(AppError::BadRequest(
            "price must be a non-negative number".into(),
        ));
    }
    let category = normalize_category(&draft.category)
        .ok_or_else(|| AppError::BadRequest(format!("unknown category {:?}", draft.category)))?;
    let image_url = draft.image_url.trim();
    if image_url.is_empty() {
        return Err(AppError::BadRequest("an image is required".into()));
    }

    let id = ListingId::new_v4();
    let condition = non_blank_or(draft.condition.as_deref(), DEFAULT_CONDITION);
    let price_type = non_blank_or(draft.price_type.as_deref(), DEFAULT_PRICE_TYPE);
    db::listings::create_listing(
        &state.pool,
        &NewListing {
            id: &id,
            owner_id: &owner.user_id,
            seller_name: &owner.name,
            title,
            description: draft.description.trim(),
            category,
            price: draft.price,
            image_url,
            condition: &condition,
            price_type: &price_type,
            created_at: db::now_millis(),
        },
    )
    .await?;
    tracing::info!(listing_id = %id, owner = %owner.user_id, "listing created");

    get(state, &id).await
}

pub async fn get(state: &AppState, id: &ListingId) -> Result<Listing, AppError> {
    db::listings::get_listing(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("listing not found".into()))?
        .try_into()
}

/// 販売中の出品（新しい順）。該当なしは空の一覧でありエラーではない。
pub async fn list_active(
    state: &AppState,
    category: Option<&str>,
) -> Result<Vec<Listing>, AppError> {
    let category = match category.map(str::trim).filter(|c| !c.is_empty()) {
        Some(c) => Some(
            normalize_category(c)
                .ok_or_else(|| AppError::BadRequest(format!("unknown category {c:?}")))?,
        ),
        None => None,
    };
    into_listings(db::listings::list_active(&state.pool, category).await?)
}

pub async fn list_by_owner(state: &AppState, owner_id: &UserId) -> Result<Vec<Listing>, AppError> {
    into_listings(db::listings::list_by_owner(&state.pool, owner_id).await?)
}

pub async fn list_sold(state: &AppState, owner_id: &UserId) -> Result<Vec<Listing>, AppError> {
    into_listings(db::listings::list_sold_by_owner(&state.pool, owner_id).await?)
}

pub async fn list_purchased(state: &AppState, buyer_id: &UserId) -> Result<Vec<Listing>, AppError> {
    into_listings(db::listings::list_purchased_by(&state.pool, buyer_id).await?)
}

/// 出品を売却済みにする。出品者本人のみ実行できる。
///
/// 買い手は事前にメールアドレスか学籍番号で解決しておき、その ID を渡す。
/// 遷移は条件付き更新1回で行うので、同時に実行されても成功するのは1件だけで、
/// 残りは `Conflict` になり最初の買い手情報は上書きされない。
pub async fn mark_sold(
    state: &AppState,
    caller: &AuthenticatedUser,
    id: &ListingId,
    buyer_id: Option<&UserId>,
) -> Result<Listing, AppError> {
    let listing = get(state, id).await?;
    if listing.owner_id != caller.user_id {
        return Err(AppError::Forbidden(
            "only the seller can mark a listing as sold".into(),
        ));
    }

    let buyer = match buyer_id {
        Some(buyer_id) if *buyer_id == caller.user_id => {
            return Err(AppError::BadRequest(
                "cannot record yourself as the buyer".into(),
            ));
        }
        Some(buyer_id) => {
            let row = db::users::get_user(&state.pool, buyer_id)
                .await?
                .ok_or_else(|| AppError::NotFound("buyer not found".into()))?;
            Some((buyer_id, row.name))
        }
        None => None,
    };

    let updated = db::listings::mark_sold(
        &state.pool,
        id,
        buyer.as_ref().map(|(id, name)| (*id, name.as_str())),
        db::now_millis(),
    )
    .await?;
    if !updated {
        // 条件に合わなかった理由を判別する
        return match db::listings::get_listing(&state.pool, id).await? {
            None => Err(AppError::NotFound("listing not found".into())),
            Some(_) => Err(AppError::Conflict("listing is already sold".into())),
        };
    }
    tracing::info!(listing_id = %id, buyer = ?buyer_id, "listing marked sold");

    get(state, id).await
}
