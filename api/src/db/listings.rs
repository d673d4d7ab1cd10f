use super::models::ListingRow;
use super::{Db, sql};
use crate::types::{ListingId, ListingStatus, UserId};

/// 新規出品の書き込み内容。ステータスは常に active で作成される。
#[derive(Debug, Clone)]
pub struct NewListing<'a> {
    pub id: &'a ListingId,
    pub owner_id: &'a UserId,
    pub seller_name: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub category: &'a str,
    pub price: f64,
    pub image_url: &'a str,
    pub condition: &'a str,
    pub price_type: &'a str,
    pub created_at: i64,
}

#[tracing::instrument(skip(pool, listing), fields(id = %listing.id), err)]
pub async fn create_listing(pool: &Db, listing: &NewListing<'_>) -> Result<(), sqlx::Error> {
    let q = sql("INSERT INTO listings
            (id, owner_id, seller_name, title, description, category, price, image_url,
             condition, price_type, status, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?)");
    sqlx::query(&q)
        .bind(listing.id.as_str())
        .bind(listing.owner_id.as_str())
        .bind(listing.seller_name)
        .bind(listing.title)
        .bind(listing.description)
        .bind(listing.category)
        .bind(listing.price)
        .bind(listing.image_url)
        .bind(listing.condition)
        .bind(listing.price_type)
        .bind(listing.created_at)
        .execute(pool)
        .await?;
    Ok(())
}

#[tracing::instrument(skip(pool), err)]
pub async fn get_listing(pool: &Db, id: &ListingId) -> Result<Option<ListingRow>, sqlx::Error> {
    let q = sql("SELECT * FROM listings WHERE id = ?");
    sqlx::query_as::<_, ListingRow>(&q)
        .bind(id.as_str())
        .fetch_optional(pool)
        .await
}

/// 販売中の出品を新しい順で取得。カテゴリ指定があれば絞り込む。
#[tracing::instrument(skip(pool), err)]
pub async fn list_active(
    pool: &Db,
    category: Option<&str>,
) -> Result<Vec<ListingRow>, sqlx::Error> {
    match category {
        Some(category) => {
            let q = sql("SELECT * FROM listings WHERE status = 'active' AND category = ?
                 ORDER BY created_at DESC");
            sqlx::query_as::<_, ListingRow>(&q)
                .bind(category)
                .fetch_all(pool)
                .await
        }
        None => {
            let q = sql("SELECT * FROM listings WHERE status = 'active' ORDER BY created_at DESC");
            sqlx::query_as::<_, ListingRow>(&q).fetch_all(pool).await
        }
    }
}

#[tracing::instrument(skip(pool), err)]
pub async fn list_by_owner(pool: &Db, owner_id: &UserId) -> Result<Vec<ListingRow>, sqlx::Error> {
    let q = sql("SELECT * FROM listings WHERE owner_id = ? ORDER BY created_at DESC");
    sqlx::query_as::<_, ListingRow>(&q)
        .bind(owner_id.as_str())
        .fetch_all(pool)
        .await
}

#[tracing::instrument(skip(pool), err)]
pub async fn list_sold_by_owner(
    pool: &Db,
    owner_id: &UserId,
) -> Result<Vec<ListingRow>, sqlx::Error> {
    let q = sql("SELECT * FROM listings WHERE status = 'sold' AND owner_id = ?
         ORDER BY sold_at DESC");
    sqlx::query_as::<_, ListingRow>(&q)
        .bind(owner_id.as_str())
        .fetch_all(pool)
        .await
}

#[tracing::instrument(skip(pool), err)]
pub async fn list_purchased_by(
    pool: &Db,
    buyer_id: &UserId,
) -> Result<Vec<ListingRow>, sqlx::Error> {
    let q = sql("SELECT * FROM listings WHERE status = 'sold' AND buyer_id = ?
         ORDER BY sold_at DESC");
    sqlx::query_as::<_, ListingRow>(&q)
        .bind(buyer_id.as_str())
        .fetch_all(pool)
        .await
}

/// active → sold の条件付き更新。
/// 現在 active の行にだけ適用されるので、同時に売却処理が走っても成功するのは1件だけ。
/// 更新できた場合は true。
#[tracing::instrument(skip(pool), err)]
pub async fn mark_sold(
    pool: &Db,
    id: &ListingId,
    buyer: Option<(&UserId, &str)>,
    sold_at: i64,
) -> Result<bool, sqlx::Error> {
    let q = sql("UPDATE listings SET status = ?, buyer_id = ?, buyer_name = ?, sold_at = ?
         WHERE id = ? AND status = ?");
    let result = sqlx::query(&q)
        .bind(ListingStatus::Sold.as_str())
        .bind(buyer.map(|(id, _)| id.as_str()))
        .bind(buyer.map(|(_, name)| name))
        .bind(sold_at)
        .bind(id.as_str())
        .bind(ListingStatus::Active.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
