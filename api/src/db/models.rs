use serde::Serialize;

use crate::error::AppError;
use crate::types::{ListingId, ListingStatus, UserId};

/// 時刻カラムはすべて Unix epoch ミリ秒。
pub type Millis = i64;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub name: String,
    pub department: String,
    pub year: String,
    pub roll_number: Option<String>,
    pub profile_complete: bool,
    pub created_at: Millis,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRow {
    pub token_hash: String,
    pub user_id: String,
    pub created_at: Millis,
    pub expires_at: Millis,
}

/// DBから読んだままの出品行。API には [`Listing`] に変換してから出す。
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ListingRow {
    pub id: String,
    pub owner_id: String,
    pub seller_name: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub price: f64,
    pub image_url: String,
    pub condition: String,
    pub price_type: String,
    pub status: String,
    pub buyer_id: Option<String>,
    pub buyer_name: Option<String>,
    pub sold_at: Option<Millis>,
    pub created_at: Millis,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Listing {
    pub id: ListingId,
    pub owner_id: UserId,
    pub seller_name: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub price: f64,
    pub image_url: String,
    pub condition: String,
    pub price_type: String,
    pub status: ListingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sold_at: Option<Millis>,
    pub created_at: Millis,
}

impl Listing {
    pub fn is_active(&self) -> bool {
        self.status == ListingStatus::Active
    }
}

impl TryFrom<ListingRow> for Listing {
    type Error = AppError;

    /// ステータスと売却情報の整合性を検証する。
    /// active なら売却情報は空、sold なら `sold_at` が必須。
    fn try_from(row: ListingRow) -> Result<Self, Self::Error> {
        let status = ListingStatus::parse(&row.status).ok_or_else(|| {
            AppError::Upstream(format!(
                "listing {} has unknown status {:?}",
                row.id, row.status
            ))
        })?;
        match status {
            ListingStatus::Active if row.sold_at.is_some() || row.buyer_id.is_some() => {
                return Err(AppError::Upstream(format!(
                    "active listing {} carries sale data",
                    row.id
                )));
            }
            ListingStatus::Sold if row.sold_at.is_none() => {
                return Err(AppError::Upstream(format!(
                    "sold listing {} has no sold_at",
                    row.id
                )));
            }
            _ => {}
        }
        Ok(Self {
            id: ListingId(row.id),
            owner_id: UserId(row.owner_id),
            seller_name: row.seller_name,
            title: row.title,
            description: row.description,
            category: row.category,
            price: row.price,
            image_url: row.image_url,
            condition: row.condition,
            price_type: row.price_type,
            status,
            buyer_id: row.buyer_id.map(UserId),
            buyer_name: row.buyer_name,
            sold_at: row.sold_at,
            created_at: row.created_at,
        })
    }
}

pub(crate) fn into_listings(rows: Vec<ListingRow>) -> Result<Vec<Listing>, AppError> {
    rows.into_iter().map(Listing::try_from).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ConversationRow {
    pub id: String,
    pub listing_id: String,
    pub listing_title: String,
    pub listing_image_url: Option<String>,
    pub buyer_id: String,
    pub buyer_name: String,
    pub seller_id: String,
    pub seller_name: String,
    /// 最終メッセージの要約（送信時に別書き込みで更新されるため、一時的に古いことがある）
    pub last_message: String,
    pub last_message_at: Millis,
    pub created_at: Millis,
    /// 閲覧者宛ての未読数（一覧取得時のみサブクエリで算出）
    #[sqlx(default)]
    pub unread_count: i64,
}

impl ConversationRow {
    pub fn is_participant(&self, user_id: &UserId) -> bool {
        self.buyer_id == user_id.as_str() || self.seller_id == user_id.as_str()
    }

    /// 指定ユーザから見た相手側のユーザID
    pub fn counterpart_of(&self, user_id: &UserId) -> Option<UserId> {
        if self.buyer_id == user_id.as_str() {
            Some(UserId(self.seller_id.clone()))
        } else if self.seller_id == user_id.as_str() {
            Some(UserId(self.buyer_id.clone()))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub receiver_id: String,
    pub text: String,
    pub image_url: Option<String>,
    pub sent_at: Millis,
    pub is_read: bool,
}
