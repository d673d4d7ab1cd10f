use serde::{Deserialize, Serialize};

macro_rules! newtype_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new_v4() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

newtype_id!(UserId);
newtype_id!(ListingId);
newtype_id!(ConversationId);
newtype_id!(MessageId);

impl ConversationId {
    /// 出品・買い手・売り手の組から会話IDを決定的に導出する。
    /// 同じ三者で何度連絡を始めても同じ会話に解決される。
    pub fn derive(listing_id: &ListingId, buyer_id: &UserId, seller_id: &UserId) -> Self {
        Self(format!(
            "{}_{}_{}",
            listing_id.as_str(),
            buyer_id.as_str(),
            seller_id.as_str()
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Active,
    Sold,
}

impl ListingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Sold => "sold",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "sold" => Some(Self::Sold),
            _ => None,
        }
    }
}

pub const CATEGORIES: &[&str] = &["Textbooks", "Electronics", "Furniture", "Other"];
pub const DEFAULT_CONDITION: &str = "Used";
pub const DEFAULT_PRICE_TYPE: &str = "Negotiable";

/// 大文字小文字を区別せずにカテゴリ名を正規化する。未知のカテゴリは `None`。
pub fn normalize_category(s: &str) -> Option<&'static str> {
    let s = s.trim();
    CATEGORIES
        .iter()
        .copied()
        .find(|c| c.eq_ignore_ascii_case(s))
}

/// メールアドレスが許可された学術ドメインに属するか判定する。
/// 比較は大文字小文字を区別しない。
pub fn is_campus_email(email: &str, allowed_suffixes: &[String]) -> bool {
    let email = email.trim().to_ascii_lowercase();
    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() || domain.starts_with('.') {
        return false;
    }
    allowed_suffixes
        .iter()
        .any(|suffix| email.ends_with(&suffix.to_ascii_lowercase()))
}
