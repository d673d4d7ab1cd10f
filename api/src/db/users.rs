use super::models::UserRow;
use super::{Db, sql};
use crate::types::UserId;

#[tracing::instrument(skip(pool), err)]
pub async fn get_user(pool: &Db, id: &UserId) -> Result<Option<UserRow>, sqlx::Error> {
    let q = sql("SELECT * FROM users WHERE id = ?");
    sqlx::query_as::<_, UserRow>(&q)
        .bind(id.as_str())
        .fetch_optional(pool)
        .await
}

/// 大文字小文字を区別しないメールアドレス検索
#[tracing::instrument(skip(pool), err)]
pub async fn get_user_by_email(pool: &Db, email: &str) -> Result<Option<UserRow>, sqlx::Error> {
    let q = sql("SELECT * FROM users WHERE LOWER(email) = LOWER(?)");
    sqlx::query_as::<_, UserRow>(&q)
        .bind(email.trim())
        .fetch_optional(pool)
        .await
}

#[tracing::instrument(skip(pool), err)]
pub async fn get_user_by_roll_number(
    pool: &Db,
    roll_number: &str,
) -> Result<Option<UserRow>, sqlx::Error> {
    let q = sql("SELECT * FROM users WHERE roll_number = ?");
    sqlx::query_as::<_, UserRow>(&q)
        .bind(roll_number.trim())
        .fetch_optional(pool)
        .await
}

/// 未登録であればプロフィール未完了のユーザを作成する。作成した場合は true。
#[tracing::instrument(skip(pool), err)]
pub async fn create_user_if_absent(
    pool: &Db,
    id: &UserId,
    email: &str,
    name: &str,
    created_at: i64,
) -> Result<bool, sqlx::Error> {
    let q = sql(
        "INSERT INTO users (id, email, name, profile_complete, created_at) VALUES (?, ?, ?, FALSE, ?)
         ON CONFLICT (id) DO NOTHING",
    );
    let result = sqlx::query(&q)
        .bind(id.as_str())
        .bind(email.trim().to_ascii_lowercase())
        .bind(name)
        .bind(created_at)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// プロフィール設定を完了させる。対象ユーザが存在しなければ false。
#[tracing::instrument(skip(pool), err)]
pub async fn complete_profile(
    pool: &Db,
    id: &UserId,
    name: &str,
    department: &str,
    year: &str,
    roll_number: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let q = sql("UPDATE users SET
            name = ?,
            department = ?,
            year = ?,
            roll_number = COALESCE(?, roll_number),
            profile_complete = TRUE
         WHERE id = ?");
    let result = sqlx::query(&q)
        .bind(name)
        .bind(department)
        .bind(year)
        .bind(roll_number)
        .bind(id.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(all(test, not(feature = "postgres")))]
mod tests {
    use super::*;
    use crate::testing::test_pool;

    #[tokio::test]
    async fn create_if_absent_only_inserts_once() {
        let pool = test_pool().await;
        let id = UserId("g-123".into());
        assert!(
            create_user_if_absent(&pool, &id, "Ravi@IITB.ac.in", "Ravi", 10)
                .await
                .unwrap()
        );
        assert!(
            !create_user_if_absent(&pool, &id, "ravi@iitb.ac.in", "Someone Else", 20)
                .await
                .unwrap()
        );

        let user = get_user(&pool, &id).await.unwrap().unwrap();
        assert_eq!(user.email, "ravi@iitb.ac.in");
        assert_eq!(user.name, "Ravi");
        assert!(!user.profile_complete);
        assert_eq!(user.created_at, 10);
    }

    #[tokio::test]
    async fn complete_profile_sets_flag_and_roll_number() {
        let pool = test_pool().await;
        let id = UserId("g-1".into());
        create_user_if_absent(&pool, &id, "a@college.edu", "A", 1)
            .await
            .unwrap();

        assert!(
            complete_profile(&pool, &id, "Anita", "CSE", "3", Some("21CS042"))
                .await
                .unwrap()
        );
        let user = get_user_by_roll_number(&pool, "21CS042")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.id, "g-1");
        assert_eq!(user.name, "Anita");
        assert!(user.profile_complete);

        let by_email = get_user_by_email(&pool, "A@College.EDU").await.unwrap();
        assert_eq!(by_email.map(|u| u.id), Some("g-1".to_string()));
    }

    #[tokio::test]
    async fn complete_profile_for_unknown_user_reports_missing() {
        let pool = test_pool().await;
        let updated = complete_profile(&pool, &UserId("ghost".into()), "X", "Y", "1", None)
            .await
            .unwrap();
        assert!(!updated);
    }
}
