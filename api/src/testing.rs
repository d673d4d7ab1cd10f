//! テスト用の共通フィクスチャ。インメモリ SQLite と差し替え可能な外部サービス。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::AppState;
use crate::auth::AuthenticatedUser;
use crate::config::{AppConfig, default_email_suffixes};
use crate::db::{self, Db};
use crate::error::AppError;
use crate::identity::{FederatedIdentity, IdentityVerifier};
use crate::live::LiveHub;
use crate::market::users::{SignIn, sign_in_or_register};
use crate::storage::MediaUploader;
use crate::types::UserId;

/// 接続ごとに別DBになるため、接続数は1に固定し寿命切れでも閉じない。
pub async fn test_pool() -> Db {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::migrate(&pool).await.unwrap();
    pool
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".into(),
        listen_addr: "127.0.0.1:0".into(),
        s3_bucket: "test".into(),
        s3_endpoint: None,
        s3_region: "auto".into(),
        media_public_base_url: "https://media.test".into(),
        allowed_email_suffixes: default_email_suffixes(),
        identity_tokeninfo_url: "http://identity.invalid/tokeninfo".into(),
        identity_audience: None,
        session_ttl_hours: 1,
    }
}

/// クレデンシャル文字列をそのまま身元に対応付ける検証器
#[derive(Default)]
pub struct StaticIdentity {
    identities: Mutex<HashMap<String, FederatedIdentity>>,
}

impl StaticIdentity {
    pub fn register(&self, credential: &str, subject: &str, email: &str, name: Option<&str>) {
        self.identities.lock().unwrap().insert(
            credential.to_string(),
            FederatedIdentity {
                subject: subject.to_string(),
                email: email.to_string(),
                display_name: name.map(str::to_string),
            },
        );
    }
}

#[async_trait]
impl IdentityVerifier for StaticIdentity {
    async fn verify(&self, credential: &str) -> Result<FederatedIdentity, AppError> {
        self.identities
            .lock()
            .unwrap()
            .get(credential)
            .cloned()
            .ok_or_else(|| AppError::Unauthenticated("unknown credential".into()))
    }
}

/// アップロードされた画像を保持するだけのストレージ
#[derive(Default)]
pub struct MemoryStorage {
    pub objects: Mutex<Vec<(String, usize)>>,
    pub fail_with: Mutex<Option<String>>,
}

#[async_trait]
impl MediaUploader for MemoryStorage {
    async fn upload(&self, data: Vec<u8>, content_type: &str) -> Result<String, AppError> {
        if let Some(msg) = self.fail_with.lock().unwrap().clone() {
            return Err(AppError::Upstream(msg));
        }
        let mut objects = self.objects.lock().unwrap();
        let url = format!("https://media.test/{}", objects.len());
        objects.push((content_type.to_string(), data.len()));
        Ok(url)
    }
}

pub struct TestEnv {
    pub state: AppState,
    pub identity: Arc<StaticIdentity>,
    pub media: Arc<MemoryStorage>,
}

pub async fn test_env() -> TestEnv {
    let identity = Arc::new(StaticIdentity::default());
    let media = Arc::new(MemoryStorage::default());
    let state = AppState {
        pool: test_pool().await,
        config: test_config(),
        identity: identity.clone(),
        media: media.clone(),
        live: LiveHub::new(),
    };
    TestEnv {
        state,
        identity,
        media,
    }
}

impl TestEnv {
    /// ユーザを登録してサインインし、セッションを返す。
    pub async fn sign_in(&self, subject: &str, email: &str, name: &str) -> SignIn {
        let credential = format!("cred-{subject}");
        self.identity.register(&credential, subject, email, Some(name));
        sign_in_or_register(&self.state, &credential).await.unwrap()
    }

    /// サインインしてプロフィールを完了させたユーザ
    pub async fn user(&self, subject: &str, name: &str) -> AuthenticatedUser {
        let email = format!("{subject}@college.edu");
        self.sign_in(subject, &email, name).await;
        crate::market::users::complete_profile(
            &self.state,
            &UserId(subject.to_string()),
            name,
            "CSE",
            "3",
            None,
        )
        .await
        .unwrap();
        AuthenticatedUser {
            user_id: UserId(subject.to_string()),
            email,
            name: name.to_string(),
        }
    }
}
