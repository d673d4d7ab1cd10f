pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod live;
pub mod market;
pub mod routes;
pub mod screens;
pub mod storage;
pub mod types;

// インメモリ SQLite を使うため sqlite ビルドでのみ有効
#[cfg(all(test, not(feature = "postgres")))]
pub(crate) mod testing;

use std::sync::Arc;

use config::AppConfig;
use identity::IdentityVerifier;
use live::LiveHub;
use storage::MediaUploader;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: db::Db,
    pub config: AppConfig,
    pub identity: Arc<dyn IdentityVerifier>,
    pub media: Arc<dyn MediaUploader>,
    pub live: LiveHub,
}
