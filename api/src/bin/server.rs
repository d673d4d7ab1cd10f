use std::sync::Arc;

use campushop_api::AppState;
use campushop_api::config::AppConfig;
use campushop_api::db;
use campushop_api::identity::TokenInfoVerifier;
use campushop_api::live::LiveHub;
use campushop_api::routes::build_router;
use campushop_api::storage::S3Storage;
use tokio::time::{Duration, sleep};

const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campushop_api=debug,tower_http=debug".parse().unwrap()),
        )
        .init();

    let config = AppConfig::from_env();
    tracing::info!("starting server on {}", config.listen_addr);

    let pool = db::connect(&config.database_url)
        .await
        .expect("failed to connect to database");
    db::migrate(&pool).await.expect("failed to run migrations");

    {
        let cleanup_pool = pool.clone();
        tokio::spawn(async move {
            loop {
                match db::sessions::delete_expired_sessions(&cleanup_pool, db::now_millis()).await
                {
                    Ok(deleted) => {
                        tracing::info!(deleted, "session cleanup finished");
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "session cleanup failed"
                        );
                    }
                }
                sleep(SESSION_CLEANUP_INTERVAL).await;
            }
        });
    }

    let media = Arc::new(S3Storage::new(&config).await);
    let identity = Arc::new(TokenInfoVerifier::new(&config));

    let state = AppState {
        pool,
        config: config.clone(),
        identity,
        media,
        live: LiveHub::new(),
    };

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("failed to bind");
    tracing::info!("listening on {}", config.listen_addr);
    axum::serve(listener, app).await.expect("server error");
}
