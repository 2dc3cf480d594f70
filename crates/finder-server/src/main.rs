mod config;

use std::sync::Arc;

use axum::http::{
    Method,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use finder_api::storage::PhotoStore;
use finder_api::{AppState, AppStateInner};
use finder_db::Database;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "finder=debug,finder_api=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Database::open(&config.db_path)?;
    let photos = PhotoStore::new(config.storage_dir.clone(), config.public_url.clone()).await?;

    let mut inner = AppStateInner::new(db, config.jwt_secret.clone(), photos);
    inner.token_ttl = chrono::Duration::days(config.token_ttl_days);
    inner.max_photo_bytes = config.max_photo_bytes;
    let state: AppState = Arc::new(inner);

    // The browser front end may be served from anywhere
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(false);

    let app = finder_api::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = config.listen_addr()?;
    info!("Finder server listening on {}", addr);
    info!(
        "Database: {}, photos: {} (served from {}), max photo {} bytes",
        config.db_path.display(),
        config.storage_dir.display(),
        config.public_url,
        config.max_photo_bytes
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
